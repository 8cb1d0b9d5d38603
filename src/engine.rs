//! Engine facade: configuration lifecycle, API dispatch, limits

use crate::config::DlpConfig;
use crate::detector::Detector;
use crate::error::{DlpError, Result};
use crate::mask::{MaskFn, MaskWorker, Masker};
use crate::result::DetectResult;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error};

/// Maximum input length in bytes for the string APIs.
pub const MAX_INPUT: usize = 1024 * 1024;
/// Maximum entry count for the map APIs.
pub const MAX_ITEM: usize = 4096;
/// Maximum flattened k/v item count accepted by the log processor.
pub const MAX_LOG_ITEM: usize = 16;
/// Default byte budget for the log processor raw-log argument.
const DEF_MAX_LOG_INPUT: usize = 1024;
/// Appended when the log processor truncates its input.
pub const LIMIT_SENTINEL: &str = "<--[DLP] Log Limit Exceeded-->";
const KV_LIMIT_KEY: &str = "<--[DLP Error]-->";

const DEFAULT_CONF: &str = include_str!("default_conf.yml");

/// The DLP engine. One engine per worker; configuration is applied once and
/// scans run on the owning thread. Sharing across threads needs external
/// synchronisation, which the `&mut self` configuration surface enforces.
pub struct Engine {
    caller_id: String,
    config: DlpConfig,
    pub(crate) detectors: BTreeMap<i32, Option<Detector>>,
    pub(crate) maskers: HashMap<String, Masker>,
    configured: bool,
    closed: bool,
    log_only: bool,
    pub(crate) max_regex_rule_id: i32,
    max_log_input: usize,
}

impl Engine {
    /// Create an idle engine. `caller_id` identifies the integrating
    /// service in log output.
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            config: DlpConfig::default(),
            detectors: BTreeMap::new(),
            maskers: HashMap::new(),
            configured: false,
            closed: false,
            log_only: false,
            max_regex_rule_id: 0,
            max_log_input: DEF_MAX_LOG_INPUT,
        }
    }

    /// Apply a configuration document given as a string.
    pub fn apply_config(&mut self, conf: &str) -> Result<()> {
        let obj = DlpConfig::from_str(conf)?;
        self.apply_config_obj(obj)
    }

    /// Apply a configuration document read from a file.
    pub fn apply_config_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let obj = DlpConfig::from_file(path)?;
        self.apply_config_obj(obj)
    }

    /// Apply the embedded default catalog.
    pub fn apply_config_default(&mut self) -> Result<()> {
        self.apply_config(DEFAULT_CONF)
    }

    /// The embedded default catalog text.
    pub fn default_config() -> &'static str {
        DEFAULT_CONF
    }

    /// Dump the loaded configuration back as YAML.
    pub fn show_config(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.config)?)
    }

    /// Crate version.
    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Detect sensitive information in a string.
    pub fn detect(&self, input: &str) -> Result<Vec<DetectResult>> {
        self.ensure_scan_api()?;
        self.check_input_len(input)?;
        Ok(self.detect_impl(input))
    }

    /// Detect sensitive information in a key/value map.
    pub fn detect_map(&self, input: &HashMap<String, String>) -> Result<Vec<DetectResult>> {
        self.ensure_scan_api()?;
        if input.len() > MAX_ITEM {
            return Err(DlpError::MaxInputLimit { max: MAX_ITEM });
        }
        Ok(self.detect_map_impl(input))
    }

    /// Detect, then return the input with every hit replaced by its masked
    /// form, together with the hits.
    pub fn deidentify(&self, input: &str) -> Result<(String, Vec<DetectResult>)> {
        self.ensure_scan_api()?;
        self.check_input_len(input)?;
        self.deidentify_impl(input)
    }

    /// Detect over a map, then return the map with matched values masked.
    pub fn deidentify_map(
        &self,
        input: &HashMap<String, String>,
    ) -> Result<(HashMap<String, String>, Vec<DetectResult>)> {
        self.ensure_scan_api()?;
        if input.len() > MAX_ITEM {
            return Err(DlpError::MaxInputLimit { max: MAX_ITEM });
        }
        self.deidentify_map_impl(input)
    }

    /// Mask a string directly with the named mask rule.
    pub fn mask(&self, input: &str, method: &str) -> Result<String> {
        self.ensure_scan_api()?;
        self.check_input_len(input)?;
        let masker = self
            .maskers
            .get(method)
            .ok_or_else(|| DlpError::MaskWorkerNotFound(method.to_string()))?;
        masker.mask(input, self)
    }

    /// Register a custom mask function under a new name. Refuses to
    /// overwrite an existing worker.
    pub fn register_masker(
        &mut self,
        name: &str,
        func: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Result<()> {
        self.ensure_ready()?;
        if self.maskers.contains_key(name) {
            return Err(DlpError::MaskNameConflict(name.to_string()));
        }
        self.maskers.insert(
            name.to_string(),
            Masker::Custom {
                name: name.to_string(),
                func: Box::new(func) as MaskFn,
            },
        );
        Ok(())
    }

    /// Disable every detection rule. Used for benchmark baselines.
    pub fn disable_all_rules(&mut self) -> Result<()> {
        self.ensure_ready()?;
        for slot in self.detectors.values_mut() {
            *slot = None;
        }
        Ok(())
    }

    /// Switch the engine to log-only mode and hand out a processor that
    /// deidentifies raw log lines and k/v pairs. After this call the other
    /// scan APIs refuse to run: the rule set is subsetted for log traffic.
    pub fn new_log_processor(&mut self) -> LogProcessor<'_> {
        if !self.configured {
            panic!("{}", DlpError::NotConfigured);
        }
        self.log_only = true;
        LogProcessor { engine: self }
    }

    /// Release detectors and maskers. Every scan API fails afterwards.
    pub fn close(&mut self) {
        self.detectors.clear();
        self.maskers.clear();
        self.closed = true;
    }

    pub(crate) fn is_log_only(&self) -> bool {
        self.log_only
    }

    // internal

    fn apply_config_obj(&mut self, conf: DlpConfig) -> Result<()> {
        if conf.global.max_log_input > 0 {
            self.max_log_input = conf.global.max_log_input as usize;
        }
        if conf.global.max_regex_rule_id > 0 {
            self.max_regex_rule_id = conf.global.max_regex_rule_id;
        }
        self.load_detectors(&conf);
        self.load_maskers(&conf);
        self.config = conf;
        self.configured = true;
        if self.config.global.mode == "debug" {
            let enabled = self.detectors.values().filter(|d| d.is_some()).count();
            debug!(
                caller_id = %self.caller_id,
                rules = enabled,
                maskers = self.maskers.len(),
                "dlp engine configured"
            );
        }
        Ok(())
    }

    fn load_detectors(&mut self, conf: &DlpConfig) {
        self.detectors = conf
            .rules
            .iter()
            .map(|rule| (rule.rule_id, Some(Detector::new(rule.clone()))))
            .collect();
        // EnableRules keeps only the listed ids; DisableRules then prunes.
        // Disabled slots stay in the map as None.
        if !conf.global.enable_rules.is_empty() {
            for (id, slot) in self.detectors.iter_mut() {
                if !conf.global.enable_rules.contains(id) {
                    *slot = None;
                }
            }
        }
        for id in &conf.global.disable_rules {
            if let Some(slot) = self.detectors.get_mut(id) {
                *slot = None;
            }
        }
    }

    fn load_maskers(&mut self, conf: &DlpConfig) {
        self.maskers = HashMap::with_capacity(conf.mask_rules.len());
        for rule in &conf.mask_rules {
            let worker = MaskWorker::new(rule.clone());
            let name = worker.rule_name().to_string();
            if self.maskers.contains_key(&name) {
                error!(rule_name = %name, "mask rule name conflict, keeping the first");
                continue;
            }
            self.maskers.insert(name, Masker::Worker(worker));
        }
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if !self.configured {
            // programmer error, not a runtime condition
            panic!("{}", DlpError::NotConfigured);
        }
        if self.closed {
            return Err(DlpError::ProcessAfterClose);
        }
        Ok(())
    }

    pub(crate) fn ensure_scan_api(&self) -> Result<()> {
        self.ensure_ready()?;
        if self.log_only {
            return Err(DlpError::OnlyForLog);
        }
        Ok(())
    }

    pub(crate) fn check_input_len(&self, input: &str) -> Result<()> {
        if input.len() > MAX_INPUT {
            return Err(DlpError::MaxInputLimit { max: MAX_INPUT });
        }
        Ok(())
    }
}

/// Deidentifying log hook handed out by [`Engine::new_log_processor`].
///
/// Every panic inside `process` is absorbed: a logging path must never take
/// the caller down.
pub struct LogProcessor<'a> {
    engine: &'a Engine,
}

impl LogProcessor<'_> {
    /// Deidentify a raw log line and its k/v pairs.
    ///
    /// The raw line is truncated to the configured log budget (with a
    /// sentinel appended); the pair list is rounded down to an even length
    /// and truncated to [`MAX_LOG_ITEM`] flattened items.
    pub fn process(&self, raw_log: &str, kvs: &[&str]) -> (String, Vec<(String, String)>) {
        let fallback = || {
            let pairs = kvs
                .chunks_exact(2)
                .map(|c| (c[0].to_string(), c[1].to_string()))
                .collect();
            (raw_log.to_string(), pairs)
        };
        catch_unwind(AssertUnwindSafe(|| self.process_inner(raw_log, kvs))).unwrap_or_else(|_| {
            error!("panic absorbed in log processor");
            fallback()
        })
    }

    fn process_inner(&self, raw_log: &str, kvs: &[&str]) -> (String, Vec<(String, String)>) {
        let budget = self.engine.max_log_input;
        let mut text = raw_log;
        let mut truncated = false;
        if text.len() >= budget {
            let mut cut = budget.min(text.len());
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
            truncated = true;
        }
        let mut out = self
            .engine
            .deidentify_impl(text)
            .map(|(masked, _)| masked)
            .unwrap_or_else(|_| text.to_string());
        if truncated {
            out.push_str(LIMIT_SENTINEL);
        }

        let mut count = kvs.len();
        if count % 2 != 0 {
            count -= 1;
        }
        let mut kv_truncated = false;
        if count >= MAX_LOG_ITEM {
            count = MAX_LOG_ITEM;
            kv_truncated = true;
        }
        let pairs: Vec<(String, String)> = kvs[..count]
            .chunks_exact(2)
            .map(|c| (c[0].to_string(), c[1].to_string()))
            .collect();
        let map: HashMap<String, String> = pairs.iter().cloned().collect();
        let masked = self
            .engine
            .deidentify_map_impl(&map)
            .map(|(out_map, _)| out_map)
            .unwrap_or(map);
        let mut out_kvs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| {
                let value = masked.get(k).cloned().unwrap_or_else(|| v.clone());
                (k.clone(), value)
            })
            .collect();
        if kv_truncated {
            out_kvs.push((KV_LIMIT_KEY.to_string(), LIMIT_SENTINEL.to_string()));
        }
        (out, out_kvs)
    }
}
