//! YAML configuration model and load-time verification

use crate::error::{DlpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Mask strategies supported by `MaskRules[].MaskType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaskType {
    Char,
    Tag,
    Replace,
    Algo,
}

impl Default for MaskType {
    fn default() -> Self {
        Self::Char
    }
}

/// Character classes that expand into `IgnoreCharSet` when a worker is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgnoreKind {
    Numeric,
    AlphaUpperCase,
    AlphaLowerCase,
    Whitespace,
    Punctuation,
}

impl IgnoreKind {
    /// The characters this class contributes to the ignore set.
    pub fn char_set(self) -> &'static str {
        match self {
            Self::Numeric => "0123456789",
            Self::AlphaLowerCase => "abcdefghijklmnopqrstuvwxyz",
            Self::AlphaUpperCase => "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
            Self::Whitespace => " \t\n\x0B\x0C\r",
            Self::Punctuation => "!\"#$%&'()*+,-./:;<=>?@[]^_`{|}~",
        }
    }
}

/// Blacklist algorithms for `Filter.BAlgo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterAlgo {
    /// Discard results that already contain mask characters (`*`, `#`)
    Masked,
}

/// Verification algorithms for `Verify.VAlgo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerifyAlgo {
    Idcard,
    Abarouting,
    Creditcard,
    Bitcoin,
    Domain,
}

/// One masking rule from `MaskRules[]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskRuleSpec {
    #[serde(rename = "RuleName")]
    pub rule_name: String,
    #[serde(rename = "MaskType", default)]
    pub mask_type: MaskType,
    /// Mask character for CHAR, replacement for REPLACE, algorithm for ALGO
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "Offset", default)]
    pub offset: u32,
    #[serde(rename = "Padding", default)]
    pub padding: i32,
    /// Maximum number of positions to visit; 0 means no limit
    #[serde(rename = "Length", default)]
    pub length: u32,
    #[serde(rename = "Reverse", default)]
    pub reverse: bool,
    #[serde(rename = "IgnoreCharSet", default)]
    pub ignore_char_set: String,
    #[serde(rename = "IgnoreKind", default)]
    pub ignore_kind: Vec<IgnoreKind>,
}

/// Detect section of a rule: key-side and value-side regexes/dictionaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectSpec {
    #[serde(rename = "KReg", default)]
    pub k_reg: Vec<String>,
    #[serde(rename = "KDict", default)]
    pub k_dict: Vec<String>,
    #[serde(rename = "VReg", default)]
    pub v_reg: Vec<String>,
    #[serde(rename = "VDict", default)]
    pub v_dict: Vec<String>,
}

/// Filter section: results hit by the blacklist are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "BReg", default)]
    pub b_reg: Vec<String>,
    #[serde(rename = "BDict", default)]
    pub b_dict: Vec<String>,
    #[serde(rename = "BAlgo", default)]
    pub b_algo: Vec<FilterAlgo>,
}

/// Verify section: results must pass context and algorithm checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifySpec {
    #[serde(rename = "CReg", default)]
    pub c_reg: Vec<String>,
    #[serde(rename = "CDict", default)]
    pub c_dict: Vec<String>,
    #[serde(rename = "VAlgo", default)]
    pub v_algo: Vec<VerifyAlgo>,
}

/// One detection rule from `Rules[]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "RuleID")]
    pub rule_id: i32,
    #[serde(rename = "InfoType", default)]
    pub info_type: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "EnName", default)]
    pub en_name: String,
    #[serde(rename = "CnName", default)]
    pub cn_name: String,
    #[serde(rename = "GroupName", default)]
    pub group_name: String,
    /// Sensitivity, L1 (least) to L4 (most)
    #[serde(rename = "Level", default)]
    pub level: String,
    #[serde(rename = "Detect", default)]
    pub detect: DetectSpec,
    #[serde(rename = "Filter", default)]
    pub filter: FilterSpec,
    #[serde(rename = "Verify", default)]
    pub verify: VerifySpec,
    /// Name of the mask rule applied to hits of this rule
    #[serde(rename = "Mask", default)]
    pub mask: String,
    #[serde(rename = "ExtInfo", default)]
    pub ext_info: HashMap<String, String>,
}

/// Global engine options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSpec {
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "ApiVersion", default)]
    pub api_version: String,
    #[serde(rename = "Mode", default)]
    pub mode: String,
    #[serde(rename = "AllowRPC", default)]
    pub allow_rpc: bool,
    /// When non-empty, only the listed rule ids stay enabled
    #[serde(rename = "EnableRules", default)]
    pub enable_rules: Vec<i32>,
    /// Applied after EnableRules; listed ids are disabled
    #[serde(rename = "DisableRules", default)]
    pub disable_rules: Vec<i32>,
    #[serde(rename = "MaxLogInput", default)]
    pub max_log_input: u32,
    /// In log-only mode, regex rules above this id are skipped
    #[serde(rename = "MaxRegexRuleID", default)]
    pub max_regex_rule_id: i32,
}

/// The full configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlpConfig {
    #[serde(rename = "Global", default)]
    pub global: GlobalSpec,
    #[serde(rename = "MaskRules", default)]
    pub mask_rules: Vec<MaskRuleSpec>,
    #[serde(rename = "Rules", default)]
    pub rules: Vec<RuleSpec>,
}

const API_VERSION_PREFIX: &str = "v2";
const MODES: [&str; 2] = ["debug", "release"];
const MASK_ALGOS: [&str; 6] = ["BASE64", "MD5", "CRC32", "ADDRESS", "NUMBER", "DEIDENTIFY"];

impl DlpConfig {
    /// Parse a configuration document and verify its content.
    pub fn from_str(conf: &str) -> Result<Self> {
        if conf.is_empty() {
            return Err(DlpError::ConfEmpty);
        }
        let mut obj: DlpConfig = serde_yaml::from_str(conf)?;
        obj.verify()?;
        Ok(obj)
    }

    /// Read a configuration file and parse it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DlpError::ConfPathEmpty);
        }
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Check the parts serde cannot: version prefix, mode set, ALGO values
    /// and that every rule has at least one detect condition. Mode is
    /// normalised to lower case.
    pub fn verify(&mut self) -> Result<()> {
        if !self.global.api_version.starts_with(API_VERSION_PREFIX) {
            return Err(DlpError::ConfVerifyFailed(format!(
                "Global.ApiVersion {:?} must start with {:?}",
                self.global.api_version, API_VERSION_PREFIX
            )));
        }
        self.global.mode = self.global.mode.to_lowercase();
        if !MODES.contains(&self.global.mode.as_str()) {
            return Err(DlpError::ConfVerifyFailed(format!(
                "Global.Mode {:?} is unknown",
                self.global.mode
            )));
        }
        for rule in &self.mask_rules {
            if rule.mask_type == MaskType::Algo && !MASK_ALGOS.contains(&rule.value.as_str()) {
                return Err(DlpError::ConfVerifyFailed(format!(
                    "mask rule {}: ALGO value {:?} is unknown",
                    rule.rule_name, rule.value
                )));
            }
        }
        for rule in &self.rules {
            let d = &rule.detect;
            if d.k_reg.is_empty() && d.k_dict.is_empty() && d.v_reg.is_empty() && d.v_dict.is_empty()
            {
                return Err(DlpError::ConfVerifyFailed(format!(
                    "rule {}: Detect section is empty",
                    rule.rule_id
                )));
            }
        }
        Ok(())
    }
}

impl MaskRuleSpec {
    /// The ignore set with `IgnoreKind` classes expanded into it.
    pub fn expanded_ignore_set(&self) -> String {
        let mut set = self.ignore_char_set.clone();
        for kind in &self.ignore_kind {
            set.push_str(kind.char_set());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
Global:
  ApiVersion: v2.4
  Mode: Release
MaskRules:
  - RuleName: M1
    MaskType: CHAR
    Value: "*"
    Offset: 3
    Padding: 3
Rules:
  - RuleID: 1
    InfoType: PHONE
    Level: L3
    Detect:
      VReg: ['1[3-9]\d{9}']
    Mask: M1
"#;

    #[test]
    fn test_parse_minimal() {
        let conf = DlpConfig::from_str(MINIMAL).unwrap();
        assert_eq!(conf.global.mode, "release"); // normalised
        assert_eq!(conf.rules.len(), 1);
        assert_eq!(conf.rules[0].rule_id, 1);
        assert_eq!(conf.mask_rules[0].offset, 3);
    }

    #[test]
    fn test_empty_conf_rejected() {
        assert!(matches!(DlpConfig::from_str(""), Err(DlpError::ConfEmpty)));
    }

    #[test]
    fn test_bad_api_version_rejected() {
        let conf = MINIMAL.replace("v2.4", "v1.0");
        assert!(matches!(
            DlpConfig::from_str(&conf),
            Err(DlpError::ConfVerifyFailed(_))
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let conf = MINIMAL.replace("Release", "fast");
        assert!(matches!(
            DlpConfig::from_str(&conf),
            Err(DlpError::ConfVerifyFailed(_))
        ));
    }

    #[test]
    fn test_unknown_mask_type_rejected_by_serde() {
        let conf = MINIMAL.replace("CHAR", "BLUR");
        assert!(matches!(
            DlpConfig::from_str(&conf),
            Err(DlpError::ConfParse(_))
        ));
    }

    #[test]
    fn test_negative_offset_rejected_by_serde() {
        let conf = MINIMAL.replace("Offset: 3", "Offset: -1");
        assert!(matches!(
            DlpConfig::from_str(&conf),
            Err(DlpError::ConfParse(_))
        ));
    }

    #[test]
    fn test_unknown_algo_value_rejected() {
        let conf = MINIMAL.replace("MaskType: CHAR", "MaskType: ALGO").replace("Value: \"*\"", "Value: ROT13");
        assert!(matches!(
            DlpConfig::from_str(&conf),
            Err(DlpError::ConfVerifyFailed(_))
        ));
    }

    #[test]
    fn test_rule_without_detect_rejected() {
        let mut conf = DlpConfig::from_str(MINIMAL).unwrap();
        conf.rules[0].detect = DetectSpec::default();
        assert!(matches!(conf.verify(), Err(DlpError::ConfVerifyFailed(_))));
    }

    #[test]
    fn test_ignore_kind_expansion() {
        let rule = MaskRuleSpec {
            ignore_char_set: "@".into(),
            ignore_kind: vec![IgnoreKind::Numeric],
            ..Default::default()
        };
        let set = rule.expanded_ignore_set();
        assert!(set.contains('@'));
        assert!(set.contains('7'));
        assert!(!set.contains('a'));
    }
}
