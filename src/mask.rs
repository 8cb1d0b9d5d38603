//! Mask workers: one per configured mask rule, plus caller-registered ones

use crate::address;
use crate::config::{MaskRuleSpec, MaskType};
use crate::engine::Engine;
use crate::error::{DlpError, Result};
use crate::result::DetectResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use std::fmt::Write as _;

/// Info type used by TAG masking when detection finds nothing.
pub const UNKNOWN_TAG: &str = "UNKNOWN";

/// Signature of a caller-registered mask function.
pub type MaskFn = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A masker is either a rule-driven worker or a registered custom function.
pub enum Masker {
    Worker(MaskWorker),
    Custom { name: String, func: MaskFn },
}

impl Masker {
    pub fn rule_name(&self) -> &str {
        match self {
            Masker::Worker(worker) => &worker.rule.rule_name,
            Masker::Custom { name, .. } => name,
        }
    }

    /// Produce the masked form of `input`. TAG masking without a known
    /// info type detects on the input first; ALGO DEIDENTIFY recurses into
    /// the engine, which is why the engine is threaded through.
    pub fn mask(&self, input: &str, engine: &Engine) -> Result<String> {
        match self {
            Masker::Worker(worker) => worker.mask(input, engine),
            Masker::Custom { func, .. } => func(input),
        }
    }

    /// Fill `result.mask_text`. Falls back to the original text when the
    /// strategy fails, so a scan never produces an empty replacement.
    pub fn mask_result(&self, result: &mut DetectResult, engine: &Engine) -> Result<()> {
        let masked = match self {
            Masker::Worker(worker) if worker.rule.mask_type == MaskType::Tag => {
                Ok(tag_of(&result.info_type))
            }
            other => other.mask(&result.text, engine),
        };
        match masked {
            Ok(text) => {
                result.mask_text = text;
                Ok(())
            }
            Err(err) => {
                result.mask_text = result.text.clone();
                Err(err)
            }
        }
    }
}

/// Rule-driven mask worker.
pub struct MaskWorker {
    rule: MaskRuleSpec,
    ignore_set: String,
}

impl MaskWorker {
    /// Build a worker; `IgnoreKind` classes are expanded into the ignore
    /// set once, here.
    pub fn new(rule: MaskRuleSpec) -> Self {
        let ignore_set = rule.expanded_ignore_set();
        Self { rule, ignore_set }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule.rule_name
    }

    fn mask(&self, input: &str, engine: &Engine) -> Result<String> {
        match self.rule.mask_type {
            MaskType::Char => Ok(self.mask_char(input)),
            MaskType::Tag => Ok(self.mask_str_tag(input, engine)),
            MaskType::Replace => Ok(self.rule.value.clone()),
            MaskType::Algo => self.mask_algo(input, engine),
        }
    }

    /// CHAR masking over bytes. Scanning starts `offset` in from one end
    /// and stops `padding` short of the other; at most `length` positions
    /// are visited (0 = no limit), and the counter advances on ignored
    /// positions too. `reverse` flips the scan direction.
    fn mask_char(&self, input: &str) -> String {
        let mask = self.rule.value.bytes().next().unwrap_or(b'*');
        let mut out = input.as_bytes().to_vec();
        let sz = out.len();
        let length = self.rule.length as usize;
        let ignored = |b: u8| self.ignore_set.bytes().any(|c| c == b);
        let mut visited = 0usize;
        if !self.rule.reverse {
            let start = (self.rule.offset as usize).min(sz);
            let end = if self.rule.padding >= 0 {
                sz.saturating_sub(self.rule.padding as usize)
            } else {
                sz
            };
            for slot in out.iter_mut().take(end).skip(start) {
                if length > 0 && visited >= length {
                    break;
                }
                if !ignored(*slot) {
                    *slot = mask;
                }
                visited += 1;
            }
        } else {
            let start = if self.rule.padding >= 0 {
                self.rule.padding as usize
            } else {
                0
            };
            let mut i = sz as i64 - 1 - i64::from(self.rule.offset);
            while i >= start as i64 {
                if length > 0 && visited >= length {
                    break;
                }
                let slot = &mut out[i as usize];
                if !ignored(*slot) {
                    *slot = mask;
                }
                visited += 1;
                i -= 1;
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// TAG masking from a bare string: detect to find the info type first.
    fn mask_str_tag(&self, input: &str, engine: &Engine) -> String {
        let results = engine.detect_impl(input);
        match results.first() {
            Some(res) if !res.info_type.is_empty() => tag_of(&res.info_type),
            _ => tag_of(UNKNOWN_TAG),
        }
    }

    fn mask_algo(&self, input: &str, engine: &Engine) -> Result<String> {
        match self.rule.value.as_str() {
            "BASE64" => Ok(STANDARD.encode(input.as_bytes())),
            "MD5" => Ok(hex_lower(&Md5::digest(input.as_bytes()))),
            "CRC32" => Ok(format!("{:08x}", crc32fast::hash(input.as_bytes()))),
            "NUMBER" => Ok(address::mask_digits(input)),
            "ADDRESS" => Ok(address::mask_address(input)),
            "DEIDENTIFY" => Ok(engine.deidentify_impl(input)?.0),
            other => Err(DlpError::MaskNotSupported {
                rule: self.rule.rule_name.clone(),
                detail: format!("ALGO {other}"),
            }),
        }
    }
}

fn tag_of(info_type: &str) -> String {
    format!("<{info_type}>")
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
