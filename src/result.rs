//! Detection result types shared across the engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a detect result.
///
/// `Value` results come from scanning free text; `Kv` results come from
/// scanning a map entry or a JSON leaf, where `key` names the source slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    Value,
    Kv,
}

/// One sensitive-information hit.
///
/// For `Value` results, `text` equals the scanned buffer sliced at
/// `[byte_start, byte_end)`. For `Kv` results the offsets index into the
/// value stored under `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResult {
    pub rule_id: i32,
    pub text: String,
    pub mask_text: String,
    pub result_type: ResultType,
    pub key: String,
    pub byte_start: usize,
    pub byte_end: usize,
    // denormalized from the rule that produced the hit
    pub info_type: String,
    pub en_name: String,
    pub cn_name: String,
    pub group_name: String,
    pub level: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ext_info: HashMap<String, String>,
}

impl DetectResult {
    pub fn is_value(&self) -> bool {
        self.result_type == ResultType::Value
    }

    pub fn is_kv(&self) -> bool {
        self.result_type == ResultType::Kv
    }
}

/// A key/value pair with the value's byte position in the enclosing buffer.
///
/// Produced by the implicit KV extractor in the line scanner and consumed
/// by the detectors' KV entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvItem {
    pub key: String,
    pub value: String,
    pub start: usize,
    pub end: usize,
}
