//! JSON walker: flatten a document into path-keyed pairs, scan them, and
//! rebuild the tree with masked leaves. Numeric leaves keep their original
//! textual form, so large integers survive the round trip.

use crate::engine::Engine;
use crate::error::Result;
use crate::result::DetectResult;
use serde_json::Value;
use std::collections::HashMap;

impl Engine {
    /// Detect sensitive information in a JSON document. Result keys are
    /// lowercased slash paths such as `/user/phone` or `/list[2]`.
    pub fn detect_json(&self, json: &str) -> Result<Vec<DetectResult>> {
        self.ensure_scan_api()?;
        self.check_input_len(json)?;
        let (results, _) = self.detect_json_impl(json)?;
        Ok(results)
    }

    /// Detect, then re-serialise the document with every sensitive leaf
    /// replaced by its masked form.
    pub fn deidentify_json(&self, json: &str) -> Result<(String, Vec<DetectResult>)> {
        self.ensure_scan_api()?;
        self.check_input_len(json)?;
        let (results, kv_map) = self.detect_json_impl(json)?;
        let out = self.rebuild_json(json, &kv_map, &results)?;
        Ok((out, results))
    }

    /// Rebuild a masked document from a caller-supplied result list, for
    /// example one filtered between detect and mask. Results are spliced
    /// against the original leaf values, so partial-value hits rewrite in
    /// place.
    pub fn deidentify_json_by_result(
        &self,
        json: &str,
        results: &[DetectResult],
    ) -> Result<String> {
        self.ensure_scan_api()?;
        self.check_input_len(json)?;
        let mut tree: Value = serde_json::from_str(json)?;
        let mut kv_map = HashMap::new();
        walk_json("", &mut tree, &mut kv_map, false);
        let mut sorted: Vec<&DetectResult> = results.iter().collect();
        sorted.sort_by(|a, b| {
            (a.key.as_str(), a.byte_start, a.byte_end).cmp(&(
                b.key.as_str(),
                b.byte_start,
                b.byte_end,
            ))
        });
        let mut replacements = HashMap::new();
        let mut i = 0;
        while i < sorted.len() {
            let key = &sorted[i].key;
            let run = sorted[i..]
                .iter()
                .position(|r| r.key != *key)
                .map_or(sorted.len(), |p| i + p);
            if let Some(orig) = kv_map.get(key.as_str()) {
                let group: Vec<DetectResult> =
                    sorted[i..run].iter().map(|r| (*r).clone()).collect();
                replacements.insert(key.clone(), self.splice_results(orig, &group)?);
            }
            i = run;
        }
        walk_json("", &mut tree, &mut replacements, true);
        Ok(serde_json::to_string(&tree)?)
    }

    /// Walk the document in detect phase and scan the collected pairs.
    pub(crate) fn detect_json_impl(
        &self,
        json: &str,
    ) -> Result<(Vec<DetectResult>, HashMap<String, String>)> {
        let mut tree: Value = serde_json::from_str(json)?;
        let mut kv_map = HashMap::new();
        walk_json("", &mut tree, &mut kv_map, false);
        let results = self.detect_map_impl(&kv_map);
        Ok((results, kv_map))
    }

    fn rebuild_json(
        &self,
        json: &str,
        kv_map: &HashMap<String, String>,
        results: &[DetectResult],
    ) -> Result<String> {
        let mut replacements = HashMap::new();
        let mut i = 0;
        while i < results.len() {
            let key = &results[i].key;
            let run = results[i..]
                .iter()
                .position(|r| r.key != *key)
                .map_or(results.len(), |p| i + p);
            if let Some(orig) = kv_map.get(key.as_str()) {
                replacements.insert(key.clone(), self.splice_results(orig, &results[i..run])?);
            }
            i = run;
        }
        let mut tree: Value = serde_json::from_str(json)?;
        walk_json("", &mut tree, &mut replacements, true);
        Ok(serde_json::to_string(&tree)?)
    }
}

/// Does this string plausibly hold a nested JSON document?
fn maybe_json(text: &str) -> bool {
    (text.contains('{') && text.contains('}')) || (text.contains('[') && text.contains(']'))
}

/// Recursive walk shared by detect and mask phases.
///
/// Detect phase (`mask == false`) records every leaf's textual form under
/// its lowercased path. Mask phase substitutes `kv_map[path]` where
/// present; scalar leaves become strings, which is how a masked number is
/// represented.
pub(crate) fn walk_json(
    path: &str,
    node: &mut Value,
    kv_map: &mut HashMap<String, String>,
    mask: bool,
) {
    match node {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                let sub = format!("{path}/{key}").to_lowercase();
                walk_json(&sub, value, kv_map, mask);
            }
        }
        Value::Array(items) => {
            for (i, value) in items.iter_mut().enumerate() {
                let sub = if path.is_empty() {
                    format!("/[{i}]")
                } else {
                    format!("{path}[{i}]")
                };
                walk_json(&sub, value, kv_map, mask);
            }
        }
        Value::String(text) => {
            if maybe_json(text) {
                if let Ok(mut sub) = serde_json::from_str::<Value>(text) {
                    walk_json(path, &mut sub, kv_map, mask);
                    if mask {
                        if let Ok(encoded) = serde_json::to_string(&sub) {
                            *text = encoded;
                        }
                    }
                    return;
                }
            }
            if mask {
                if let Some(replacement) = kv_map.get(path) {
                    *text = replacement.clone();
                }
            } else {
                kv_map.insert(path.to_string(), text.clone());
            }
        }
        scalar => {
            let textual = match scalar {
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    if path.is_empty() {
                        return;
                    }
                    "null".to_string()
                }
            };
            if mask {
                if let Some(replacement) = kv_map.get(path) {
                    *scalar = Value::String(replacement.clone());
                }
            } else {
                kv_map.insert(path.to_string(), textual);
            }
        }
    }
}
