//! Line-oriented scan pipeline: pre-processing, implicit KV extraction,
//! result merging and mask application

use crate::detector::Detector;
use crate::engine::Engine;
use crate::error::{DlpError, Result};
use crate::result::{DetectResult, KvItem, ResultType};
use std::collections::HashMap;

/// Token separators for the implicit key/value extractor.
const CUTTER: &[u8] = b" /\r\n\\[](){}:=\"',";

impl Engine {
    /// Scan a string line by line. Offsets in the returned results are
    /// global byte positions into `input`, and `mask_text` is filled.
    pub(crate) fn detect_impl(&self, input: &str) -> Vec<DetectResult> {
        let mut results = Vec::new();
        let mut pos = 0usize;
        for line in input.as_bytes().split_inclusive(|&b| b == b'\n') {
            let mut buf = line.to_vec();
            preprocess_line(&mut buf);
            let mut line_results = self.detect_line(&buf);
            for res in &mut line_results {
                res.byte_start += pos;
                res.byte_end += pos;
            }
            self.mask_results(&mut line_results);
            results.extend(line_results);
            pos += line.len();
        }
        results
    }

    /// Detect, then splice the masked forms over the original input.
    pub(crate) fn deidentify_impl(&self, input: &str) -> Result<(String, Vec<DetectResult>)> {
        let results = self.detect_impl(input);
        let out = self.splice_results(input, &results)?;
        Ok((out, results))
    }

    /// Run every enabled detector over the map entries. Results from
    /// different keys live in unrelated coordinate spaces, so merging is
    /// done per key.
    pub(crate) fn detect_map_impl(&self, input: &HashMap<String, String>) -> Vec<DetectResult> {
        let mut all = Vec::new();
        for det in self.enabled_detectors() {
            all.extend(det.detect_map(input));
        }
        let mut merged = merge_results(all, true);
        self.mask_results(&mut merged);
        merged
    }

    pub(crate) fn deidentify_map_impl(
        &self,
        input: &HashMap<String, String>,
    ) -> Result<(HashMap<String, String>, Vec<DetectResult>)> {
        let results = self.detect_map_impl(input);
        let mut out = input.clone();
        let mut i = 0;
        while i < results.len() {
            let key = &results[i].key;
            let run = results[i..]
                .iter()
                .position(|r| r.key != *key)
                .map_or(results.len(), |p| i + p);
            if let Some(orig) = input.get(key) {
                let masked = self.splice_results(orig, &results[i..run])?;
                out.insert(key.clone(), masked);
            }
            i = run;
        }
        Ok((out, results))
    }

    /// Splice `mask_text` over each result's byte span, in order.
    pub(crate) fn splice_results(&self, input: &str, results: &[DetectResult]) -> Result<String> {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() + 8);
        let mut pos = 0usize;
        for res in results {
            if res.byte_start > res.byte_end || res.byte_end > bytes.len() {
                return Err(DlpError::PositionError);
            }
            if pos < res.byte_start {
                out.extend_from_slice(&bytes[pos..res.byte_start]);
            }
            out.extend_from_slice(res.mask_text.as_bytes());
            pos = pos.max(res.byte_end);
        }
        if pos < bytes.len() {
            out.extend_from_slice(&bytes[pos..]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Fill every result's `mask_text` from its rule's masker; a missing
    /// mask rule falls back to the identity form.
    pub(crate) fn mask_results(&self, results: &mut [DetectResult]) {
        for res in results.iter_mut() {
            let masker = self
                .detectors
                .get(&res.rule_id)
                .and_then(|slot| slot.as_ref())
                .and_then(|det| self.maskers.get(det.mask_rule_name()));
            match masker {
                // on failure mask_result already fell back to identity
                Some(masker) => {
                    let _ = masker.mask_result(res, self);
                }
                None => res.mask_text = res.text.clone(),
            }
        }
    }

    fn detect_line(&self, line: &[u8]) -> Vec<DetectResult> {
        let mut all = Vec::new();
        for det in self.enabled_detectors() {
            if det.is_value() && !self.skip_for_log(det) {
                all.extend(det.detect_bytes(line));
            }
        }
        let items = extract_kv_list(line);
        if !items.is_empty() {
            for det in self.enabled_detectors() {
                if det.is_kv() && !self.skip_for_log(det) {
                    let mut kv_results = det.detect_list(&items);
                    for res in &mut kv_results {
                        // the KV token sits inside a flat string, so the
                        // result positions address the line itself
                        res.result_type = ResultType::Value;
                    }
                    all.extend(kv_results);
                }
            }
        }
        merge_results(all, false)
    }

    fn enabled_detectors(&self) -> impl Iterator<Item = &Detector> {
        self.detectors.values().filter_map(|slot| slot.as_ref())
    }

    /// Log-only mode caps regex cost: high-id regex rules are skipped.
    fn skip_for_log(&self, det: &Detector) -> bool {
        self.is_log_only() && det.rule_id() > self.max_regex_rule_id && det.uses_regex()
    }
}

/// Width-preserving pre-processing applied to each line copy before
/// detection. Byte positions stay valid indices into the original buffer.
pub(crate) fn preprocess_line(line: &mut [u8]) {
    unquote_escape(line);
    replace_wide_char(line);
}

/// Rewrite `\x` escape pairs in place: the backslash becomes a space and
/// the second byte becomes the decoded character (a space for unknown
/// escapes). Two bytes in, two bytes out.
fn unquote_escape(line: &mut [u8]) {
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'\\' && i + 1 < line.len() {
            line[i] = b' ';
            line[i + 1] = match line[i + 1] {
                b'a' => 0x07,
                b'b' => 0x08,
                b'f' => 0x0C,
                b'n' => b'\n',
                b'r' => b'\r',
                b't' => b'\t',
                b'v' => 0x0B,
                b'\\' => b'\\',
                b'"' => b'"',
                b'\'' => b'\'',
                _ => b' ',
            };
            i += 2;
        } else {
            i += 1;
        }
    }
}

/// Map full-width CJK punctuation to three-byte ASCII runs of the same
/// width. `：` becomes `"  :"` so that `:=` detection keeps working.
fn replace_wide_char(line: &mut [u8]) {
    let mut i = 0;
    while i < line.len() {
        if line[i].is_ascii() {
            i += 1;
            continue;
        }
        let Some((ch, width)) = decode_char(&line[i..]) else {
            break;
        };
        if width == 3 {
            let rep: Option<&[u8; 3]> = match ch {
                '【' => Some(b"  ["),
                '】' => Some(b"]  "),
                '：' => Some(b"  :"),
                '「' => Some(b"  {"),
                '」' => Some(b"}  "),
                '（' => Some(b"  ("),
                '）' => Some(b")  "),
                '《' => Some(b"  <"),
                '》' => Some(b">  "),
                '。' => Some(b".  "),
                '？' => Some(b"?  "),
                '！' => Some(b"!  "),
                '，' => Some(b",  "),
                '、' => Some(b",  "),
                '；' => Some(b";  "),
                _ => None,
            };
            if let Some(rep) = rep {
                line[i..i + 3].copy_from_slice(rep);
            }
        }
        i += width;
    }
}

/// Walk the line and build a KV item for every `key:value` / `key=value`
/// shape, recognising `:=` and `==` as one operator. Keys are lowercased;
/// the recorded span covers the value.
pub(crate) fn extract_kv_list(line: &[u8]) -> Vec<KvItem> {
    let mut items = Vec::new();
    let mut i = 0;
    while i < line.len() {
        let Some((ch, width)) = decode_char(&line[i..]) else {
            break;
        };
        if i + 1 < line.len() && (ch == ':' || ch == '=' || ch == '：') {
            let mut value_offset = i + width;
            if let Some(('=', next_width)) = decode_char(&line[value_offset..]) {
                value_offset += next_width;
            }
            let key = last_token(line, i);
            let (value, start, end) = first_token(line, value_offset);
            if !key.is_empty() && !value.is_empty() {
                items.push(KvItem {
                    key: key.to_lowercase(),
                    value,
                    start,
                    end,
                });
            }
        }
        i += width;
    }
    items
}

/// Decode the first character of `bytes`. Invalid sequences decode to the
/// replacement character with width one, like the original rune decoder.
fn decode_char(bytes: &[u8]) -> Option<(char, usize)> {
    let first = *bytes.first()?;
    if first.is_ascii() {
        return Some((first as char, 1));
    }
    for width in 2..=4usize.min(bytes.len()) {
        if let Ok(s) = std::str::from_utf8(&bytes[..width]) {
            if let Some(c) = s.chars().next() {
                return Some((c, width));
            }
        }
    }
    Some(('\u{FFFD}', 1))
}

fn is_cutter(b: u8) -> bool {
    CUTTER.contains(&b)
}

/// The token ending just before `offset`.
fn last_token(line: &[u8], offset: usize) -> String {
    if offset == 0 || offset > line.len() {
        return String::new();
    }
    let mut end = offset;
    for i in (0..offset).rev() {
        if !is_cutter(line[i]) {
            end = i + 1;
            break;
        }
    }
    let mut start = 0;
    for i in (0..end).rev() {
        if is_cutter(line[i]) {
            start = i + 1;
            break;
        }
    }
    String::from_utf8_lossy(&line[start..end]).into_owned()
}

/// The first token at or after `offset`, with its byte span.
fn first_token(line: &[u8], offset: usize) -> (String, usize, usize) {
    let sz = line.len();
    if offset >= sz {
        return (String::new(), 0, 0);
    }
    let mut start = offset;
    for i in offset..sz {
        if !is_cutter(line[i]) {
            start = i;
            break;
        }
    }
    let mut end = sz;
    for i in (start + 1)..sz {
        if is_cutter(line[i]) {
            end = i;
            break;
        }
    }
    (
        String::from_utf8_lossy(&line[start..end]).into_owned(),
        start,
        end,
    )
}

/// Merge overlapping results under the dominance rule: identical ranges
/// keep the entry with the higher rule id, a strictly contained result is
/// dropped, plain overlaps survive. With `per_key`, only results under the
/// same key are compared.
pub(crate) fn merge_results(mut results: Vec<DetectResult>, per_key: bool) -> Vec<DetectResult> {
    if results.len() <= 1 {
        return results;
    }
    if per_key {
        results.sort_by(|a, b| {
            (a.key.as_str(), a.byte_start, a.byte_end, a.rule_id).cmp(&(
                b.key.as_str(),
                b.byte_start,
                b.byte_end,
                b.rule_id,
            ))
        });
    } else {
        results.sort_by(|a, b| {
            (a.byte_start, a.byte_end, a.rule_id).cmp(&(b.byte_start, b.byte_end, b.rule_id))
        });
    }
    let len = results.len();
    let mut keep = vec![true; len];
    for i in 0..len {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..len {
            if !keep[j] {
                continue;
            }
            if per_key && results[i].key != results[j].key {
                break;
            }
            let (a, b) = (&results[i], &results[j]);
            if a.byte_start == b.byte_start && a.byte_end == b.byte_end {
                keep[i] = false;
                break;
            }
            if a.byte_start <= b.byte_start && b.byte_end <= a.byte_end {
                keep[j] = false;
            } else if b.byte_start <= a.byte_start && a.byte_end <= b.byte_end {
                keep[i] = false;
            }
        }
    }
    let mut idx = 0;
    results.retain(|_| {
        let kept = keep[idx];
        idx += 1;
        kept
    });
    results
}
