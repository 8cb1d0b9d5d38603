//! Per-rule detector: regex + dictionary detection, filtering, verification

use crate::config::{FilterAlgo, RuleSpec, VerifyAlgo};
use crate::result::{DetectResult, KvItem, ResultType};
use crate::verify;
use aho_corasick::AhoCorasick;
use memchr::memmem;
use regex::bytes::Regex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Bytes considered already-masked by the MASKED filter algorithm.
const MASKED_CHARS: [char; 2] = ['*', '#'];
/// Context window radius in bytes around a hit.
const CONTEXT_RANGE: usize = 32;

/// Whether a rule keys off the surrounding key or just the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Value,
    Kv,
}

/// One detector per configured rule. Immutable after construction.
pub struct Detector {
    rule: RuleSpec,
    rule_type: RuleType,
    key_regexes: Vec<Regex>,
    key_dict: HashSet<String>,
    value_regexes: Vec<Regex>,
    value_dict: Vec<String>,
    value_automaton: Option<AhoCorasick>,
    black_regexes: Vec<Regex>,
    context_regexes: Vec<Regex>,
    context_dict: Vec<String>,
}

impl Detector {
    /// Build a detector from its rule. Invalid regexes are logged and
    /// dropped; the detector stays usable with the remaining conditions.
    pub fn new(rule: RuleSpec) -> Self {
        let key_regexes = compile_list(rule.rule_id, &rule.detect.k_reg);
        let key_dict: HashSet<String> =
            rule.detect.k_dict.iter().map(|s| s.to_lowercase()).collect();
        let value_regexes = compile_list(rule.rule_id, &rule.detect.v_reg);
        let value_dict: Vec<String> = rule
            .detect
            .v_dict
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        let value_automaton = if value_dict.is_empty() {
            None
        } else {
            match AhoCorasick::new(&value_dict) {
                Ok(ac) => Some(ac),
                Err(err) => {
                    warn!(rule_id = rule.rule_id, %err, "value dictionary rejected");
                    None
                }
            }
        };
        let black_regexes = compile_list(rule.rule_id, &rule.filter.b_reg);
        let context_regexes = compile_list(rule.rule_id, &rule.verify.c_reg);
        let context_dict: Vec<String> = rule
            .verify
            .c_dict
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        let rule_type = if key_dict.is_empty() && key_regexes.is_empty() {
            RuleType::Value
        } else {
            RuleType::Kv
        };
        Self {
            rule,
            rule_type,
            key_regexes,
            key_dict,
            value_regexes,
            value_dict,
            value_automaton,
            black_regexes,
            context_regexes,
            context_dict,
        }
    }

    pub fn rule_id(&self) -> i32 {
        self.rule.rule_id
    }

    pub fn mask_rule_name(&self) -> &str {
        &self.rule.mask
    }

    pub fn is_value(&self) -> bool {
        self.rule_type == RuleType::Value
    }

    pub fn is_kv(&self) -> bool {
        self.rule_type == RuleType::Kv
    }

    /// Whether any detect condition needs a regex engine. Used by the
    /// log-only rule subsetting.
    pub fn uses_regex(&self) -> bool {
        !self.key_regexes.is_empty() || !self.value_regexes.is_empty()
    }

    /// Scan a byte buffer with the value-side conditions: every regex match
    /// plus every non-overlapping dictionary occurrence, filtered and
    /// verified. Offsets are local to `input`.
    pub fn detect_bytes(&self, input: &[u8]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for re in &self.value_regexes {
            for m in re.find_iter(input) {
                results.push(self.value_result(input, m.start(), m.end()));
            }
        }
        if let Some(ac) = &self.value_automaton {
            // each term advances past its own matches, different terms may
            // still produce overlapping hits
            let mut next_start = vec![0usize; self.value_dict.len()];
            for m in ac.find_overlapping_iter(input) {
                let pattern = m.pattern().as_usize();
                if m.start() >= next_start[pattern] {
                    next_start[pattern] = m.end();
                    results.push(self.value_result(input, m.start(), m.end()));
                }
            }
        }
        let results = self.filter(results);
        self.verify(input, results)
    }

    /// Scan a key/value map. Offsets in the returned results are local to
    /// each entry's value.
    pub fn detect_map(&self, input: &HashMap<String, String>) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for (key, value) in input {
            let item = KvItem {
                key: key.clone(),
                value: value.clone(),
                start: 0,
                end: 0,
            };
            self.detect_kv(&item, &mut results);
        }
        results
    }

    /// Scan extracted key/value items; result offsets are shifted by each
    /// item's start position.
    pub fn detect_list(&self, items: &[KvItem]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for item in items {
            self.detect_kv(item, &mut results);
        }
        results
    }

    fn detect_kv(&self, item: &KvItem, results: &mut Vec<DetectResult>) {
        let (last_key, extracted) = last_key_of(&item.key);
        if self.is_kv() {
            let mut hit = self.key_dict.contains(&last_key.to_lowercase());
            if !hit && extracted {
                hit = self.key_dict.contains(&item.key.to_lowercase());
            }
            if !hit {
                hit = self
                    .key_regexes
                    .iter()
                    .any(|re| re.is_match(last_key.as_bytes()));
            }
            if !hit {
                return;
            }
            if self.value_regexes.is_empty() && self.value_dict.is_empty() {
                // key-only rule: the whole value is the hit
                let mut res = self.new_result();
                res.text = item.value.clone();
                res.result_type = ResultType::Kv;
                res.key = item.key.clone();
                res.byte_start = item.start;
                res.byte_end = item.start + item.value.len();
                results.push(res);
            } else {
                for mut res in self.detect_bytes(item.value.as_bytes()) {
                    res.result_type = ResultType::Kv;
                    res.key = item.key.clone();
                    res.byte_start += item.start;
                    res.byte_end += item.start;
                    results.push(res);
                }
            }
        } else {
            for mut res in self.detect_bytes(item.value.as_bytes()) {
                res.result_type = ResultType::Value;
                res.key = item.key.clone();
                res.byte_start += item.start;
                res.byte_end += item.start;
                results.push(res);
            }
        }
    }

    fn value_result(&self, input: &[u8], start: usize, end: usize) -> DetectResult {
        let mut res = self.new_result();
        res.text = String::from_utf8_lossy(&input[start..end]).into_owned();
        res.result_type = ResultType::Value;
        res.byte_start = start;
        res.byte_end = end;
        res
    }

    fn new_result(&self) -> DetectResult {
        DetectResult {
            rule_id: self.rule.rule_id,
            text: String::new(),
            mask_text: String::new(),
            result_type: ResultType::Value,
            key: String::new(),
            byte_start: 0,
            byte_end: 0,
            info_type: self.rule.info_type.clone(),
            en_name: self.rule.en_name.clone(),
            cn_name: self.rule.cn_name.clone(),
            group_name: self.rule.group_name.clone(),
            level: self.rule.level.clone(),
            ext_info: self.rule.ext_info.clone(),
        }
    }

    /// Drop results hit by the blacklist dictionary, regexes or algorithms.
    fn filter(&self, results: Vec<DetectResult>) -> Vec<DetectResult> {
        results
            .into_iter()
            .filter(|res| {
                if self.rule.filter.b_dict.iter().any(|w| *w == res.text) {
                    return false;
                }
                if self
                    .black_regexes
                    .iter()
                    .any(|re| re.is_match(res.text.as_bytes()))
                {
                    return false;
                }
                if self.rule.filter.b_algo.contains(&FilterAlgo::Masked)
                    && res.text.contains(MASKED_CHARS)
                {
                    return false;
                }
                true
            })
            .collect()
    }

    /// Keep results that pass the context gate and every verify algorithm.
    fn verify(&self, input: &[u8], results: Vec<DetectResult>) -> Vec<DetectResult> {
        let need_context = !self.context_dict.is_empty() || !self.context_regexes.is_empty();
        results
            .into_iter()
            .filter(|res| {
                if need_context && !self.verify_by_context(input, res) {
                    return false;
                }
                self.rule.verify.v_algo.iter().all(|algo| match algo {
                    VerifyAlgo::Idcard => verify::verify_id_card(&res.text),
                    VerifyAlgo::Abarouting => verify::verify_aba_routing(&res.text),
                    VerifyAlgo::Creditcard => verify::verify_credit_card(&res.text),
                    VerifyAlgo::Bitcoin => verify::verify_bitcoin(&res.text),
                    VerifyAlgo::Domain => verify::verify_domain(&res.text),
                })
            })
            .collect()
    }

    /// A hit passes when some context dictionary term occurs as a whole
    /// word in the ±32 byte window around it, or a context regex matches
    /// the window.
    fn verify_by_context(&self, input: &[u8], res: &DetectResult) -> bool {
        let start = res.byte_start.saturating_sub(CONTEXT_RANGE);
        let end = (res.byte_end + CONTEXT_RANGE).min(input.len());
        let mut window = input[start..end].to_vec();
        // ASCII-only lowering keeps byte widths stable inside the window
        window.make_ascii_lowercase();
        for word in &self.context_dict {
            let needle = word.as_bytes();
            for pos in memmem::find_iter(&window, needle) {
                if is_whole_word(&window, pos, needle.len()) {
                    return true;
                }
            }
        }
        self.context_regexes.iter().any(|re| re.is_match(&window))
    }
}

fn compile_list(rule_id: i32, patterns: &[String]) -> Vec<Regex> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(re) => compiled.push(re),
            Err(err) => warn!(rule_id, %pattern, %err, "invalid regex dropped"),
        }
    }
    compiled
}

/// The path suffix after the last `/`, or the segment before the trailing
/// `[...]` index. The bool reports whether anything was stripped.
fn last_key_of(path: &str) -> (&str, bool) {
    if path.ends_with(']') {
        let open = path.rfind('[').unwrap_or(path.len());
        let slash = path.rfind('/').map_or(0, |p| p + 1);
        return (&path[slash..open], true);
    }
    match path.rfind('/') {
        Some(pos) => (&path[pos + 1..], true),
        None => (path, false),
    }
}

/// Neighbour classification for the whole-word check.
enum Neighbour {
    /// Window boundary, no byte on this side
    None,
    /// A single-byte character
    Ascii(u8),
    /// A multi-byte (or undecodable) character
    Wide,
}

fn left_neighbour(window: &[u8], pos: usize) -> Neighbour {
    let head = &window[..pos];
    let Some(&last) = head.last() else {
        return Neighbour::None;
    };
    if last.is_ascii() {
        return Neighbour::Ascii(last);
    }
    Neighbour::Wide
}

fn right_neighbour(window: &[u8], pos: usize) -> Neighbour {
    let Some(&first) = window.get(pos) else {
        return Neighbour::None;
    };
    if first.is_ascii() {
        return Neighbour::Ascii(first);
    }
    Neighbour::Wide
}

/// A dictionary term counts as a whole word when neither neighbouring
/// character is an ASCII letter. A multi-byte neighbour (for example a CJK
/// character) always passes: the boundary between scripts is a valid word
/// boundary.
fn is_whole_word(window: &[u8], pos: usize, len: usize) -> bool {
    let letter = |b: u8| b.is_ascii_alphabetic();
    match (left_neighbour(window, pos), right_neighbour(window, pos + len)) {
        (Neighbour::Wide, _) | (_, Neighbour::Wide) => true,
        (Neighbour::None, Neighbour::None) => true,
        (Neighbour::None, Neighbour::Ascii(r)) => !letter(r),
        (Neighbour::Ascii(l), Neighbour::None) => !letter(l),
        (Neighbour::Ascii(l), Neighbour::Ascii(r)) => !letter(l) && !letter(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectSpec, FilterSpec, VerifySpec};

    fn rule(id: i32, detect: DetectSpec) -> RuleSpec {
        RuleSpec {
            rule_id: id,
            info_type: "TEST".into(),
            detect,
            ..Default::default()
        }
    }

    fn value_rule(id: i32, v_reg: &[&str], v_dict: &[&str]) -> RuleSpec {
        rule(
            id,
            DetectSpec {
                v_reg: v_reg.iter().map(|s| s.to_string()).collect(),
                v_dict: v_dict.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_regex_detection_offsets() {
        let det = Detector::new(value_rule(1, &[r"\b1[3-9]\d{9}\b"], &[]));
        let input = b"phone 18612341234 end";
        let results = det.detect_bytes(input);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "18612341234");
        assert_eq!(results[0].byte_start, 6);
        assert_eq!(results[0].byte_end, 17);
        assert_eq!(results[0].result_type, ResultType::Value);
    }

    #[test]
    fn test_dictionary_detection_all_occurrences() {
        let det = Detector::new(value_rule(1, &[], &["secret"]));
        let results = det.detect_bytes(b"secret and secret again");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].byte_start, 0);
        assert_eq!(results[1].byte_start, 11);
    }

    #[test]
    fn test_dictionary_self_overlap_advances() {
        let det = Detector::new(value_rule(1, &[], &["aa"]));
        let results = det.detect_bytes(b"aaaa");
        // each term advances past its own match
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].byte_start, 0);
        assert_eq!(results[1].byte_start, 2);
    }

    #[test]
    fn test_invalid_regex_dropped_detector_still_works() {
        let det = Detector::new(value_rule(1, &["([bad", "good"], &[]));
        let results = det.detect_bytes(b"good");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_black_dict_filter() {
        let mut spec = value_rule(1, &[r"\d{5}"], &[]);
        spec.filter = FilterSpec {
            b_dict: vec!["12345".into()],
            ..Default::default()
        };
        let det = Detector::new(spec);
        assert!(det.detect_bytes(b"12345").is_empty());
        assert_eq!(det.detect_bytes(b"54321").len(), 1);
    }

    #[test]
    fn test_masked_chars_filter() {
        let mut spec = value_rule(1, &[r"[\d*]{11}"], &[]);
        spec.filter = FilterSpec {
            b_algo: vec![FilterAlgo::Masked],
            ..Default::default()
        };
        let det = Detector::new(spec);
        assert!(det.detect_bytes(b"186*****234").is_empty());
        assert_eq!(det.detect_bytes(b"18612341234").len(), 1);
    }

    #[test]
    fn test_context_dictionary_whole_word() {
        let mut spec = value_rule(1, &[r"\b\d{9}\b"], &[]);
        spec.verify = VerifySpec {
            c_dict: vec!["routing".into()],
            ..Default::default()
        };
        let det = Detector::new(spec);
        assert_eq!(det.detect_bytes(b"Routing 123456789").len(), 1);
        // "routings" fails the whole-word check, "rerouting" too
        assert!(det.detect_bytes(b"routings 123456789").is_empty());
        assert!(det.detect_bytes(b"rerouting 123456789").is_empty());
        // a CJK neighbour is a valid boundary
        assert_eq!(
            det.detect_bytes("路由routing码 123456789".as_bytes()).len(),
            1
        );
        // out of the 32-byte window
        let far = format!("routing {}123456789", " ".repeat(40));
        assert!(det.detect_bytes(far.as_bytes()).is_empty());
    }

    #[test]
    fn test_context_regex() {
        let mut spec = value_rule(1, &[r"\b\d{9}\b"], &[]);
        spec.verify = VerifySpec {
            c_reg: vec![r"acct\s*no".into()],
            ..Default::default()
        };
        let det = Detector::new(spec);
        assert_eq!(det.detect_bytes(b"Acct No: 123456789").len(), 1);
        assert!(det.detect_bytes(b"id: 123456789").is_empty());
    }

    #[test]
    fn test_verify_algo_gate() {
        let mut spec = value_rule(1, &[r"\d{18}"], &[]);
        spec.verify = VerifySpec {
            v_algo: vec![VerifyAlgo::Idcard],
            ..Default::default()
        };
        let det = Detector::new(spec);
        assert_eq!(det.detect_bytes(b"110225196403026127").len(), 1);
        assert!(det.detect_bytes(b"110225196403026128").is_empty());
    }

    #[test]
    fn test_kv_key_dict_whole_value() {
        let spec = rule(
            2,
            DetectSpec {
                k_dict: vec!["Phone".into()],
                ..Default::default()
            },
        );
        let det = Detector::new(spec);
        assert!(det.is_kv());
        let mut map = HashMap::new();
        map.insert("phone".to_string(), "18612341234".to_string());
        map.insert("other".to_string(), "18612341234".to_string());
        let results = det.detect_map(&map);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "phone");
        assert_eq!(results[0].text, "18612341234");
        assert_eq!(results[0].result_type, ResultType::Kv);
        assert_eq!(results[0].byte_end, 11);
    }

    #[test]
    fn test_kv_key_with_value_rule() {
        let spec = rule(
            2,
            DetectSpec {
                k_dict: vec!["remark".into()],
                v_reg: vec![r"\b1[3-9]\d{9}\b".into()],
                ..Default::default()
            },
        );
        let det = Detector::new(spec);
        let mut map = HashMap::new();
        map.insert("remark".to_string(), "call 18612341234 now".to_string());
        let results = det.detect_map(&map);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "18612341234");
        assert_eq!(results[0].byte_start, 5);
        // no hit when only the value matches but the key does not
        let mut map = HashMap::new();
        map.insert("note".to_string(), "call 18612341234 now".to_string());
        assert!(det.detect_map(&map).is_empty());
    }

    #[test]
    fn test_kv_json_path_last_key() {
        let spec = rule(
            2,
            DetectSpec {
                k_dict: vec!["uid".into()],
                ..Default::default()
            },
        );
        let det = Detector::new(spec);
        let items = [KvItem {
            key: "/obj/uid[2]".into(),
            value: "10086".into(),
            start: 40,
            end: 45,
        }];
        let results = det.detect_list(&items);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].byte_start, 40);
        assert_eq!(results[0].byte_end, 45);
        assert_eq!(results[0].key, "/obj/uid[2]");
    }

    #[test]
    fn test_last_key_extraction() {
        assert_eq!(last_key_of("/a/b/c"), ("c", true));
        assert_eq!(last_key_of("plain"), ("plain", false));
        assert_eq!(last_key_of("/list[3]"), ("list", true));
        assert_eq!(last_key_of("top[0]"), ("top", true));
    }

    #[test]
    fn test_value_rule_copies_key() {
        let det = Detector::new(value_rule(1, &[r"\d{5}"], &[]));
        let items = [KvItem {
            key: "k1".into(),
            value: "10086".into(),
            start: 3,
            end: 8,
        }];
        let results = det.detect_list(&items);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_type, ResultType::Value);
        assert_eq!(results[0].key, "k1");
        assert_eq!(results[0].byte_start, 3);
    }
}
