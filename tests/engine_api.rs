//! End-to-end tests over the public engine surface with the default catalog.

use dlp_engine::{DlpError, Engine, FieldWalker, MaskStruct, ResultType};
use std::collections::HashMap;

fn configured() -> Engine {
    let mut engine = Engine::new("it.test");
    engine.apply_config_default().unwrap();
    engine
}

#[test]
fn deidentify_text_masks_every_hit() {
    let engine = configured();
    let input = "phone 18612341234 and mail abcd@abcd.com";
    let (out, results) = engine.deidentify(input).unwrap();
    assert_eq!(out, "phone 186*****234 and mail a**d@abcd.com");
    assert_eq!(results.len(), 2);
    for res in &results {
        assert_eq!(&input[res.byte_start..res.byte_end], res.text);
    }
}

#[test]
fn detect_results_reconstruct_deidentify_output() {
    let engine = configured();
    let input = "mac 06-06-06-aa-bb-cc at 10.2.3.4\nphone 18612341234";
    let (out, _) = engine.deidentify(input).unwrap();
    let results = engine.detect(input).unwrap();
    // splice the detect results manually: must equal the deidentify output
    let mut rebuilt = String::new();
    let mut pos = 0;
    for res in &results {
        rebuilt.push_str(&input[pos..res.byte_start]);
        rebuilt.push_str(&res.mask_text);
        pos = res.byte_end;
    }
    rebuilt.push_str(&input[pos..]);
    assert_eq!(rebuilt, out);
    assert!(out.contains("<MACADDR>"));
    assert!(out.contains("<IPV4>"));
}

#[test]
fn no_surviving_result_nests_inside_another() {
    let engine = configured();
    // the domain inside the mail address must be dominated by the mail hit
    let results = engine
        .detect("mail abcd@abcd.com and site www.google.com")
        .unwrap();
    for a in &results {
        for b in &results {
            let strictly_inside = a.byte_start <= b.byte_start
                && b.byte_end <= a.byte_end
                && (a.byte_start, a.byte_end) != (b.byte_start, b.byte_end);
            assert!(!strictly_inside, "{b:?} nests inside {a:?}");
        }
    }
    assert!(results.iter().any(|r| r.info_type == "DOMAIN"));
    assert!(results.iter().any(|r| r.info_type == "EMAIL"));
}

#[test]
fn id_card_checksum_distinguishes_neighbours() {
    let engine = configured();
    let results = engine.detect("id 110225196403026127").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "CHINAID");
    // masked middle, visible prefix and suffix
    let (out, _) = engine.deidentify("id 110225196403026127").unwrap();
    assert_eq!(out, "id 110225********6127");

    let results = engine.detect("id 110225196403026128").unwrap();
    assert!(results.is_empty());
}

#[test]
fn verified_value_rules_end_to_end() {
    let engine = configured();
    // luhn-valid card, masked down to the last four digits
    let (out, results) = engine.deidentify("card 6212345678901232").unwrap();
    assert_eq!(results[0].info_type, "BANKCARD");
    assert_eq!(out, "card ************1232");
    // luhn-invalid neighbour is dropped
    assert!(engine.detect("card 6212345678901233").unwrap().is_empty());

    // aba routing needs its context word
    let results = engine.detect("routing 123123123").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "ABA");
    assert!(engine.detect("order 123123123").unwrap().is_empty());

    // bitcoin address validates its checksum
    let results = engine
        .detect("wallet 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "BITCOIN");
}

#[test]
fn mask_by_rule_name() {
    let engine = configured();
    assert_eq!(engine.mask("18612341234", "CHINAPHONE").unwrap(), "186*****234");
    assert_eq!(
        engine.mask("abcd@abcd.com", "B64MASK").unwrap(),
        "YWJjZEBhYmNkLmNvbQ=="
    );
    // recursive deidentify through a mask rule
    assert_eq!(
        engine.mask("call 18612341234", "DEEPMASK").unwrap(),
        "call 186*****234"
    );
    assert!(matches!(
        engine.mask("x", "MISSING"),
        Err(DlpError::MaskWorkerNotFound(_))
    ));
}

#[test]
fn map_scan_and_mask() {
    let engine = configured();
    let mut input = HashMap::new();
    input.insert("nothing".to_string(), "nothing".to_string());
    input.insert("uid".to_string(), "10086".to_string());
    input.insert(
        "k1".to_string(),
        "my phone is 18612341234 and 18612341234".to_string(),
    );
    let results = engine.detect_map(&input).unwrap();
    // one uid hit plus two phone hits inside k1
    assert_eq!(results.len(), 3);
    let (out, results) = engine.deidentify_map(&input).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(out["nothing"], "nothing");
    assert_eq!(out["k1"], "my phone is 186*****234 and 186*****234");
    assert_eq!(out["uid"].len(), 32); // md5 display form
    assert_ne!(out["uid"], "10086");
}

#[test]
fn kv_extraction_inside_flat_text() {
    let engine = configured();
    // the uid rule is KV-typed: bare digits only hit next to a uid key
    assert!(engine.detect("plain 10086 text").unwrap().is_empty());
    let results = engine.detect("uid=10086 trailer").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result_type, ResultType::Value);
    assert_eq!(results[0].byte_start, 4);
    assert_eq!(results[0].byte_end, 9);
}

#[test]
fn wide_punctuation_keeps_offsets_valid() {
    let engine = configured();
    let input = "收件人：张真人，手机号码：18612341234";
    let (out, results) = engine.deidentify(input).unwrap();
    for res in &results {
        assert_eq!(&input.as_bytes()[res.byte_start..res.byte_end], res.text.as_bytes());
    }
    assert!(out.contains("18*******34"));
    assert!(!out.contains("张真人"));
    // the full-width punctuation survives in the output
    assert!(out.contains('：'));
}

#[test]
fn json_number_precision_survives() {
    let engine = configured();
    let json = r#"{"id":146310743121612001}"#;
    let results = engine.detect_json(json).unwrap();
    assert!(results.is_empty());
    let (out, _) = engine.deidentify_json(json).unwrap();
    assert_eq!(out, r#"{"id":146310743121612001}"#);
}

#[test]
fn json_detect_then_mask_by_result() {
    let engine = configured();
    let json = r#"{"phone":13312341234}"#;
    let results = engine.detect_json(json).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "/phone");
    let out = engine.deidentify_json_by_result(json, &results).unwrap();
    assert_eq!(out, r#"{"phone":"13*******34"}"#);
}

#[test]
fn json_pruned_results_leave_fields_alone() {
    let engine = configured();
    let json = r#"{"name":"张三","uid":"10086"}"#;
    let results = engine.detect_json(json).unwrap();
    let pruned: Vec<_> = results
        .into_iter()
        .filter(|r| r.info_type != "NAME")
        .collect();
    let out = engine.deidentify_json_by_result(json, &pruned).unwrap();
    assert!(out.contains("张三"));
    assert!(!out.contains("10086"));
}

#[test]
fn struct_masking_with_cycle_and_array() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Profile {
        email: String,
        mirrors: [String; 2],
        plain: String,
        link: Option<Rc<RefCell<Profile>>>,
    }

    impl MaskStruct for Profile {
        fn mask_fields(&mut self, walker: &mut FieldWalker<'_>) {
            walker.field("EMAIL", &mut self.email);
            walker.field_slice("EMAIL", &mut self.mirrors);
            walker.field("", &mut self.plain);
            if let Some(link) = self.link.clone() {
                walker.nested_rc("DEEPLINK", &link);
            }
        }
    }

    let engine = configured();
    let shared = Rc::new(RefCell::new(Profile {
        email: "abcd@abcd.com".into(),
        mirrors: ["abcd@abcd.com".into(), "abcd@abcd.com".into()],
        plain: "stay".into(),
        link: None,
    }));
    shared.borrow_mut().link = Some(shared.clone());
    {
        let mut profile = shared.borrow_mut();
        engine.mask_struct(&mut *profile).unwrap();
    }
    let profile = shared.borrow();
    assert_eq!(profile.email, "a**d@abcd.com");
    assert_eq!(profile.mirrors[0], "a**d@abcd.com");
    assert_eq!(profile.mirrors[1], "a**d@abcd.com");
    assert_eq!(profile.plain, "stay");
}

#[test]
fn closed_engine_refuses_every_scan_api() {
    let mut engine = configured();
    engine.close();
    assert!(matches!(engine.detect("x"), Err(DlpError::ProcessAfterClose)));
    assert!(matches!(
        engine.detect_json("{}"),
        Err(DlpError::ProcessAfterClose)
    ));
    assert!(matches!(
        engine.deidentify_map(&HashMap::new()),
        Err(DlpError::ProcessAfterClose)
    ));
    assert!(!engine.version().is_empty());
}

#[test]
fn log_processor_end_to_end() {
    let mut engine = configured();
    let processor = engine.new_log_processor();
    let (line, kvs) = processor.process(
        "user called from 18612341234",
        &["phone", "18612341234", "uid", "10086"],
    );
    assert_eq!(line, "user called from 186*****234");
    assert_eq!(kvs[0].1, "18*******34");
    // uid is a regex rule above the log rule-id cap, so the value passes
    // through the log path unchanged only if the map path dropped it too;
    // the map path is not capped, so it stays masked
    assert_ne!(kvs[1].1, "10086");
}

#[test]
fn erasure_and_tag_masking() {
    let engine = configured();
    let mut input = HashMap::new();
    input.insert("password".to_string(), "hunter2".to_string());
    let (out, results) = engine.deidentify_map(&input).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(out["password"], "");

    let (out, _) = engine.deidentify("gateway 10.2.3.4").unwrap();
    assert_eq!(out, "gateway <IPV4>");
    // blacklisted well-known address is not a hit
    assert!(engine.detect("gateway 127.0.0.1").unwrap().is_empty());
}
