//! Rule-driven DLP scanning and masking engine.
//!
//! Given free-form text, a key/value map, a JSON document or a tagged
//! object graph, the engine locates substrings matching configured
//! sensitive-information rules (phone numbers, ID cards, bank accounts,
//! e-mail addresses, addresses, crypto wallets, ...), verifies candidates
//! with contextual and algorithmic checks, and rewrites the input with each
//! match replaced by its rule-specified masked form.
//!
//! A single YAML configuration drives both the detection catalog and the
//! masking catalog. Callers build an [`Engine`], apply configuration once,
//! and invoke the detect / deidentify / mask APIs repeatedly:
//!
//! ```
//! use dlp_engine::Engine;
//!
//! let mut engine = Engine::new("my.service");
//! engine.apply_config_default().unwrap();
//!
//! let (masked, results) = engine
//!     .deidentify("phone 18612341234 and mail abcd@abcd.com")
//!     .unwrap();
//! assert_eq!(masked, "phone 186*****234 and mail a**d@abcd.com");
//! assert_eq!(results.len(), 2);
//! ```
//!
//! The engine is single-owner: configuration mutates it (`&mut self`),
//! scans borrow it (`&self`). Give each worker thread its own engine
//! instead of sharing one behind a lock.

pub mod address;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod json_walker;
pub mod mask;
pub mod mask_struct;
pub mod result;
pub mod scan;
pub mod verify;

pub use config::{DlpConfig, MaskRuleSpec, MaskType, RuleSpec};
pub use engine::{Engine, LogProcessor, MAX_INPUT, MAX_ITEM};
pub use error::{DlpError, Result};
pub use mask_struct::{FieldWalker, MaskStruct, MAX_CALL_DEPTH};
pub use result::{DetectResult, KvItem, ResultType};
