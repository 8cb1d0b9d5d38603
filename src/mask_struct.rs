//! Annotation-driven masking of in-memory object graphs.
//!
//! There is no runtime field reflection in Rust, so the `mask:"RULE"` tags
//! of the original API become a trait: a type lists its sensitive fields,
//! each registered with the mask-rule name the tag would have carried. The
//! walker owns the recursion budget and the masker lookups.

use crate::engine::{Engine, MAX_INPUT};
use crate::error::{DlpError, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Default recursion budget for nested records. The budget is also the
/// cycle-breaker for self-referential graphs.
pub const MAX_CALL_DEPTH: usize = 5;

/// Implemented by types whose fields can be masked in place.
///
/// ```
/// use dlp_engine::{Engine, FieldWalker, MaskStruct};
///
/// struct Contact {
///     email: String,
///     note: String,
/// }
///
/// impl MaskStruct for Contact {
///     fn mask_fields(&mut self, walker: &mut FieldWalker<'_>) {
///         walker.field("EMAIL", &mut self.email);
///         // `note` carries no annotation and stays untouched
///     }
/// }
///
/// let mut engine = Engine::new("doc");
/// engine.apply_config_default().unwrap();
/// let mut contact = Contact {
///     email: "abcd@abcd.com".into(),
///     note: "keep".into(),
/// };
/// engine.mask_struct(&mut contact).unwrap();
/// assert_eq!(contact.email, "a**d@abcd.com");
/// assert_eq!(contact.note, "keep");
/// ```
pub trait MaskStruct {
    fn mask_fields(&mut self, walker: &mut FieldWalker<'_>);
}

/// Field visitor handed to [`MaskStruct::mask_fields`].
pub struct FieldWalker<'a> {
    engine: &'a Engine,
    depth: usize,
    visited: usize,
    overflowed: bool,
}

impl<'a> FieldWalker<'a> {
    fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            depth: MAX_CALL_DEPTH,
            visited: 0,
            overflowed: false,
        }
    }

    /// Mask a string field in place. An empty rule name inhibits the field.
    pub fn field(&mut self, rule: &str, value: &mut String) {
        if !self.admit(rule) {
            return;
        }
        if let Some(masker) = self.engine.maskers.get(rule) {
            if let Ok(masked) = masker.mask(value, self.engine) {
                *value = masked;
            }
        }
    }

    /// Mask an optional string field when present.
    pub fn optional_field(&mut self, rule: &str, value: &mut Option<String>) {
        if let Some(value) = value {
            self.field(rule, value);
        }
    }

    /// Mask every string in a slice with the same rule, the way an
    /// annotated array field shares its annotation.
    pub fn field_slice(&mut self, rule: &str, values: &mut [String]) {
        for value in values {
            self.field(rule, value);
        }
    }

    /// Mask a dynamically typed leaf if it currently holds a string.
    pub fn dynamic_field(&mut self, rule: &str, value: &mut Value) {
        if let Value::String(text) = value {
            self.field(rule, text);
        }
    }

    /// Recurse into a nested record. An empty rule name inhibits the whole
    /// subtree; an exhausted depth budget stops the descent.
    pub fn nested(&mut self, rule: &str, value: &mut dyn MaskStruct) {
        if !self.admit(rule) || self.depth == 0 {
            return;
        }
        self.depth -= 1;
        value.mask_fields(self);
        self.depth += 1;
    }

    /// Recurse into each record of a slice.
    pub fn nested_slice<T: MaskStruct>(&mut self, rule: &str, values: &mut [T]) {
        for value in values {
            self.nested(rule, value);
        }
    }

    /// Recurse through a shared `Rc<RefCell<_>>` link. A link that is
    /// already borrowed is part of a cycle through the current path and is
    /// skipped; the depth budget bounds everything else.
    pub fn nested_rc<T: MaskStruct>(&mut self, rule: &str, link: &Rc<RefCell<T>>) {
        if !self.admit(rule) || self.depth == 0 {
            return;
        }
        if let Ok(mut inner) = link.try_borrow_mut() {
            self.depth -= 1;
            inner.mask_fields(self);
            self.depth += 1;
        }
    }

    fn admit(&mut self, rule: &str) -> bool {
        if rule.is_empty() {
            return false;
        }
        self.visited += 1;
        if self.visited > MAX_INPUT {
            self.overflowed = true;
            return false;
        }
        true
    }
}

impl Engine {
    /// Mask every annotated field of an object graph in place.
    pub fn mask_struct<T: MaskStruct>(&self, value: &mut T) -> Result<()> {
        self.ensure_scan_api()?;
        let mut walker = FieldWalker::new(self);
        value.mask_fields(&mut walker);
        if walker.overflowed {
            return Err(DlpError::MaskStructInput);
        }
        Ok(())
    }
}
