//! Blobs: values that are either a template string or a function of the
//! already resolved arguments.
//!
//! A template refers to arguments through `[[name]]` placeholders. Each
//! placeholder is replaced by the textual form of the argument in a single
//! left-to-right pass; replacement text is never scanned again, so a value
//! that itself contains `[[...]]` ends up in the output verbatim.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::bindings::Bindings;
use crate::error::SpecError;

pub type ComputeFn = dyn Fn(&Bindings) -> Result<Value, SpecError> + Send + Sync;

#[derive(Clone)]
pub enum Blob {
    Literal(String),
    Computed(Arc<ComputeFn>),
}

impl Blob {
    pub fn literal(template: impl Into<String>) -> Self {
        Blob::Literal(template.into())
    }

    /// Wraps a closure. Its return value may be any JSON-compatible type.
    pub fn computed<F, V>(f: F) -> Self
    where
        F: Fn(&Bindings) -> Result<V, SpecError> + Send + Sync + 'static,
        V: Into<Value>,
    {
        Blob::Computed(Arc::new(move |b: &Bindings| -> Result<Value, SpecError> {
            f(b).map(Into::into)
        }))
    }

    /// Evaluates the blob to its final string.
    ///
    /// Computed blobs are invoked first; their result is stringified and then
    /// goes through the same placeholder pass as a literal template.
    pub fn render(&self, bindings: &Bindings) -> Result<String, SpecError> {
        match self {
            Blob::Literal(template) => substitute(template, bindings),
            Blob::Computed(f) => {
                let value = f(bindings)?;
                substitute(&value_text(&value), bindings)
            }
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blob::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Blob::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Blob::Literal(s.to_string())
    }
}

impl From<String> for Blob {
    fn from(s: String) -> Self {
        Blob::Literal(s)
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]]*)\]\]").expect("static placeholder regex"))
}

pub fn has_placeholders(template: &str) -> bool {
    placeholder_re().is_match(template)
}

/// Names referenced by `[[name]]` placeholders, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    placeholder_re()
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Replaces every `[[name]]` in `template`.
///
/// A placeholder naming an argument that is declared but not yet resolved is
/// a specification error. A placeholder naming nothing at all is left in
/// place with a warning.
pub fn substitute(template: &str, bindings: &Bindings) -> Result<String, SpecError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        match bindings.lookup(key.as_str()) {
            Some(value) => out.push_str(&value_text(value)),
            None if bindings.is_pending(key.as_str()) => {
                return Err(SpecError::ForwardPlaceholder {
                    name: key.as_str().to_string(),
                    template: template.to_string(),
                });
            }
            None => {
                tracing::warn!(
                    placeholder = key.as_str(),
                    template,
                    "no value for placeholder; left unchanged"
                );
                out.push_str(whole.as_str());
            }
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Textual form of a value: strings verbatim, everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
