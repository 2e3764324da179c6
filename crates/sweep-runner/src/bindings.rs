use serde_json::Value;

use crate::blob::value_text;
use crate::error::SpecError;

/// Ordered mapping of argument name to value for one combination.
///
/// Entries keep declaration order. Names that are declared but not resolved
/// yet are tracked separately so that reading them fails loudly instead of
/// silently yielding a missing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
    pending: Vec<String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_pending(&mut self, name: &str) {
        if !self.pending.iter().any(|p| p == name) {
            self.pending.push(name.to_string());
        }
    }

    /// Sets `name`, replacing a previous value in place and clearing any
    /// pending mark.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.pending.retain(|p| p != &name);
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.iter().any(|p| p == name)
    }

    pub fn get(&self, name: &str) -> Result<&Value, SpecError> {
        if let Some(value) = self.lookup(name) {
            return Ok(value);
        }
        if self.is_pending(name) {
            Err(SpecError::Unresolved {
                name: name.to_string(),
            })
        } else {
            Err(SpecError::Undeclared {
                name: name.to_string(),
            })
        }
    }

    /// The value as it would appear in a substituted template.
    pub fn text(&self, name: &str) -> Result<String, SpecError> {
        self.get(name).map(value_text)
    }

    pub fn i64(&self, name: &str) -> Result<i64, SpecError> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| type_error(name, "integer", value))
    }

    pub fn f64(&self, name: &str) -> Result<f64, SpecError> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| type_error(name, "number", value))
    }

    pub fn str(&self, name: &str) -> Result<&str, SpecError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| type_error(name, "string", value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn type_error(name: &str, expected: &'static str, value: &Value) -> SpecError {
    SpecError::Type {
        name: name.to_string(),
        expected,
        found: value_type_name(value),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    if value.is_string() {
        "string"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_array() {
        "array"
    } else if value.is_object() {
        "object"
    } else {
        "null"
    }
}
