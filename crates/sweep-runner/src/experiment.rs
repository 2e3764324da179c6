use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bindings::Bindings;
use crate::blob::{Blob, ComputeFn};
use crate::error::SpecError;
use crate::exec::ExecOutcome;

pub type StdoutModFn = dyn Fn(&str, &ExecOutcome) -> String + Send + Sync;
pub type HeaderModFn = dyn Fn(&str) -> String + Send + Sync;
pub type FilterFn = dyn Fn(&Bindings) -> Result<bool, SpecError> + Send + Sync;

pub const DEFAULT_GROUP: &str = "ungrouped";

/// Declared value of one argument.
#[derive(Clone)]
pub enum ArgumentValue {
    /// One cross-product axis.
    List(Vec<Value>),
    Literal(Value),
    /// Evaluated after every earlier-declared argument is resolved.
    Computed(Arc<ComputeFn>),
}

impl ArgumentValue {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ArgumentValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ArgumentValue::Literal(value.into())
    }

    pub fn computed<F, V>(f: F) -> Self
    where
        F: Fn(&Bindings) -> Result<V, SpecError> + Send + Sync + 'static,
        V: Into<Value>,
    {
        ArgumentValue::Computed(Arc::new(move |b: &Bindings| -> Result<Value, SpecError> {
            f(b).map(Into::into)
        }))
    }
}

impl fmt::Debug for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentValue::List(items) => f.debug_tuple("List").field(items).finish(),
            ArgumentValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            ArgumentValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Clone)]
pub struct ExperimentOptions {
    pub creates_file: Option<Blob>,
    pub stdout_file: Option<Blob>,
    pub stdout_mod: Option<Arc<StdoutModFn>>,
    pub stdout_res: Option<Blob>,
    pub header_string: Option<Blob>,
    pub header_command: Option<Blob>,
    pub header_mod: Option<Arc<HeaderModFn>>,
    /// Empty set accepts every return code.
    pub allowed_return_codes: BTreeSet<i32>,
    pub combinations_filter: Option<Arc<FilterFn>>,
    pub return_string: Option<Blob>,
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            creates_file: None,
            stdout_file: None,
            stdout_mod: None,
            stdout_res: None,
            header_string: None,
            header_command: None,
            header_mod: None,
            allowed_return_codes: BTreeSet::from([0]),
            combinations_filter: None,
            return_string: None,
        }
    }
}

/// A command template plus named argument sets.
///
/// Arguments keep declaration order, which is also their resolution order:
/// a computed argument only sees the arguments declared before it.
#[derive(Clone)]
pub struct Experiment {
    pub name: Blob,
    pub group: String,
    pub command: Blob,
    pub arguments: Vec<(String, ArgumentValue)>,
    pub options: ExperimentOptions,
}

impl Experiment {
    pub fn new(name: impl Into<Blob>, command: impl Into<Blob>) -> Self {
        Self {
            name: name.into(),
            group: DEFAULT_GROUP.to_string(),
            command: command.into(),
            arguments: Vec::new(),
            options: ExperimentOptions::default(),
        }
    }

    /// Declares an argument. Re-declaring a name replaces the value but keeps
    /// its original position.
    pub fn arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        let name = name.into();
        match self.arguments.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.arguments.push((name, value)),
        }
        self
    }

    pub fn creates_file(mut self, blob: impl Into<Blob>) -> Self {
        self.options.creates_file = Some(blob.into());
        self
    }

    pub fn stdout_file(mut self, blob: impl Into<Blob>) -> Self {
        self.options.stdout_file = Some(blob.into());
        self
    }

    /// Rewrites captured stdout before it is written. The result may use
    /// `[[stdout]]` and argument placeholders.
    pub fn stdout_mod<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &ExecOutcome) -> String + Send + Sync + 'static,
    {
        self.options.stdout_mod = Some(Arc::new(f));
        self
    }

    pub fn stdout_res(mut self, blob: impl Into<Blob>) -> Self {
        self.options.stdout_res = Some(blob.into());
        self
    }

    pub fn header_string(mut self, blob: impl Into<Blob>) -> Self {
        self.options.header_string = Some(blob.into());
        self
    }

    pub fn header_command(mut self, blob: impl Into<Blob>) -> Self {
        self.options.header_command = Some(blob.into());
        self
    }

    pub fn header_mod<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.options.header_mod = Some(Arc::new(f));
        self
    }

    pub fn allowed_return_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.options.allowed_return_codes = codes.into_iter().collect();
        self
    }

    pub fn combinations_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Bindings) -> Result<bool, SpecError> + Send + Sync + 'static,
    {
        self.options.combinations_filter = Some(Arc::new(f));
        self
    }

    pub fn return_string(mut self, blob: impl Into<Blob>) -> Self {
        self.options.return_string = Some(blob.into());
        self
    }

    /// Display label before resolution.
    pub fn label(&self) -> String {
        match &self.name {
            Blob::Literal(s) => s.clone(),
            Blob::Computed(_) => "<computed>".to_string(),
        }
    }

    /// Options that are set but can never take effect.
    pub fn option_warnings(&self) -> Vec<&'static str> {
        let o = &self.options;
        let mut out = Vec::new();
        if o.stdout_file.is_none() {
            if o.stdout_mod.is_some() {
                out.push("stdout_mod has no effect if stdout_file is not specified");
            }
            if o.stdout_res.is_some() {
                out.push("stdout_res has no effect if stdout_file is not specified");
            }
            if o.header_string.is_some() {
                out.push("header_string has no effect if stdout_file is not specified");
            }
            if o.header_command.is_some() {
                out.push("header_command has no effect if stdout_file is not specified");
            }
        }
        if o.header_string.is_some() && o.header_command.is_some() {
            out.push("header_string and header_command both specified; header_command wins");
        }
        if o.header_mod.is_some() && o.header_string.is_none() && o.header_command.is_none() {
            out.push("header_mod has no effect without header_string or header_command");
        }
        out
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("command", &self.command)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}
