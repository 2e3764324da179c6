use thiserror::Error;

/// A mistake in how an experiment was declared.
///
/// These surface while combinations are generated and abort the whole
/// `run()` call; no Run of the offending experiment is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("argument `{name}` is read before it is resolved (declare it earlier)")]
    Unresolved { name: String },
    #[error("argument `{name}` is not declared")]
    Undeclared { name: String },
    #[error("placeholder [[{name}]] in `{template}` refers to an argument declared later")]
    ForwardPlaceholder { name: String, template: String },
    #[error("argument `{name}` is {found}, expected {expected}")]
    Type {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0}")]
    Raised(String),
}

impl SpecError {
    /// Error raised from inside a user-supplied computed blob or filter.
    pub fn raised(message: impl Into<String>) -> Self {
        SpecError::Raised(message.into())
    }
}

/// Failure that aborts one dispatch call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("experiment `{experiment}`: {source}")]
    Spec {
        experiment: String,
        #[source]
        source: SpecError,
    },
}
