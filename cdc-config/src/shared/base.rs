use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// The pipeline has nowhere to deliver records.
    #[error("at least one sink must be configured")]
    NoSinks,
    /// Two sinks share a name, which would make their logs and metrics indistinguishable.
    #[error("sink name `{0}` is configured more than once")]
    DuplicateSinkName(String),
}

impl ValidationError {
    pub(crate) fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}
