use thiserror::Error;

/// Structural failures of the simulation core. Row-level problems never
/// surface here; they are counted in a [`crate::normalize::NormalizeReport`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("pricing error in scheme '{scheme}': {reason}")]
    Pricing { scheme: String, reason: String },
    #[error("no valid requests to simulate")]
    EmptyInput,
    #[error("invalid capacity configuration: {0}")]
    InvalidCapacity(String),
}

impl SimError {
    pub fn pricing(scheme: &str, reason: impl Into<String>) -> Self {
        SimError::Pricing {
            scheme: scheme.to_string(),
            reason: reason.into(),
        }
    }
}
