use crate::quant::QuantError;
use crate::validate::ValidationReport;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration rejected:\n{0}")]
    Validation(ValidationReport),

    #[error(transparent)]
    Quantization(#[from] QuantError),

    #[error("quantization of '{model}' failed: {reason}")]
    QuantizationFailed { model: String, reason: String },

    #[error("artifact push failed: {0}")]
    Push(String),

    #[error("gpu detection failed: {0}")]
    GpuDetection(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("tracing initialization failed: {0}")]
    Tracing(String),
}

impl From<ValidationReport> for DeployError {
    fn from(report: ValidationReport) -> Self {
        DeployError::Validation(report)
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;

/// non-fatal conditions that are logged where they occur and never abort resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftWarning {
    /// an input held a value outside its closed set and was replaced
    CoercedValue {
        variable: String,
        value: String,
        fallback: String,
    },
    /// the fast attention kernel library is missing on this host
    FastAttentionUnavailable { fallback: String },
    /// an optional artifact push did not succeed
    PushFailed { repo: String, reason: String },
}

impl SoftWarning {
    pub fn coerced(variable: &str, value: &str, fallback: impl fmt::Display) -> Self {
        SoftWarning::CoercedValue {
            variable: variable.to_string(),
            value: value.to_string(),
            fallback: fallback.to_string(),
        }
    }

    /// log the warning and hand it back so callers can keep it
    pub fn emit(self) -> Self {
        tracing::warn!("{}", self);
        self
    }
}

impl fmt::Display for SoftWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftWarning::CoercedValue {
                variable,
                value,
                fallback,
            } => write!(
                f,
                "invalid {}='{}', defaulting to '{}'",
                variable, value, fallback
            ),
            SoftWarning::FastAttentionUnavailable { fallback } => write!(
                f,
                "fast attention kernel unavailable, falling back to {}",
                fallback
            ),
            SoftWarning::PushFailed { repo, reason } => {
                write!(f, "push to '{}' failed (continuing): {}", repo, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerced_warning_names_variable_and_value() {
        let warning = SoftWarning::coerced("DEPLOY_MODELS", "everything", "both");
        let text = warning.to_string();
        assert!(text.contains("DEPLOY_MODELS"));
        assert!(text.contains("everything"));
        assert!(text.contains("both"));
    }
}
