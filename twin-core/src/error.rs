use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;
use crate::telemetry::TelemetryError;

#[derive(Error, Debug)]
pub enum TwinError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Other error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_errors_convert() {
        let err: TwinError = LlmError::MissingApiKey.into();
        assert!(matches!(err, TwinError::Llm(LlmError::MissingApiKey)));
        assert!(err.to_string().starts_with("LLM error:"));

        let err: TwinError = StoreError::InvalidKey("../x".to_string()).into();
        assert_eq!(err.to_string(), "Store error: Invalid key: ../x");
    }
}
