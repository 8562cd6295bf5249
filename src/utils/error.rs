use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Missing required feature: {feature}")]
    MissingFeature { feature: String },

    #[error("Type mismatch for '{attribute}': expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("Scoring failed: {message}")]
    Scoring { message: String },

    #[error("Invalid time horizon: {months} months")]
    InvalidHorizon { months: f64 },

    #[error("Unknown fracture type: {name}")]
    UnknownFractureType { name: String },

    #[error("Failed to load model artifact '{path}': {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration parse error in '{field}': {message}")]
    ConfigParseError { field: String, message: String },

    #[error("Invalid configuration value for '{field}': {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Worker task failed: {message}")]
    TaskJoinError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 病患資料與管線契約不符
    Input,
    Model,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RiskError::MissingFeature { .. }
            | RiskError::TypeMismatch { .. }
            | RiskError::InvalidHorizon { .. }
            | RiskError::UnknownFractureType { .. } => ErrorCategory::Input,
            RiskError::Scoring { .. } | RiskError::ModelLoad { .. } => ErrorCategory::Model,
            RiskError::ConfigError { .. }
            | RiskError::ConfigParseError { .. }
            | RiskError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            RiskError::IoError(_)
            | RiskError::SerializationError(_)
            | RiskError::TaskJoinError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RiskError::ModelLoad { .. } | RiskError::TaskJoinError { .. } => {
                ErrorSeverity::Critical
            }
            RiskError::Scoring { .. } | RiskError::IoError(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            RiskError::MissingFeature { feature } => {
                format!("Add '{}' to the patient record", feature)
            }
            RiskError::TypeMismatch {
                attribute,
                expected,
                ..
            } => format!("Send '{}' as {}", attribute, expected),
            RiskError::Scoring { .. } => {
                "Check that the score model artifact matches the feature vocabulary".to_string()
            }
            RiskError::InvalidHorizon { .. } => {
                "Use a non-negative time horizon in months".to_string()
            }
            RiskError::UnknownFractureType { .. } => {
                "Use one of: vertebral, hip, any".to_string()
            }
            RiskError::ModelLoad { path, .. } => {
                format!("Verify that '{}' exists and is a valid model export", path)
            }
            RiskError::IoError(_) => "Check file paths and permissions".to_string(),
            RiskError::SerializationError(_) => {
                "Check that the input file is valid JSON".to_string()
            }
            RiskError::ConfigError { .. }
            | RiskError::ConfigParseError { .. }
            | RiskError::InvalidConfigValueError { .. } => {
                "Review the configuration file and command line flags".to_string()
            }
            RiskError::TaskJoinError { .. } => "Retry the request; report if it persists".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => format!("Invalid patient input: {}", self),
            ErrorCategory::Model => format!("Model error: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_errors_are_input_category() {
        let err = RiskError::MissingFeature {
            feature: "age".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Input);
        assert!(err.recovery_suggestion().contains("age"));
    }

    #[test]
    fn test_model_load_is_critical() {
        let err = RiskError::ModelLoad {
            path: "models/hip_xgb.json".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.user_friendly_message().starts_with("Model error"));
    }
}
