use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    TypeMismatch,
    ConstraintViolation,
    RequiredMissing,
    ReferenceNotFound,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationCode::TypeMismatch => "TYPE_MISMATCH",
            ValidationCode::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ValidationCode::RequiredMissing => "REQUIRED_MISSING",
            ValidationCode::ReferenceNotFound => "REFERENCE_NOT_FOUND",
        }
    }
}

/// One rejected aspect of a raw input, precise enough to render a correction prompt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AxiaError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("precondition failed: {message}")]
    Precondition { message: String },
    #[error("invalid request: {message}")]
    Invalid { message: String },
    #[error("validation failed: {}", summarize(.errors))]
    Validation { errors: Vec<FieldError> },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|err| format!("{} {} ({})", err.field, err.code.as_str(), err.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AxiaError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation { errors }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AxiaError::Conflict { .. })
    }

    /// Storage and conflict failures leave nothing applied and may be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AxiaError::Storage { .. } | AxiaError::Conflict { .. })
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            AxiaError::Validation { errors } => errors,
            _ => &[],
        }
    }
}

pub type AxiaResult<T> = Result<T, AxiaError>;

impl From<sea_orm::DbErr> for AxiaError {
    fn from(value: sea_orm::DbErr) -> Self {
        if let Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) = value.sql_err() {
            return AxiaError::conflict(format!("unique constraint: {detail}"));
        }
        let message = value.to_string();
        // SQLite reports a lost write-lock race as a locked database.
        if message.contains("database is locked") {
            return AxiaError::conflict(message);
        }
        AxiaError::storage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{AxiaError, FieldError, ValidationCode};

    #[test]
    fn helper_constructors_set_variants() {
        let err = AxiaError::storage("disk");
        assert!(matches!(err, AxiaError::Storage { .. }));
        let err = AxiaError::not_found("missing");
        assert!(matches!(err, AxiaError::NotFound { .. }));
        let err = AxiaError::precondition("class");
        assert!(matches!(err, AxiaError::Precondition { .. }));
        let err = AxiaError::invalid("bad");
        assert!(matches!(err, AxiaError::Invalid { .. }));
        let err = AxiaError::conflict("dup");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        let err = AxiaError::configuration("widen");
        assert!(matches!(err, AxiaError::Configuration { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_error_lists_every_field() {
        let err = AxiaError::validation(vec![
            FieldError::new("email", ValidationCode::ConstraintViolation, "pattern"),
            FieldError::new("score", ValidationCode::TypeMismatch, "not an integer"),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("email CONSTRAINT_VIOLATION"));
        assert!(rendered.contains("score TYPE_MISMATCH"));
        assert_eq!(err.field_errors().len(), 2);
    }

    #[test]
    fn validation_codes_serialize_screaming_case() {
        let encoded = serde_json::to_string(&ValidationCode::ReferenceNotFound).expect("encode");
        assert_eq!(encoded, "\"REFERENCE_NOT_FOUND\"");
    }
}
