use thiserror::Error;

/// Failures a caller is expected to tell apart from plain I/O errors.
///
/// These travel inside `anyhow::Error`; the HTTP layer downcasts them to pick
/// a status code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("amount must be a positive integer (got {amount})")]
    NonPositiveAmount { amount: i64 },

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DomainError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::NonPositiveAmount { .. } | DomainError::InvalidInput { .. }
        )
    }
}

/// Returns the domain error carried by `error`, if any.
pub fn domain_error(error: &anyhow::Error) -> Option<&DomainError> {
    error.downcast_ref::<DomainError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_survives_anyhow_context() {
        let error = anyhow::Error::new(DomainError::not_found("task", "abc"))
            .context("complete task");
        let found = domain_error(&error).expect("domain error");
        assert_eq!(found, &DomainError::not_found("task", "abc"));
        assert!(!found.is_validation());
    }

    #[test]
    fn validation_variants_are_flagged() {
        assert!(DomainError::NonPositiveAmount { amount: 0 }.is_validation());
        assert!(DomainError::invalid("date", "expected YYYY-MM-DD").is_validation());
        assert_eq!(
            DomainError::NonPositiveAmount { amount: -3 }.to_string(),
            "amount must be a positive integer (got -3)"
        );
    }
}
