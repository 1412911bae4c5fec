//! Error types for the ClawBuds core.

use thiserror::Error;

/// Core result type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by domain services.
///
/// Each variant maps to a stable error kind at the API boundary. Transient
/// infrastructure failures (notifier timeouts, event handler errors) are
/// logged and swallowed by the emitting component and never appear here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Target entity absent or not visible to the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks ownership or capability.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Interaction requires an accepted friendship.
    #[error("Not friends: {0}")]
    NotFriends(String),

    /// Uniqueness violation.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Name already taken within the owner's namespace.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A listed recipient cannot receive the message.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Direct message with an empty recipient list.
    #[error("Direct messages require at least one recipient")]
    MissingRecipients,

    /// Circles message with an empty circle list.
    #[error("Circles messages require at least one circle")]
    MissingCircles,

    /// Share attempted on a private pearl.
    #[error("Pearl is private: {0}")]
    Private(String),

    /// Auto-share domain-match gate failed.
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),

    /// Owner cannot endorse their own pearl.
    #[error("Cannot endorse own pearl")]
    SelfEndorse,

    /// Quota exceeded (circles per claw, members per circle).
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Input shape or constraint violation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reflex blocked by the hourly rate limit. Audit-only; never raised
    /// to callers of domain methods.
    #[error("Hard constraint: hourly execution budget exhausted")]
    HardConstraint,

    /// A required collaborator is not attached.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Anything the boundary cannot map to a more specific kind.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable kind tag for the API boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::NotFriends(_) => "NOT_FRIENDS",
            CoreError::Duplicate(_) => "DUPLICATE",
            CoreError::DuplicateName(_) => "DUPLICATE_NAME",
            CoreError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            CoreError::MissingRecipients => "MISSING_RECIPIENTS",
            CoreError::MissingCircles => "MISSING_CIRCLES",
            CoreError::Private(_) => "PRIVATE",
            CoreError::DomainMismatch(_) => "DOMAIN_MISMATCH",
            CoreError::SelfEndorse => "SELF_ENDORSE",
            CoreError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::HardConstraint => "HARD_CONSTRAINT",
            CoreError::NotConfigured(_) => "NOT_CONFIGURED",
            CoreError::Storage(_) => "STORAGE_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization: {err}"))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::NotFound("x".into()).kind(), "NOT_FOUND");
        assert_eq!(CoreError::SelfEndorse.kind(), "SELF_ENDORSE");
        assert_eq!(CoreError::HardConstraint.kind(), "HARD_CONSTRAINT");
    }

    #[test]
    fn display_carries_context() {
        let err = CoreError::DomainMismatch("pearl tags do not overlap interests".into());
        assert!(err.to_string().contains("Domain mismatch"));
    }
}
