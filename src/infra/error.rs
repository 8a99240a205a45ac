//! Error types for the LOC registry

use thiserror::Error;

use crate::domain::{CaseId, CaseStatus, Identity, ItemKind};

/// Coarse classification callers use to render a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Wrong state or bad input; the caller may pick another action
    Precondition,
    /// The acting identity lacks the required role
    Forbidden,
    /// The synchronizer must abort the cycle without advancing its checkpoint
    SyncFatal,
    /// A collaborator (store, ledger, configuration) failed
    Collaborator,
}

/// Errors raised by case governance, item governance and synchronization
#[derive(Error, Debug)]
pub enum LocError {
    /// Transition not allowed from the current status
    #[error("cannot {operation} case in status {status}")]
    InvalidStatus {
        operation: &'static str,
        status: CaseStatus,
    },

    /// Case is voided and can no longer be edited
    #[error("case {0} is void")]
    CaseVoid(CaseId),

    /// Void sequencing violated
    #[error("case {case_id} already has void information")]
    AlreadyVoid { case_id: CaseId },

    /// Case definition breaks a structural rule (requester, seal)
    #[error("invalid case: {0}")]
    InvalidCase(String),

    /// Submission requires a requester
    #[error("case {0} has no requester")]
    MissingRequester(CaseId),

    /// External identity verification has not completed
    #[error("identity verification of case {0} is still pending")]
    VerificationPending(CaseId),

    /// Case not found
    #[error("case not found: {0}")]
    CaseNotFound(CaseId),

    /// Item key already present in the case
    #[error("duplicate {kind}: {key}")]
    DuplicateItem { kind: ItemKind, key: String },

    /// Item not found in the case
    #[error("{kind} not found: {key}")]
    ItemNotFound { kind: ItemKind, key: String },

    /// Item is not in a state allowing the operation
    #[error("cannot {operation} {kind} {key}: {reason}")]
    InvalidItemState {
        kind: ItemKind,
        key: String,
        operation: &'static str,
        reason: String,
    },

    /// Caller lacks the role required by the operation
    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: Identity, action: String },

    /// Ledger emitted an operation kind outside the expected set
    #[error("unexpected ledger operation kind: {0}")]
    UnexpectedOperation(String),

    /// Ledger operation targets a case this node does not know
    #[error("ledger operation {kind} targets unknown case {case_id}")]
    MissingTarget { kind: String, case_id: CaseId },

    /// Ledger operation lacks a fee figure it must carry
    #[error("ledger operation {kind} is missing required fee {fee}")]
    MissingFee { kind: String, fee: &'static str },

    /// Ledger operation arguments could not be interpreted
    #[error("malformed ledger operation {kind}: {reason}")]
    MalformedOperation { kind: String, reason: String },

    /// Persistence collaborator error
    #[error("repository error: {0}")]
    Repository(String),

    /// Ledger collaborator error
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LocError {
    pub fn forbidden(actor: &Identity, action: impl Into<String>) -> Self {
        Self::Forbidden {
            actor: actor.clone(),
            action: action.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LocError::Forbidden { .. } => ErrorCategory::Forbidden,
            LocError::UnexpectedOperation(_)
            | LocError::MissingTarget { .. }
            | LocError::MissingFee { .. }
            | LocError::MalformedOperation { .. } => ErrorCategory::SyncFatal,
            LocError::Repository(_)
            | LocError::Ledger(_)
            | LocError::Configuration(_)
            | LocError::Internal(_) => ErrorCategory::Collaborator,
            _ => ErrorCategory::Precondition,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.category() == ErrorCategory::Forbidden
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, LocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let forbidden = LocError::forbidden(&Identity::from("eve"), "remove file h1");
        assert_eq!(forbidden.category(), ErrorCategory::Forbidden);
        assert!(forbidden.is_forbidden());

        let status = LocError::InvalidStatus {
            operation: "accept",
            status: CaseStatus::Draft,
        };
        assert_eq!(status.category(), ErrorCategory::Precondition);
        assert_eq!(status.to_string(), "cannot accept case in status DRAFT");

        let fatal = LocError::UnexpectedOperation("loc.teleport".to_string());
        assert_eq!(fatal.category(), ErrorCategory::SyncFatal);

        let repo = LocError::Repository("connection reset".to_string());
        assert_eq!(repo.category(), ErrorCategory::Collaborator);
    }
}
