use std::fmt;

use super::codes::{CodeFormatError, CodeScope};
use super::domain::{AdmissionId, AdmissionStatus};
use super::ports::RepositoryError;

/// Coarse classification the API layer maps onto response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Unavailable,
}

/// External dependency named in a [`AdmissionError::DependencyFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Storage,
    DocumentGenerator,
    IdentityStore,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Dependency::Storage => "storage",
            Dependency::DocumentGenerator => "document generator",
            Dependency::IdentityStore => "identity store",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the admission workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission not found: {0}")]
    AdmissionNotFound(AdmissionId),
    #[error("Cannot {verb} from status: {from}", verb = .to.transition_verb())]
    IllegalTransition {
        from: AdmissionStatus,
        to: AdmissionStatus,
    },
    #[error("invalid {field}: {reason}")]
    ValidationFailed { field: &'static str, reason: String },
    #[error("code sequence exhausted for scope {scope}")]
    CodeAllocationExhausted { scope: CodeScope },
    #[error("identity '{username}' already exists")]
    IdentityConflict { username: String },
    #[error("{which} unavailable: {detail}")]
    DependencyFailure { which: Dependency, detail: String },
    #[error("operation exceeded its deadline")]
    DeadlineExceeded,
}

impl AdmissionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdmissionError::AdmissionNotFound(_) => ErrorKind::NotFound,
            AdmissionError::IllegalTransition { .. }
            | AdmissionError::CodeAllocationExhausted { .. }
            | AdmissionError::IdentityConflict { .. } => ErrorKind::Conflict,
            AdmissionError::ValidationFailed { .. } => ErrorKind::InvalidInput,
            AdmissionError::DependencyFailure { .. } | AdmissionError::DeadlineExceeded => {
                ErrorKind::Unavailable
            }
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        AdmissionError::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(err: RepositoryError) -> Self {
        AdmissionError::DependencyFailure {
            which: Dependency::Storage,
            detail: err.to_string(),
        }
    }
}

impl From<CodeFormatError> for AdmissionError {
    fn from(value: CodeFormatError) -> Self {
        AdmissionError::invalid("code", value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_names_the_operation() {
        let err = AdmissionError::IllegalTransition {
            from: AdmissionStatus::Applied,
            to: AdmissionStatus::Applied,
        };
        assert_eq!(
            err.to_string(),
            "Cannot convert to application from status: applied"
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn kinds_separate_not_found_conflict_and_input() {
        assert_eq!(
            AdmissionError::AdmissionNotFound(AdmissionId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AdmissionError::invalid("reason", "must not be empty").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            AdmissionError::storage(RepositoryError::Unavailable("down".into())).kind(),
            ErrorKind::Unavailable
        );
    }
}
