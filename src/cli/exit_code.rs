//! Process exit codes returned to the shell.

use crate::domain::errors::{DomainError, EngineError};

/// Exit status of a `takt` invocation. Values are stable and distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    GeneralError,
    IssueFetchFailed,
    PieceRunFailed,
    GitOperationFailed,
    PrCreationFailed,
    Interrupted,
}

impl ExitCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::GeneralError => 1,
            Self::IssueFetchFailed => 2,
            Self::PieceRunFailed => 3,
            Self::GitOperationFailed => 4,
            Self::PrCreationFailed => 5,
            Self::Interrupted => 130,
        }
    }

    /// Pick a code from the first `DomainError` in the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<DomainError>())
            .map_or(Self::GeneralError, Self::from_domain_error)
    }

    pub fn from_domain_error(err: &DomainError) -> Self {
        match err {
            DomainError::GitOperationFailed(_) => Self::GitOperationFailed,
            DomainError::Engine(EngineError::Interrupted) => Self::Interrupted,
            DomainError::Engine(_) => Self::PieceRunFailed,
            _ => Self::GeneralError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // Every value fits in a u8.
        Self::from(u8::try_from(code.code()).unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ExitCode::Success,
            ExitCode::GeneralError,
            ExitCode::IssueFetchFailed,
            ExitCode::PieceRunFailed,
            ExitCode::GitOperationFailed,
            ExitCode::PrCreationFailed,
            ExitCode::Interrupted,
        ];
        let codes: HashSet<i32> = all.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), all.len());
        assert_eq!(ExitCode::Interrupted.code(), 130);
        assert_eq!(ExitCode::PieceRunFailed.code(), 3);
    }

    #[test]
    fn test_from_error_walks_context_chain() {
        let err = Err::<(), _>(DomainError::GitOperationFailed("worktree add".into()))
            .context("Failed to prepare worktree")
            .unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::GitOperationFailed);

        let err = anyhow::Error::new(DomainError::Engine(EngineError::Interrupted));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Interrupted);

        let err = anyhow::Error::new(DomainError::Engine(EngineError::MaxMovementsReached {
            max: 3,
        }));
        assert_eq!(ExitCode::from_error(&err), ExitCode::PieceRunFailed);

        assert_eq!(
            ExitCode::from_error(&anyhow::anyhow!("plain failure")),
            ExitCode::GeneralError
        );
    }
}
