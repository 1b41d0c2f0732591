use thiserror::Error;

/// Malformed SQL or arguments that don't match the statement's placeholders.
/// Raised synchronously from [`crate::controller::FetchedRecordsController::perform_fetch`];
/// the controller remains unattached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("query expects {expected} argument(s), got {got}")]
    ArgumentCountMismatch { expected: usize, got: usize },
    #[error("failed to prepare statement: {0}")]
    Prepare(String),
}

/// A refetch triggered by a committed transaction failed. Surfaced through
/// [`crate::controller::FetchedRecordsDelegate::did_fail`]; never raised into
/// the database's commit machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("database error during refetch: {0}")]
    Database(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
