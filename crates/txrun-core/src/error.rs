use thiserror::Error;

/// Opening the transaction failed. Attached as context over the driver error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("begin tx")]
pub struct BeginTxError;

/// Committing the transaction failed. Attached as context over the driver error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("commit tx")]
pub struct CommitError;

/// Generic serialization conflict, produced only by a [`crate::Driver`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("serialization error")]
pub struct SerializationError;

/// A bounded retry budget ran out while conflicts kept occurring.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("repeat times exceeded after {attempts} attempts")]
pub struct RetriesExhausted {
    pub attempts: u32,
}

/// Phase markers looked up anywhere in an error's context chain.
pub trait TxErrorExt {
    fn is_begin_failure(&self) -> bool;
    fn is_commit_failure(&self) -> bool;
    fn is_serialization(&self) -> bool;
    fn is_retries_exhausted(&self) -> bool;
}

impl TxErrorExt for anyhow::Error {
    fn is_begin_failure(&self) -> bool {
        self.is::<BeginTxError>()
    }

    fn is_commit_failure(&self) -> bool {
        self.is::<CommitError>()
    }

    fn is_serialization(&self) -> bool {
        self.is::<SerializationError>()
    }

    fn is_retries_exhausted(&self) -> bool {
        self.is::<RetriesExhausted>()
    }
}
