//! Deployment archive errors.
//!
//! redb and serde_json failures are flattened to their message; callers only
//! need to know which step of the archive failed.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open deployment archive: {0}")]
    Open(String),

    #[error("archive transaction failed: {0}")]
    Transaction(String),

    #[error("archive table unavailable: {0}")]
    Table(String),

    #[error("cannot read deployment record: {0}")]
    Read(String),

    #[error("cannot write deployment record: {0}")]
    Write(String),

    #[error("cannot encode deployment record: {0}")]
    Encode(String),

    /// A stored record no longer matches the record schema.
    #[error("corrupt deployment record: {0}")]
    Decode(String),
}
