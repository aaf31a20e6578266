//! Error taxonomy shared by every core module.
//!
//! Five kinds regardless of which layer raises them (spec §7): a missing
//! logical node or on-disk path, a failed read/write/owner/admin predicate,
//! a create/rename collision, a broken authenticated-encryption boundary,
//! and malformed shell input. `Io`/`Json` are passthroughs for ambient
//! failures that aren't part of the taxonomy but still have to propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("crypto invalid: {0}")]
    CryptoInvalid(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type SfsResult<T> = Result<T, SfsError>;
