//! Shared error taxonomy for the editor core.
//!
//! `core-text` sits at the bottom of the dependency graph, so the taxonomy
//! lives here and every other crate re-exports or matches on it rather than
//! minting its own variant set. Not every variant is raised by this crate —
//! `NotReady`, `Timeout`, `Disconnected` and `CrossFileEditUnsupported`
//! belong to the LSP transport/client — but keeping one enum means a caller
//! holding a `CoreError` never needs to know which component produced it.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller-supplied offset or range is out of bounds or not on a valid
    /// boundary for the operation.
    #[error("invalid range")]
    InvalidRange,
    /// An LSP request was issued before `initialize` completed.
    #[error("lsp client not ready")]
    NotReady,
    /// A pending LSP request exceeded its response budget.
    #[error("lsp request timed out")]
    Timeout,
    /// The transport's underlying connection closed.
    #[error("lsp transport disconnected")]
    Disconnected,
    /// Malformed JSON-RPC or an unexpected payload shape.
    #[error("failed to parse message: {0}")]
    ParseError(String),
    /// A `WorkspaceEdit` referenced a file other than the one it was applied
    /// against.
    #[error("workspace edit targets a different file")]
    CrossFileEditUnsupported,
}

pub type CoreResult<T> = Result<T, CoreError>;
