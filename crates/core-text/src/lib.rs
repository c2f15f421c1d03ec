//! Persistent rope-based text buffer (component C1).
//!
//! The rope is a balanced tree of immutable leaves addressed in UTF-16
//! code units, matching LSP's default position encoding. See the module
//! docs on [`Rope`] for the mutable/immutable API split.

mod bidi;
mod error;
mod node;
mod rope;

pub use bidi::{BidiSegment, Direction};
pub use error::{CoreError, CoreResult};
pub use rope::Rope;
