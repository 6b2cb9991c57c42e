//! Repository layer: entity-scoped database operations.
//!
//! Each store is a unit struct behind a `Send + Sync` trait and takes the
//! connection per call, so callers decide transaction scope.

mod archive;
mod document;

pub use archive::*;
pub use document::*;
