#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod model;
pub mod paths;
pub mod store;
pub mod sync;
pub mod workspace;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::model::{DepEdge, DepKind, Issue, IssueKind, Note, StateError, Status};
pub use crate::store::Store;
