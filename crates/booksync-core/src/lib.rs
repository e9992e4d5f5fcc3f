//! Core types and traits for booksync storage backends.
//!
//! This crate provides the hierarchical [`Frame`] store, the [`Backend`]
//! contract with its error model, the [`ProviderRegistry`] used to pick a
//! backend for a location, and the [`Session`] that drives a backend.

pub mod backend;
pub mod frame;
pub mod models;
pub mod path;
pub mod provider;
pub mod session;
mod tree;
pub mod value;

// Re-export key types at crate root for convenience
pub use backend::{Backend, BackendError, BackendState, CompiledQuery, ErrorCategory, ErrorCode, ErrorStack, PercentageFn};
pub use frame::{compare, Frame, FrameError};
pub use models::query::{CompareOp, Query, QueryTerm};
pub use models::{Book, Instance};
pub use path::Path;
pub use provider::{BackendProvider, Location, ProviderDescriptor, ProviderRegistry, ResolveError, ResolvePolicy};
pub use session::{OpenFlags, Session, SessionError};
pub use value::{Guid, Numeric, Value, ValueTag};
