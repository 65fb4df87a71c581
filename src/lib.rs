//! Aqueduct - a streaming storage gateway over heterogeneous backends
//!
//! Aqueduct fronts multiple storage backends behind one HTTP surface:
//! - Constant-memory streaming for uploads, downloads, and zip export
//! - A uniform provider contract over path- and ID-addressed backends
//! - Recursive cross-provider copy and move with bounded concurrency
//! - Conflict policies (warn, replace, rename, new_version) on every write

pub mod api;
pub mod config;
pub mod error;
pub mod item;
pub mod path;
pub mod provider;
pub mod streams;

pub use error::{Error, Result};
