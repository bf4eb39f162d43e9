//! Vellum core - git-compatible content-addressed object database
//!
//! This crate provides the storage layer underneath the vellum store:
//! - SHA-1 object ids derived from the `"<kind> <len>\0"` header form
//! - The four object kinds (blob, tree, commit, tag) and their byte codecs
//! - Loose object files (zlib-compressed, sharded directories)
//! - Read-only packfile access, including delta reconstruction
//! - A unified object database with an in-memory identity cache

pub mod error;
pub mod id;
pub mod loose;
pub mod object;
pub mod odb;
pub mod pack;

// Re-export main types for convenience
pub use error::OdbError;
pub use id::ObjectId;
pub use loose::LooseStore;
pub use object::{id_for, Commit, EntryMode, Kind, Object, Signature, Tag, Tree, TreeEntry};
pub use odb::ObjectDb;
pub use pack::PackStore;

/// Result type for object-database operations.
pub type OdbResult<T> = std::result::Result<T, OdbError>;
