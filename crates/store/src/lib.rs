//! Vellum store - a versioned key-value store on the git object format
//!
//! Values live at `/`-separated paths inside a tree of snapshots. Reads see
//! whichever commit the branch head points at; writes accumulate in an
//! in-memory working tree and become one new commit per transaction, with
//! multi-process safety provided by an advisory lock on the head ref.

pub mod error;
pub mod identity;
pub mod payload;
pub mod store;
pub mod transaction;
pub mod worktree;

// Re-export main types for convenience
pub use error::StoreError;
pub use identity::Identity;
pub use payload::{Handlers, Payload, PayloadCodec};
pub use store::Store;
pub use worktree::WorkTree;
