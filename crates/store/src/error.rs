//! Error taxonomy for the store layer.

use std::path::PathBuf;

/// Failure classes callers branch on at the store boundary.
///
/// Object-level integrity failures surface as
/// [`vellum_core::OdbError`](vellum_core::OdbError) through the same
/// `anyhow` chain.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no repository at {0}")]
    RepositoryMissing(PathBuf),

    #[error("head lock is held by another writer")]
    LockContention,

    #[error("a transaction is already active in this thread")]
    NestedTransaction,

    #[error("transaction aborted and rolled back")]
    TransactionAborted,
}
