//! Error taxonomy for the object database.

use crate::id::ObjectId;

/// Errors surfaced by the object database.
///
/// Callers that need to branch on a failure class (a missing object, a
/// corrupt pack) match on these variants; everything else converts into
/// `anyhow::Error` at the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object {0} not found in any loose or pack store")]
    NotFound(ObjectId),

    #[error("invalid object id: {0}")]
    InvalidId(String),

    #[error("not a loose object: bad zlib header")]
    NotLooseObject,

    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("unknown object kind: {0}")]
    UnknownKind(String),

    #[error("corrupt pack {path}: {reason}")]
    CorruptPack { path: String, reason: String },

    #[error("unsupported pack or index version {0}")]
    UnknownPackVersion(u32),

    #[error("delta chain exceeded maximum depth")]
    DeltaLoop,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
