//! The store façade: a path-addressed, versioned key-value surface.

use crate::error::StoreError;
use crate::identity::Identity;
use crate::payload::{Handlers, Payload};
use crate::worktree::WorkTree;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vellum_core::{Commit, Kind, Object, ObjectDb, ObjectId, OdbError, Signature, Tag};

/// Branch used when callers do not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// A versioned key-value store over a git-compatible object database.
///
/// Reads outside a transaction see the snapshot the branch head pointed at
/// when the store was opened or last refreshed. Writes accumulate in the
/// in-memory working tree and only reach disk through [`Store::transaction`].
pub struct Store {
    pub(crate) path: PathBuf,
    pub(crate) git_dir: PathBuf,
    pub(crate) branch: String,
    pub(crate) odb: ObjectDb,
    pub(crate) root: WorkTree,
    pub(crate) head: Option<ObjectId>,
    pub(crate) handlers: Handlers,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("git_dir", &self.git_dir)
            .field("branch", &self.branch)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open an existing repository.
    ///
    /// `path` must exist; for non-bare repositories `path/.git` must exist
    /// too. Bootstrap of the directory layout is someone else's job.
    pub fn open(path: impl AsRef<Path>, branch: &str, bare: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(StoreError::RepositoryMissing(path).into());
        }
        let git_dir = if bare { path.clone() } else { path.join(".git") };
        if !git_dir.is_dir() {
            return Err(StoreError::RepositoryMissing(git_dir).into());
        }

        let odb = ObjectDb::open(&git_dir)?;
        let mut store = Self {
            path,
            git_dir,
            branch: branch.to_string(),
            odb,
            root: WorkTree::empty(),
            head: None,
            handlers: Handlers::default(),
        };
        store.reload()?;
        tracing::debug!(repo = %store.path.display(), branch, head = ?store.head, "opened store");
        Ok(store)
    }

    /// Open with the default branch, non-bare.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, DEFAULT_BRANCH, false)
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The commit the in-memory state is based on, if any.
    pub fn head_id(&self) -> Option<ObjectId> {
        self.head
    }

    /// The payload codec registry, for registering custom extensions.
    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    pub(crate) fn ref_path(&self) -> PathBuf {
        self.git_dir.join("refs").join("heads").join(&self.branch)
    }

    /// Head commit id currently on disk, `None` for an empty repository.
    pub(crate) fn read_head_ref(&self) -> Result<Option<ObjectId>> {
        match fs::read_to_string(self.ref_path()) {
            Ok(content) => {
                let id = ObjectId::from_hex(content.trim())
                    .with_context(|| format!("unreadable head ref for branch {}", self.branch))?;
                Ok(Some(id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Throw away in-memory state and mirror the on-disk head.
    pub(crate) fn reload(&mut self) -> Result<()> {
        let head = self.read_head_ref()?;
        self.root = match head {
            Some(commit_id) => {
                let commit = self.commit(commit_id)?;
                WorkTree::from_tree(&self.odb, commit.tree)?
            }
            None => WorkTree::empty(),
        };
        self.head = head;
        Ok(())
    }

    // --- path-addressed access ----------------------------------------

    /// Decoded value at `path`, or `None` when absent.
    pub fn get(&self, path: &str) -> Result<Option<Payload>> {
        self.root.get(&self.odb, &self.handlers, path)
    }

    /// Raw bytes at `path`, bypassing the payload codec.
    pub fn get_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.root.get_bytes(&self.odb, &self.handlers, path)
    }

    /// Stage a value at `path`. Visible to this handle immediately,
    /// persisted by the surrounding or next transaction.
    pub fn set(&mut self, path: &str, payload: impl Into<Payload>) -> Result<()> {
        self.root.set(&self.odb, path, payload.into())
    }

    /// Stage raw bytes at `path`.
    pub fn set_bytes(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.root.set(&self.odb, path, Payload::Bytes(bytes.into()))
    }

    /// Stage removal of the leaf at `path`; empty parents collapse.
    pub fn delete(&mut self, path: &str) -> Result<bool> {
        self.root.delete(&self.odb, path)
    }

    /// Mutable handle on a nested level of the working tree.
    pub fn tree(&mut self, path: &str) -> Result<&mut WorkTree> {
        self.root.tree(&self.odb, path)
    }

    /// Every stored path, sorted at each level.
    pub fn paths(&self) -> Result<Vec<String>> {
        self.root.paths(&self.odb, &self.handlers)
    }

    /// Every stored value, in path order.
    pub fn values(&self) -> Result<Vec<Payload>> {
        self.root.values(&self.odb, &self.handlers)
    }

    /// Visit every `(path, value)` pair.
    pub fn each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, Payload) -> Result<()>,
    {
        self.root.each(&self.odb, &self.handlers, &mut visit)
    }

    /// The whole store as one nested mapping.
    pub fn to_mapping(&self) -> Result<serde_yaml::Value> {
        self.root.to_mapping(&self.odb, &self.handlers)
    }

    // --- objects and history ------------------------------------------

    /// Fetch any object by id.
    pub fn object(&self, id: ObjectId) -> Result<Arc<Object>> {
        Ok(self.odb.get(&id)?)
    }

    /// Fetch a commit by id.
    pub fn commit(&self, id: ObjectId) -> Result<Commit> {
        let object = self.odb.get(&id)?;
        match object.as_ref() {
            Object::Commit(commit) => Ok(commit.clone()),
            other => bail!("object {id} is a {}, not a commit", other.kind()),
        }
    }

    /// Up to `limit` commits from the head, newest first.
    pub fn commits(&self, limit: usize) -> Result<Vec<(ObjectId, Commit)>> {
        self.commits_from(self.head, limit)
    }

    /// Up to `limit` commits walking first parents from `start`.
    pub fn commits_from(
        &self,
        start: Option<ObjectId>,
        limit: usize,
    ) -> Result<Vec<(ObjectId, Commit)>> {
        let mut out = Vec::new();
        let mut cursor = start;
        while let Some(id) = cursor {
            if out.len() >= limit {
                break;
            }
            let commit = self.commit(id)?;
            cursor = commit.first_parent();
            out.push((id, commit));
        }
        Ok(out)
    }

    /// Has the on-disk head moved away from the in-memory one?
    pub fn is_changed(&self) -> Result<bool> {
        Ok(self.read_head_ref()? != self.head)
    }

    /// Reload if the on-disk head moved. Returns whether a reload happened.
    pub fn refresh(&mut self) -> Result<bool> {
        if self.is_changed()? {
            tracing::debug!(branch = %self.branch, "head moved on disk; reloading");
            self.reload()?;
            return Ok(true);
        }
        Ok(false)
    }

    // --- refs ----------------------------------------------------------

    /// All branch names with a head ref on disk.
    pub fn branches(&self) -> Result<Vec<String>> {
        self.list_refs("heads").map(|refs| refs.into_iter().map(|(name, _)| name).collect())
    }

    /// All tags as `(name, id)` pairs.
    pub fn tags(&self) -> Result<Vec<(String, ObjectId)>> {
        self.list_refs("tags")
    }

    fn list_refs(&self, category: &str) -> Result<Vec<(String, ObjectId)>> {
        let dir = self.git_dir.join("refs").join(category);
        let mut out = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-progress transactions leave a lock file beside the ref.
            if name.ends_with(".lock") || !entry.file_type()?.is_file() {
                continue;
            }
            let content = fs::read_to_string(entry.path())?;
            if let Ok(id) = ObjectId::from_hex(content.trim()) {
                out.push((name, id));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Create an annotated tag pointing at the current head commit.
    pub fn tag(&mut self, name: &str, message: &str) -> Result<ObjectId> {
        let Some(head) = self.head else {
            bail!("cannot tag an empty repository");
        };
        if name.is_empty() || name.contains('/') {
            bail!("invalid tag name: {name:?}");
        }

        let tag = Tag {
            object: head,
            kind: Kind::Commit,
            name: name.to_string(),
            tagger: signature_now(&Identity::resolve()),
            message: normalize_message(message),
        };
        let id = self.odb.put(Object::Tag(tag))?;

        let ref_path = self.git_dir.join("refs").join("tags").join(name);
        atomic_write_file(&ref_path, format!("{id}\n").as_bytes())?;
        tracing::debug!(tag = name, %id, "tagged head");
        Ok(id)
    }

    /// Resolve an id prefix or full hex id against the object database.
    pub fn resolve_id(&self, hex: &str) -> Result<ObjectId> {
        if hex.len() == 40 {
            return Ok(ObjectId::from_hex(hex)?);
        }
        // Short forms: scan the history for a unique prefix.
        let mut matches = Vec::new();
        for (id, _) in self.commits(usize::MAX)? {
            if id.to_hex().starts_with(hex) {
                matches.push(id);
            }
        }
        match matches.as_slice() {
            [one] => Ok(*one),
            [] => Err(OdbError::InvalidId(format!("no commit matches {hex:?}")).into()),
            _ => bail!("ambiguous id prefix {hex:?}"),
        }
    }
}

/// Signature for the current identity at the current instant.
pub(crate) fn signature_now(identity: &Identity) -> Signature {
    let now = chrono::Local::now();
    Signature::new(
        identity.name.clone(),
        identity.email.clone(),
        now.timestamp(),
        now.format("%z").to_string(),
    )
}

/// Commit messages are stored newline-terminated.
pub(crate) fn normalize_message(message: &str) -> String {
    let mut out = message.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Atomic write pattern: write to temp, fsync, rename.
pub(crate) fn atomic_write_file(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .with_context(|| format!("no parent directory for {}", target.display()))?;
    fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);
    fs::rename(&temp_path, target)?;

    // Fsync the directory for durability; best effort
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_message_appends_newline_once() {
        assert_eq!(normalize_message("msg"), "msg\n");
        assert_eq!(normalize_message("msg\n"), "msg\n");
        assert_eq!(normalize_message(""), "\n");
    }

    #[test]
    fn signature_now_is_well_formed() {
        let identity = Identity {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        };
        let sig = signature_now(&identity);
        assert!(sig.time > 0);
        assert_eq!(sig.offset.len(), 5);
        assert!(sig.offset.starts_with('+') || sig.offset.starts_with('-'));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("ref");
        atomic_write_file(&target, b"first\n").unwrap();
        atomic_write_file(&target, b"second\n").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second\n");
        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn open_rejects_missing_repository() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nowhere");
        let err = Store::open(&missing, DEFAULT_BRANCH, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::RepositoryMissing(_))
        ));

        // A directory without .git is missing too.
        let bare_less = dir.path();
        let err = Store::open(bare_less, DEFAULT_BRANCH, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::RepositoryMissing(_))
        ));
    }
}
