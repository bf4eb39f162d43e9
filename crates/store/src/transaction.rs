//! Single-writer transaction protocol over the head ref.
//!
//! A transaction takes an exclusive advisory flock on `<head-ref>.lock`,
//! refreshes the working tree if the head moved while waiting, runs the
//! caller's block, writes exactly one commit, and atomically swings the
//! head ref. The lock is released and the lock file unlinked on every exit
//! path; a failing block rolls the in-memory state back to the on-disk
//! head.

use crate::error::StoreError;
use crate::identity::Identity;
use crate::store::{atomic_write_file, normalize_message, signature_now, Store};
use anyhow::{Context, Result};
use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use vellum_core::{Commit, Object};

/// Diagnostic content written into the lock file.
#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: u64,
}

/// An exclusive advisory lock on a branch's `<head-ref>.lock` file.
///
/// Dropping the guard closes the handle (releasing the flock) and then
/// unlinks the lock file.
#[derive(Debug)]
pub struct HeadLock {
    path: PathBuf,
    file: Option<File>,
}

thread_local! {
    /// The at-most-one active transaction in this thread.
    static ACTIVE: RefCell<Option<HeadLock>> = const { RefCell::new(None) };
}

impl HeadLock {
    fn open_lock_file(lock_path: &Path) -> Result<File> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create refs directory")?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))
    }

    /// Block until the lock is held.
    pub fn acquire(ref_path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(ref_path);
        let mut file = Self::open_lock_file(&lock_path)?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;
        Self::write_content(&mut file)?;
        Ok(Self { path: lock_path, file: Some(file) })
    }

    /// Take the lock if free, fail with [`StoreError::LockContention`]
    /// otherwise.
    pub fn try_acquire(ref_path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(ref_path);
        let mut file = Self::open_lock_file(&lock_path)?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(nix::errno::Errno::EWOULDBLOCK) => return Err(StoreError::LockContention.into()),
            Err(e) => {
                return Err(anyhow::Error::from(e))
                    .with_context(|| format!("failed to lock {}", lock_path.display()))
            }
        }
        Self::write_content(&mut file)?;
        Ok(Self { path: lock_path, file: Some(file) })
    }

    fn write_content(file: &mut File) -> Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: current_timestamp_ms(),
        };
        let serialized =
            serde_json::to_string(&content).context("failed to serialize lock content")?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for HeadLock {
    fn drop(&mut self) {
        // Close first so the flock is observably released, then unlink.
        if let Some(file) = self.file.take() {
            drop(file);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path_for(ref_path: &Path) -> PathBuf {
    let mut name = ref_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    ref_path.with_file_name(name)
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn slot_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

fn slot_engage(lock: HeadLock) {
    ACTIVE.with(|slot| *slot.borrow_mut() = Some(lock));
}

fn slot_release() {
    // Dropping the guard unlocks and unlinks.
    ACTIVE.with(|slot| slot.borrow_mut().take());
}

impl Store {
    /// Run `block` inside a transaction and commit its edits as one new
    /// snapshot with `message`.
    ///
    /// Lock acquisition blocks until the current writer finishes. If
    /// `block` or the commit itself fails, the store rolls back to the
    /// on-disk head and the originating error is rethrown; the lock is
    /// released on every path. Requires a filesystem with working advisory
    /// locks.
    pub fn transaction<T>(
        &mut self,
        message: &str,
        block: impl FnOnce(&mut Store) -> Result<T>,
    ) -> Result<T> {
        self.begin(HeadLock::acquire)?;
        self.run_locked(message, block)
    }

    /// Like [`Store::transaction`], but fails immediately with
    /// [`StoreError::LockContention`] when another writer holds the lock.
    pub fn try_transaction<T>(
        &mut self,
        message: &str,
        block: impl FnOnce(&mut Store) -> Result<T>,
    ) -> Result<T> {
        self.begin(HeadLock::try_acquire)?;
        self.run_locked(message, block)
    }

    fn run_locked<T>(
        &mut self,
        message: &str,
        block: impl FnOnce(&mut Store) -> Result<T>,
    ) -> Result<T> {
        match block(self) {
            Ok(value) => match self.commit_locked(message) {
                Ok(()) => {
                    self.end_transaction();
                    Ok(value)
                }
                Err(e) => {
                    self.rollback_and_end();
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback_and_end();
                Err(e.context(StoreError::TransactionAborted))
            }
        }
    }

    /// Acquire the lock and refresh from disk if the head moved while we
    /// waited for it.
    fn begin(&mut self, acquire: impl FnOnce(&Path) -> Result<HeadLock>) -> Result<()> {
        if slot_active() {
            return Err(StoreError::NestedTransaction.into());
        }
        let lock = acquire(&self.ref_path())?;
        slot_engage(lock);

        let refreshed = (|| -> Result<()> {
            if self.read_head_ref()? != self.head {
                tracing::debug!(branch = %self.branch, "head moved before lock; reloading");
                self.reload()?;
            }
            Ok(())
        })();
        if let Err(e) = refreshed {
            self.end_transaction();
            return Err(e);
        }
        Ok(())
    }

    /// Write the working tree, build the commit, and swing the head ref.
    fn commit_locked(&mut self, message: &str) -> Result<()> {
        let tree = self.root.write(&self.odb, &self.handlers)?;
        let signature = signature_now(&Identity::resolve());
        let commit = Commit {
            tree,
            parents: self.head.into_iter().collect(),
            author: signature.clone(),
            committer: signature,
            message: normalize_message(message),
        };
        let id = self.odb.put(Object::Commit(commit))?;

        atomic_write_file(&self.ref_path(), format!("{id}\n").as_bytes())?;
        self.head = Some(id);
        tracing::debug!(branch = %self.branch, %id, "committed");
        Ok(())
    }

    /// Drop all in-memory state and mirror the on-disk head again.
    fn rollback_locked(&mut self) -> Result<()> {
        self.odb.clear();
        self.reload()
    }

    fn rollback_and_end(&mut self) {
        if let Err(e) = self.rollback_locked() {
            tracing::warn!(branch = %self.branch, "rollback failed: {e:#}");
        }
        self.end_transaction();
    }

    /// Release the lock and unlink the lock file, always.
    fn end_transaction(&mut self) {
        slot_release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_appends_suffix() {
        let path = lock_path_for(Path::new("/repo/.git/refs/heads/main"));
        assert_eq!(path, Path::new("/repo/.git/refs/heads/main.lock"));
    }

    #[test]
    fn lock_roundtrip_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let ref_path = dir.path().join("refs/heads/main");
        let lock = HeadLock::acquire(&ref_path).unwrap();
        let lock_file = dir.path().join("refs/heads/main.lock");
        assert!(lock_file.exists());
        drop(lock);
        assert!(!lock_file.exists());
    }

    #[test]
    fn second_try_acquire_contends() {
        let dir = tempfile::tempdir().unwrap();
        let ref_path = dir.path().join("refs/heads/main");
        let _held = HeadLock::acquire(&ref_path).unwrap();
        let err = HeadLock::try_acquire(&ref_path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::LockContention)
        ));
    }

    #[test]
    fn lock_file_carries_pid() {
        let dir = tempfile::tempdir().unwrap();
        let ref_path = dir.path().join("refs/heads/main");
        let _held = HeadLock::acquire(&ref_path).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("refs/heads/main.lock")).unwrap();
        let content: LockContent = serde_json::from_str(&raw).unwrap();
        assert_eq!(content.pid, std::process::id());
        assert!(content.started_at > 0);
    }
}
