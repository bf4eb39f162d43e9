//! Unified object database over loose and packed storage.

use crate::error::OdbError;
use crate::id::ObjectId;
use crate::loose::LooseStore;
use crate::object::{Kind, Object};
use crate::pack::PackStore;
use crate::OdbResult;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;

/// Cached object access: loose objects first, then packs.
///
/// The cache is keyed by id; entries are immutable once written, so it can
/// be shared across transactions within a process without coherence
/// concerns. `clear` exists for transaction rollback.
pub struct ObjectDb {
    loose: LooseStore,
    packs: PackStore,
    cache: DashMap<ObjectId, Arc<Object>>,
}

impl ObjectDb {
    /// Open the object database under a repository's git directory.
    pub fn open(git_dir: &Path) -> OdbResult<Self> {
        let objects_dir = git_dir.join("objects");
        let packs = PackStore::open(&objects_dir.join("pack"))?;
        tracing::debug!(
            objects = %objects_dir.display(),
            packs = packs.pack_count(),
            "opened object database"
        );
        Ok(Self {
            loose: LooseStore::new(objects_dir),
            packs,
            cache: DashMap::new(),
        })
    }

    /// Fetch and decode an object.
    pub fn get(&self, id: &ObjectId) -> OdbResult<Arc<Object>> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(Arc::clone(hit.value()));
        }

        let (kind, bytes) = self.read_raw(id)?;
        let object = Arc::new(Object::decode(kind, &bytes)?);
        self.cache.insert(*id, Arc::clone(&object));
        Ok(object)
    }

    /// Fetch raw `(kind, bytes)` without decoding, bypassing the cache.
    pub fn read_raw(&self, id: &ObjectId) -> OdbResult<(Kind, Vec<u8>)> {
        match self.loose.read(id) {
            Ok(found) => Ok(found),
            Err(OdbError::NotFound(_)) => match self.packs.read(id, &self.loose)? {
                Some(found) => Ok(found),
                None => Err(OdbError::NotFound(*id)),
            },
            Err(e) => Err(e),
        }
    }

    /// Encode and persist an object, returning its id.
    pub fn put(&self, object: Object) -> OdbResult<ObjectId> {
        let (kind, bytes) = object.encode();
        let id = self.loose.write(kind, &bytes)?;
        self.cache.insert(id, Arc::new(object));
        Ok(id)
    }

    /// Check existence without reading.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.cache.contains_key(id) || self.loose.contains(id) || self.packs.contains(id)
    }

    /// Drop every cached object. Used on transaction rollback.
    pub fn clear(&self) {
        self.cache.clear();
        tracing::debug!("object cache cleared");
    }

    pub fn loose(&self) -> &LooseStore {
        &self.loose
    }

    pub fn packs(&self) -> &PackStore {
        &self.packs
    }
}
