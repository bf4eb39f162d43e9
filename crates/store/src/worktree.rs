//! Mutable overlay over a persisted tree.
//!
//! Each level maps names to nodes. Nodes begin life as references to
//! persisted objects and are materialized only on the mutating path;
//! the reading path walks persisted trees through the object database, so
//! lookups never change the overlay. `write` persists dirty nodes
//! bottom-up and yields the new root tree id.

use crate::payload::{Handlers, Payload};
use ahash::AHashMap;
use anyhow::{bail, Result};
use vellum_core::{EntryMode, Object, ObjectDb, ObjectId, Tree, TreeEntry};

/// One directory level of the overlay.
#[derive(Debug, Default)]
pub struct WorkTree {
    entries: AHashMap<String, Node>,
    /// Id of the persisted tree this level mirrors, valid while clean.
    id: Option<ObjectId>,
    dirty: bool,
}

#[derive(Debug)]
enum Node {
    /// Materialized subtree.
    Tree(WorkTree),
    /// Subtree still identical to the persisted object.
    TreeRef(ObjectId),
    /// Materialized leaf.
    Leaf(Leaf),
    /// Leaf still identical to the persisted blob.
    LeafRef { mode: EntryMode, id: ObjectId },
}

#[derive(Debug)]
struct Leaf {
    payload: Payload,
    mode: EntryMode,
    /// Blob id once serialized; `None` until first write.
    id: Option<ObjectId>,
    dirty: bool,
}

/// Split a `/`-separated path into components, rejecting traversal.
fn split_path(path: &str) -> Result<Vec<&str>> {
    let mut components = Vec::new();
    for component in path.split('/') {
        match component {
            "" => continue,
            "." | ".." => bail!("path traversal not allowed: {path}"),
            other => components.push(other),
        }
    }
    Ok(components)
}

impl WorkTree {
    /// An empty overlay, mirroring nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mirror a persisted tree object.
    pub fn from_tree(odb: &ObjectDb, id: ObjectId) -> Result<Self> {
        let object = odb.get(&id)?;
        let Object::Tree(tree) = object.as_ref() else {
            bail!("object {id} is not a tree");
        };

        let mut entries = AHashMap::new();
        for entry in tree.entries() {
            let node = if entry.mode.is_directory() {
                Node::TreeRef(entry.id)
            } else {
                Node::LeafRef { mode: entry.mode, id: entry.id }
            };
            entries.insert(entry.name.clone(), node);
        }
        Ok(Self { entries, id: Some(id), dirty: false })
    }

    /// Whether any node below this level has uncommitted edits.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- reads ---------------------------------------------------------

    /// Decoded payload at `path`, or `None` if any component is absent.
    pub fn get(&self, odb: &ObjectDb, handlers: &Handlers, path: &str) -> Result<Option<Payload>> {
        let components = split_path(path)?;
        if components.is_empty() {
            return Ok(None);
        }
        self.get_components(odb, handlers, &components)
    }

    fn get_components(
        &self,
        odb: &ObjectDb,
        handlers: &Handlers,
        components: &[&str],
    ) -> Result<Option<Payload>> {
        let (head, rest) = match components.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        match self.entries.get(*head) {
            None => Ok(None),
            Some(Node::Tree(sub)) if !rest.is_empty() => {
                sub.get_components(odb, handlers, rest)
            }
            Some(Node::TreeRef(id)) if !rest.is_empty() => {
                get_persisted(odb, handlers, *id, rest)
            }
            Some(Node::Leaf(leaf)) if rest.is_empty() => Ok(Some(leaf.payload.clone())),
            Some(Node::LeafRef { id, .. }) if rest.is_empty() => {
                Ok(Some(decode_blob(odb, handlers, head, *id)?))
            }
            // A file where a directory was expected, or vice versa.
            Some(_) => Ok(None),
        }
    }

    /// Raw blob bytes at `path`, bypassing the payload codec.
    pub fn get_bytes(
        &self,
        odb: &ObjectDb,
        handlers: &Handlers,
        path: &str,
    ) -> Result<Option<Vec<u8>>> {
        let components = split_path(path)?;
        if components.is_empty() {
            return Ok(None);
        }
        self.get_bytes_components(odb, handlers, &components)
    }

    fn get_bytes_components(
        &self,
        odb: &ObjectDb,
        handlers: &Handlers,
        components: &[&str],
    ) -> Result<Option<Vec<u8>>> {
        let (head, rest) = match components.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        match self.entries.get(*head) {
            None => Ok(None),
            Some(Node::Tree(sub)) if !rest.is_empty() => {
                sub.get_bytes_components(odb, handlers, rest)
            }
            Some(Node::TreeRef(id)) if !rest.is_empty() => {
                match find_persisted_leaf(odb, *id, rest)? {
                    Some((_, id)) => Ok(Some(read_blob_bytes(odb, &id)?)),
                    None => Ok(None),
                }
            }
            Some(Node::Leaf(leaf)) if rest.is_empty() => {
                Ok(Some(handlers.for_path(head).encode(head, &leaf.payload)?))
            }
            Some(Node::LeafRef { id, .. }) if rest.is_empty() => {
                Ok(Some(read_blob_bytes(odb, id)?))
            }
            Some(_) => Ok(None),
        }
    }

    // --- writes --------------------------------------------------------

    /// Store `payload` at `path`, creating intermediate levels as needed
    /// and marking the whole chain dirty.
    pub fn set(&mut self, odb: &ObjectDb, path: &str, payload: Payload) -> Result<()> {
        let components = split_path(path)?;
        if components.is_empty() {
            bail!("cannot set the empty path");
        }
        self.set_components(odb, &components, payload)
    }

    fn set_components(&mut self, odb: &ObjectDb, components: &[&str], payload: Payload) -> Result<()> {
        let (head, rest) = match components.split_first() {
            Some(split) => split,
            None => bail!("cannot set the empty path"),
        };
        self.dirty = true;
        if rest.is_empty() {
            // Keep the mode of whatever the leaf replaces.
            let mode = match self.entries.get(*head) {
                Some(Node::Leaf(leaf)) => leaf.mode,
                Some(Node::LeafRef { mode, .. }) => *mode,
                _ => EntryMode::Regular,
            };
            self.entries.insert(
                (*head).to_string(),
                Node::Leaf(Leaf { payload, mode, id: None, dirty: true }),
            );
            Ok(())
        } else {
            self.subtree_mut(odb, head)?.set_components(odb, rest, payload)
        }
    }

    /// Remove the leaf at `path`; empty parents collapse away. Returns
    /// whether anything was removed.
    pub fn delete(&mut self, odb: &ObjectDb, path: &str) -> Result<bool> {
        let components = split_path(path)?;
        if components.is_empty() {
            return Ok(false);
        }
        self.delete_components(odb, &components)
    }

    fn delete_components(&mut self, odb: &ObjectDb, components: &[&str]) -> Result<bool> {
        let (head, rest) = match components.split_first() {
            Some(split) => split,
            None => return Ok(false),
        };
        if rest.is_empty() {
            match self.entries.get(*head) {
                Some(Node::Leaf(_)) | Some(Node::LeafRef { .. }) => {
                    self.entries.remove(*head);
                    self.dirty = true;
                    Ok(true)
                }
                _ => Ok(false),
            }
        } else {
            let removed;
            let now_empty;
            {
                let Some(node) = self.entries.get_mut(*head) else {
                    return Ok(false);
                };
                let materialize = match node {
                    Node::TreeRef(id) => Some(*id),
                    Node::Tree(_) => None,
                    _ => return Ok(false),
                };
                if let Some(id) = materialize {
                    *node = Node::Tree(WorkTree::from_tree(odb, id)?);
                }
                let Node::Tree(sub) = node else {
                    return Ok(false);
                };
                removed = sub.delete_components(odb, rest)?;
                now_empty = sub.entries.is_empty();
            }
            if removed {
                self.dirty = true;
                if now_empty {
                    self.entries.remove(*head);
                }
            }
            Ok(removed)
        }
    }

    /// Ensure a nested level exists at `path` and hand it back.
    pub fn tree(&mut self, odb: &ObjectDb, path: &str) -> Result<&mut WorkTree> {
        let components = split_path(path)?;
        self.tree_components(odb, &components)
    }

    fn tree_components(&mut self, odb: &ObjectDb, components: &[&str]) -> Result<&mut WorkTree> {
        match components.split_first() {
            None => Ok(self),
            Some((head, rest)) => {
                self.dirty = true;
                self.subtree_mut(odb, head)?.tree_components(odb, rest)
            }
        }
    }

    /// Coerce the node at `name` into a materialized subtree.
    ///
    /// A leaf in the way is replaced: writing `a/b` after `a` was a value
    /// overwrites the value with a directory.
    fn subtree_mut(&mut self, odb: &ObjectDb, name: &str) -> Result<&mut WorkTree> {
        let node = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Node::Tree(WorkTree::empty()));

        let materialize = match node {
            Node::TreeRef(id) => Some(*id),
            _ => None,
        };
        if let Some(id) = materialize {
            *node = Node::Tree(WorkTree::from_tree(odb, id)?);
        } else if matches!(node, Node::Leaf(_) | Node::LeafRef { .. }) {
            *node = Node::Tree(WorkTree::empty());
        }

        match node {
            Node::Tree(sub) => Ok(sub),
            _ => unreachable!("node was coerced to a subtree"),
        }
    }

    // --- traversal -----------------------------------------------------

    /// Visit every leaf as `(path, payload)`, names sorted at each level.
    pub fn each<F>(&self, odb: &ObjectDb, handlers: &Handlers, visit: &mut F) -> Result<()>
    where
        F: FnMut(&str, Payload) -> Result<()>,
    {
        self.each_prefixed(odb, handlers, "", visit)
    }

    fn each_prefixed<F>(
        &self,
        odb: &ObjectDb,
        handlers: &Handlers,
        prefix: &str,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&str, Payload) -> Result<()>,
    {
        let mut items: Vec<(&String, &Node)> = self.entries.iter().collect();
        items.sort_by(|a, b| a.0.cmp(b.0));

        for (name, node) in items {
            let path = join_path(prefix, name);
            match node {
                Node::Leaf(leaf) => visit(&path, leaf.payload.clone())?,
                Node::LeafRef { id, .. } => visit(&path, decode_blob(odb, handlers, name, *id)?)?,
                Node::Tree(sub) => sub.each_prefixed(odb, handlers, &path, visit)?,
                Node::TreeRef(id) => each_persisted(odb, handlers, *id, &path, visit)?,
            }
        }
        Ok(())
    }

    /// All leaf paths in canonical order.
    pub fn paths(&self, odb: &ObjectDb, handlers: &Handlers) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.each(odb, handlers, &mut |path, _| {
            out.push(path.to_string());
            Ok(())
        })?;
        Ok(out)
    }

    /// All leaf payloads in canonical order.
    pub fn values(&self, odb: &ObjectDb, handlers: &Handlers) -> Result<Vec<Payload>> {
        let mut out = Vec::new();
        self.each(odb, handlers, &mut |_, payload| {
            out.push(payload);
            Ok(())
        })?;
        Ok(out)
    }

    /// The whole overlay as one nested YAML mapping.
    pub fn to_mapping(&self, odb: &ObjectDb, handlers: &Handlers) -> Result<serde_yaml::Value> {
        let mut items: Vec<(&String, &Node)> = self.entries.iter().collect();
        items.sort_by(|a, b| a.0.cmp(b.0));

        let mut mapping = serde_yaml::Mapping::new();
        for (name, node) in items {
            let value = match node {
                Node::Leaf(leaf) => payload_value(leaf.payload.clone()),
                Node::LeafRef { id, .. } => payload_value(decode_blob(odb, handlers, name, *id)?),
                Node::Tree(sub) => sub.to_mapping(odb, handlers)?,
                Node::TreeRef(id) => persisted_mapping(odb, handlers, *id)?,
            };
            mapping.insert(serde_yaml::Value::String(name.clone()), value);
        }
        Ok(serde_yaml::Value::Mapping(mapping))
    }

    // --- persistence ---------------------------------------------------

    /// Persist every dirty node bottom-up; returns the root tree id.
    pub fn write(&mut self, odb: &ObjectDb, handlers: &Handlers) -> Result<ObjectId> {
        match self.write_inner(odb, handlers)? {
            Some(id) => Ok(id),
            // Nothing to hold: the root becomes the empty tree.
            None => {
                let id = odb.put(Object::Tree(Tree::default()))?;
                self.id = Some(id);
                self.dirty = false;
                Ok(id)
            }
        }
    }

    /// Returns `None` for levels that ended up empty, so parents can drop
    /// them instead of persisting empty trees.
    fn write_inner(&mut self, odb: &ObjectDb, handlers: &Handlers) -> Result<Option<ObjectId>> {
        if !self.dirty {
            if let Some(id) = self.id {
                return Ok(Some(id));
            }
        }

        let mut tree_entries = Vec::with_capacity(self.entries.len());
        for (name, node) in self.entries.iter_mut() {
            let (mode, id) = match node {
                Node::Leaf(leaf) => {
                    let id = match (leaf.dirty, leaf.id) {
                        (false, Some(id)) => id,
                        _ => {
                            let bytes = handlers.for_path(name).encode(name, &leaf.payload)?;
                            let id = odb.put(Object::Blob(bytes))?;
                            leaf.id = Some(id);
                            leaf.dirty = false;
                            id
                        }
                    };
                    (leaf.mode, id)
                }
                Node::LeafRef { mode, id } => (*mode, *id),
                Node::TreeRef(id) => (EntryMode::Directory, *id),
                Node::Tree(sub) => match sub.write_inner(odb, handlers)? {
                    Some(id) => (EntryMode::Directory, id),
                    None => continue,
                },
            };
            tree_entries.push(TreeEntry::new(mode, name.clone(), id));
        }

        if tree_entries.is_empty() {
            return Ok(None);
        }

        let tree = Tree::from_entries(tree_entries)?;
        let id = odb.put(Object::Tree(tree))?;
        self.id = Some(id);
        self.dirty = false;
        Ok(Some(id))
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Walk persisted trees for a read that never left the object database.
fn get_persisted(
    odb: &ObjectDb,
    handlers: &Handlers,
    tree_id: ObjectId,
    components: &[&str],
) -> Result<Option<Payload>> {
    match find_persisted_leaf(odb, tree_id, components)? {
        Some((name, id)) => Ok(Some(decode_blob(odb, handlers, &name, id)?)),
        None => Ok(None),
    }
}

/// Resolve `components` below a persisted tree to `(leaf name, blob id)`.
fn find_persisted_leaf(
    odb: &ObjectDb,
    tree_id: ObjectId,
    components: &[&str],
) -> Result<Option<(String, ObjectId)>> {
    let (leaf_name, dirs) = match components.split_last() {
        Some(split) => split,
        None => return Ok(None),
    };

    let mut current = tree_id;
    for dir in dirs {
        let object = odb.get(&current)?;
        let Object::Tree(tree) = object.as_ref() else {
            bail!("object {current} is not a tree");
        };
        match tree.entry(dir) {
            Some(entry) if entry.mode.is_directory() => current = entry.id,
            _ => return Ok(None),
        }
    }

    let object = odb.get(&current)?;
    let Object::Tree(tree) = object.as_ref() else {
        bail!("object {current} is not a tree");
    };
    match tree.entry(leaf_name) {
        Some(entry) if !entry.mode.is_directory() => {
            Ok(Some(((*leaf_name).to_string(), entry.id)))
        }
        _ => Ok(None),
    }
}

fn read_blob_bytes(odb: &ObjectDb, id: &ObjectId) -> Result<Vec<u8>> {
    let object = odb.get(id)?;
    let Object::Blob(bytes) = object.as_ref() else {
        bail!("object {id} is not a blob");
    };
    Ok(bytes.clone())
}

fn decode_blob(odb: &ObjectDb, handlers: &Handlers, name: &str, id: ObjectId) -> Result<Payload> {
    let bytes = read_blob_bytes(odb, &id)?;
    handlers.for_path(name).decode(name, &bytes)
}

fn each_persisted<F>(
    odb: &ObjectDb,
    handlers: &Handlers,
    tree_id: ObjectId,
    prefix: &str,
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(&str, Payload) -> Result<()>,
{
    let object = odb.get(&tree_id)?;
    let Object::Tree(tree) = object.as_ref() else {
        bail!("object {tree_id} is not a tree");
    };

    // Tree objects order directories as "name/"; traversal order is plain
    // name order, so re-sort.
    let mut entries: Vec<&TreeEntry> = tree.entries().iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        let path = join_path(prefix, &entry.name);
        if entry.mode.is_directory() {
            each_persisted(odb, handlers, entry.id, &path, visit)?;
        } else {
            visit(&path, decode_blob(odb, handlers, &entry.name, entry.id)?)?;
        }
    }
    Ok(())
}

fn persisted_mapping(
    odb: &ObjectDb,
    handlers: &Handlers,
    tree_id: ObjectId,
) -> Result<serde_yaml::Value> {
    let object = odb.get(&tree_id)?;
    let Object::Tree(tree) = object.as_ref() else {
        bail!("object {tree_id} is not a tree");
    };

    let mut entries: Vec<&TreeEntry> = tree.entries().iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut mapping = serde_yaml::Mapping::new();
    for entry in entries {
        let value = if entry.mode.is_directory() {
            persisted_mapping(odb, handlers, entry.id)?
        } else {
            payload_value(decode_blob(odb, handlers, &entry.name, entry.id)?)
        };
        mapping.insert(serde_yaml::Value::String(entry.name.clone()), value);
    }
    Ok(serde_yaml::Value::Mapping(mapping))
}

fn payload_value(payload: Payload) -> serde_yaml::Value {
    match payload {
        Payload::Doc(value) => value,
        Payload::Bytes(bytes) => {
            serde_yaml::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
