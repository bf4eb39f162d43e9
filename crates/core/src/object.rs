//! The four object kinds and their canonical byte forms.
//!
//! Encoding and decoding are mutual inverses for every kind, and the id of
//! an object is the SHA-1 of `"<kind> <len>\0<content>"`, so equal logical
//! values always land under equal ids.

use crate::error::OdbError;
use crate::id::ObjectId;
use crate::OdbResult;
use sha1::{Digest, Sha1};
use std::cmp::Ordering;

/// The kind tag of a stored object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parse a kind tag as it appears in object headers.
    pub fn from_bytes(bytes: &[u8]) -> OdbResult<Self> {
        match bytes {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            other => Err(OdbError::UnknownKind(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the content id: SHA-1 over `"<kind> <len>\0<content>"`.
pub fn id_for(kind: Kind, content: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(content);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest);
    ObjectId::from_bytes(bytes)
}

/// File mode of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
    /// Subtree (0o40000).
    Directory,
}

impl EntryMode {
    /// Octal mode value as stored in tree objects.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o40000,
        }
    }

    /// Parse from an octal mode value.
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o40000 => Some(Self::Directory),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// A single entry in a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    /// Path component: non-empty, no `/`, no NUL.
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }
}

/// Canonical tree-entry ordering: byte order on names, with directory
/// names compared as if suffixed by `/`.
fn entry_cmp(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let an = a.name.as_bytes();
    let bn = b.name.as_bytes();
    let common = an.len().min(bn.len());
    match an[..common].cmp(&bn[..common]) {
        Ordering::Equal => {
            let ca = tail_byte(an, common, a.mode.is_directory());
            let cb = tail_byte(bn, common, b.mode.is_directory());
            ca.cmp(&cb)
        }
        ordering => ordering,
    }
}

fn tail_byte(name: &[u8], pos: usize, is_dir: bool) -> u8 {
    match name.get(pos) {
        Some(&b) => b,
        None if is_dir => b'/',
        None => 0,
    }
}

/// A directory listing: entries in canonical order, names unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree from entries in any order.
    ///
    /// Entries are sorted canonically so equivalent logical trees always
    /// encode to identical bytes. Duplicate names are rejected.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> OdbResult<Self> {
        entries.sort_by(entry_cmp);
        for pair in entries.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(OdbError::MalformedObject(format!(
                    "duplicate tree entry name: {}",
                    pair[0].name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Author or committer line: name, email, seconds since epoch, tz offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Timezone offset, e.g. `+0200`.
    pub offset: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64, offset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            offset: offset.into(),
        }
    }

    fn parse(line: &str) -> OdbResult<Self> {
        let malformed = |what: &str| OdbError::MalformedObject(format!("{what} in signature line: {line:?}"));

        let lt = line.find('<').ok_or_else(|| malformed("missing email"))?;
        let gt = line[lt..].find('>').map(|i| lt + i).ok_or_else(|| malformed("unterminated email"))?;
        let name = line[..lt].trim_end().to_string();
        let email = line[lt + 1..gt].to_string();

        let mut rest = line[gt + 1..].split_whitespace();
        let time = rest
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(|| malformed("missing timestamp"))?;
        let offset = rest.next().ok_or_else(|| malformed("missing timezone"))?.to_string();
        Ok(Self { name, email, time, offset })
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}> {} {}", self.name, self.email, self.time, self.offset)
    }
}

/// A snapshot: a root tree, parent commits, authorship, and a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    /// Short first line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// First parent, the one history traversal follows.
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

/// An annotated tag pointing at another object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub object: ObjectId,
    pub kind: Kind,
    pub name: String,
    pub tagger: Signature,
    pub message: String,
}

/// A decoded object of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Blob(_) => Kind::Blob,
            Self::Tree(_) => Kind::Tree,
            Self::Commit(_) => Kind::Commit,
            Self::Tag(_) => Kind::Tag,
        }
    }

    /// Serialize to the canonical byte form.
    pub fn encode(&self) -> (Kind, Vec<u8>) {
        let bytes = match self {
            Self::Blob(data) => data.clone(),
            Self::Tree(tree) => encode_tree(tree),
            Self::Commit(commit) => encode_commit(commit),
            Self::Tag(tag) => encode_tag(tag),
        };
        (self.kind(), bytes)
    }

    /// Decode the canonical byte form of the given kind.
    pub fn decode(kind: Kind, bytes: &[u8]) -> OdbResult<Self> {
        match kind {
            Kind::Blob => Ok(Self::Blob(bytes.to_vec())),
            Kind::Tree => decode_tree(bytes).map(Self::Tree),
            Kind::Commit => decode_commit(bytes).map(Self::Commit),
            Kind::Tag => decode_tag(bytes).map(Self::Tag),
        }
    }

    /// The content id of this object's encoded form.
    pub fn id(&self) -> ObjectId {
        let (kind, bytes) = self.encode();
        id_for(kind, &bytes)
    }
}

fn encode_tree(tree: &Tree) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in tree.entries() {
        out.extend_from_slice(format!("{:o} ", entry.mode.mode_bits()).as_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

fn decode_tree(bytes: &[u8]) -> OdbResult<Tree> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let space = bytes[pos..]
            .iter()
            .position(|&b| b == b' ')
            .map(|i| pos + i)
            .ok_or_else(|| OdbError::MalformedObject("tree entry missing mode terminator".into()))?;
        let mode_str = std::str::from_utf8(&bytes[pos..space])
            .map_err(|_| OdbError::MalformedObject("tree entry mode is not ASCII".into()))?;
        let mode_bits = u32::from_str_radix(mode_str, 8)
            .map_err(|_| OdbError::MalformedObject(format!("bad tree entry mode: {mode_str:?}")))?;
        let mode = EntryMode::from_mode_bits(mode_bits)
            .ok_or_else(|| OdbError::MalformedObject(format!("unsupported tree entry mode: {mode_bits:o}")))?;

        let nul = bytes[space + 1..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| space + 1 + i)
            .ok_or_else(|| OdbError::MalformedObject("tree entry missing name terminator".into()))?;
        let name = std::str::from_utf8(&bytes[space + 1..nul])
            .map_err(|_| OdbError::MalformedObject("tree entry name is not UTF-8".into()))?
            .to_string();
        if name.is_empty() {
            return Err(OdbError::MalformedObject("empty tree entry name".into()));
        }

        let id_end = nul + 1 + 20;
        if id_end > bytes.len() {
            return Err(OdbError::MalformedObject("truncated tree entry id".into()));
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&bytes[nul + 1..id_end]);
        entries.push(TreeEntry::new(mode, name, ObjectId::from_bytes(id)));
        pos = id_end;
    }
    Tree::from_entries(entries)
}

fn encode_commit(commit: &Commit) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("tree {}\n", commit.tree));
    for parent in &commit.parents {
        out.push_str(&format!("parent {parent}\n"));
    }
    out.push_str(&format!("author {}\n", commit.author));
    out.push_str(&format!("committer {}\n", commit.committer));
    out.push('\n');
    out.push_str(&commit.message);
    out.into_bytes()
}

fn decode_commit(bytes: &[u8]) -> OdbResult<Commit> {
    let (headers, message) = split_headers(bytes)?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    for line in headers.lines() {
        if let Some(hex) = line.strip_prefix("tree ") {
            tree = Some(ObjectId::from_hex(hex)?);
        } else if let Some(hex) = line.strip_prefix("parent ") {
            parents.push(ObjectId::from_hex(hex)?);
        } else if let Some(sig) = line.strip_prefix("author ") {
            author = Some(Signature::parse(sig)?);
        } else if let Some(sig) = line.strip_prefix("committer ") {
            committer = Some(Signature::parse(sig)?);
        }
        // Unknown header lines (gpgsig, encoding, ...) are carried by real
        // repositories; they do not affect the fields this store reads.
    }

    Ok(Commit {
        tree: tree.ok_or_else(|| OdbError::MalformedObject("commit missing tree header".into()))?,
        parents,
        author: author.ok_or_else(|| OdbError::MalformedObject("commit missing author header".into()))?,
        committer: committer
            .ok_or_else(|| OdbError::MalformedObject("commit missing committer header".into()))?,
        message,
    })
}

fn encode_tag(tag: &Tag) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("object {}\n", tag.object));
    out.push_str(&format!("type {}\n", tag.kind));
    out.push_str(&format!("tag {}\n", tag.name));
    out.push_str(&format!("tagger {}\n", tag.tagger));
    out.push('\n');
    out.push_str(&tag.message);
    out.into_bytes()
}

fn decode_tag(bytes: &[u8]) -> OdbResult<Tag> {
    let (headers, message) = split_headers(bytes)?;

    let mut object = None;
    let mut kind = None;
    let mut name = None;
    let mut tagger = None;
    for line in headers.lines() {
        if let Some(hex) = line.strip_prefix("object ") {
            object = Some(ObjectId::from_hex(hex)?);
        } else if let Some(k) = line.strip_prefix("type ") {
            kind = Some(Kind::from_bytes(k.as_bytes())?);
        } else if let Some(n) = line.strip_prefix("tag ") {
            name = Some(n.to_string());
        } else if let Some(sig) = line.strip_prefix("tagger ") {
            tagger = Some(Signature::parse(sig)?);
        }
    }

    Ok(Tag {
        object: object.ok_or_else(|| OdbError::MalformedObject("tag missing object header".into()))?,
        kind: kind.ok_or_else(|| OdbError::MalformedObject("tag missing type header".into()))?,
        name: name.ok_or_else(|| OdbError::MalformedObject("tag missing tag header".into()))?,
        tagger: tagger.ok_or_else(|| OdbError::MalformedObject("tag missing tagger header".into()))?,
        message,
    })
}

/// Split a commit or tag body into the header block and the message.
fn split_headers(bytes: &[u8]) -> OdbResult<(String, String)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| OdbError::MalformedObject("commit or tag body is not UTF-8".into()))?;
    match text.split_once("\n\n") {
        Some((headers, message)) => Ok((headers.to_string(), message.to_string())),
        // A body with headers but no message is still well-formed.
        None => Ok((text.trim_end_matches('\n').to_string(), String::new())),
    }
}
