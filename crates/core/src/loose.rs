//! Loose object files: one zlib-compressed object per sharded path.
//!
//! A loose object lives at `objects/<aa>/<bb...>` where `aa` is the first
//! hex byte of its id, and holds `deflate("<kind> <size>\0<content>")`.

use crate::error::OdbError;
use crate::id::ObjectId;
use crate::object::{id_for, Kind};
use crate::OdbResult;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Store of individual compressed objects under `objects/`.
pub struct LooseStore {
    objects_dir: PathBuf,
}

impl LooseStore {
    pub fn new(objects_dir: PathBuf) -> Self {
        Self { objects_dir }
    }

    /// Filesystem path for an object id.
    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Check whether an object exists as a loose file.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).exists()
    }

    /// Read and validate a loose object.
    pub fn read(&self, id: &ObjectId) -> OdbResult<(Kind, Vec<u8>)> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OdbError::NotFound(*id))
            }
            Err(e) => return Err(e.into()),
        };

        // A valid stream opens with a zlib header: 0x78 and a big-endian
        // 16-bit value divisible by 31.
        if compressed.len() < 2
            || compressed[0] != 0x78
            || (u16::from(compressed[0]) << 8 | u16::from(compressed[1])) % 31 != 0
        {
            return Err(OdbError::NotLooseObject);
        }

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| OdbError::MalformedObject(format!("zlib stream unreadable: {e}")))?;

        parse_header(&raw)
    }

    /// Write an object, computing and returning its id.
    ///
    /// Writing an object that already exists on disk is a silent no-op:
    /// content-addressed files never change once written.
    pub fn write(&self, kind: Kind, content: &[u8]) -> OdbResult<ObjectId> {
        let id = id_for(kind, content);
        let hex = id.to_hex();
        let shard = self.objects_dir.join(&hex[..2]);
        let path = shard.join(&hex[2..]);
        if path.exists() {
            return Ok(id);
        }

        fs::create_dir_all(&shard)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(format!("{kind} {}\0", content.len()).as_bytes())?;
        encoder.write_all(content)?;
        let compressed = encoder.finish()?;

        // Atomic write pattern: write to temp, fsync, rename
        let temp_path = shard.join(format!("tmp-{}", uuid::Uuid::new_v4()));
        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(&compressed)?;
        temp_file.sync_all()?;
        drop(temp_file);
        fs::rename(&temp_path, &path)?;

        // Fsync the shard directory for durability; best effort
        if let Ok(dir) = fs::File::open(&shard) {
            let _ = dir.sync_all();
        }

        Ok(id)
    }
}

/// Split decompressed bytes at the first NUL and validate the header.
fn parse_header(raw: &[u8]) -> OdbResult<(Kind, Vec<u8>)> {
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| OdbError::MalformedObject("missing header terminator".into()))?;
    let header = &raw[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| OdbError::MalformedObject("missing kind separator".into()))?;

    let kind = Kind::from_bytes(&header[..space])?;
    let size: usize = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OdbError::MalformedObject("unparseable size in header".into()))?;

    let content = raw[nul + 1..].to_vec();
    if content.len() != size {
        return Err(OdbError::MalformedObject(format!(
            "size mismatch: header says {size}, got {} bytes",
            content.len()
        )));
    }
    Ok((kind, content))
}
