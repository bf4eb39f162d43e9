//! Payload codecs: how user values become blob bytes and back.
//!
//! The codec for a path is chosen by the extension of its leaf name (the
//! substring after the last `.`). `yml` payloads round-trip through YAML;
//! everything else is stored verbatim.

use ahash::AHashMap;
use anyhow::{Context, Result};

/// Registry key for the fallback codec.
const DEFAULT_KEY: &str = "*";

/// A decoded user value.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Structured document, YAML-backed.
    Doc(serde_yaml::Value),
    /// Raw bytes, stored verbatim.
    Bytes(Vec<u8>),
}

impl Payload {
    /// Build a structured payload from any serializable value.
    pub fn doc<T: serde::Serialize>(value: T) -> Result<Self> {
        Ok(Self::Doc(serde_yaml::to_value(value)?))
    }

    pub fn as_doc(&self) -> Option<&serde_yaml::Value> {
        match self {
            Self::Doc(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Doc(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_doc().and_then(|v| v.as_i64())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_doc().and_then(|v| v.as_str())
    }
}

impl From<serde_yaml::Value> for Payload {
    fn from(value: serde_yaml::Value) -> Self {
        Self::Doc(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

/// A two-way codec between payloads and blob bytes.
///
/// Both directions are total: a codec must accept any payload variant and
/// any byte string it could itself have produced.
pub trait PayloadCodec: Send + Sync {
    fn decode(&self, path: &str, bytes: &[u8]) -> Result<Payload>;
    fn encode(&self, path: &str, payload: &Payload) -> Result<Vec<u8>>;
}

/// Lossless YAML round-trip for structured documents.
struct YamlCodec;

impl PayloadCodec for YamlCodec {
    fn decode(&self, path: &str, bytes: &[u8]) -> Result<Payload> {
        let value: serde_yaml::Value = serde_yaml::from_slice(bytes)
            .with_context(|| format!("invalid YAML document at {path}"))?;
        Ok(Payload::Doc(value))
    }

    fn encode(&self, path: &str, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Doc(value) => Ok(serde_yaml::to_string(value)
                .with_context(|| format!("unserializable document at {path}"))?
                .into_bytes()),
            // Raw bytes pushed at a .yml path pass through untouched.
            Payload::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Identity on bytes; the fallback for unregistered extensions.
struct RawCodec;

impl PayloadCodec for RawCodec {
    fn decode(&self, _path: &str, bytes: &[u8]) -> Result<Payload> {
        Ok(Payload::Bytes(bytes.to_vec()))
    }

    fn encode(&self, path: &str, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            // A structured value at a binary path still has to serialize
            // somehow; YAML keeps it readable and deterministic.
            Payload::Doc(value) => Ok(serde_yaml::to_string(value)
                .with_context(|| format!("unserializable document at {path}"))?
                .into_bytes()),
        }
    }
}

/// Extension-keyed codec registry with a fallback under a sentinel key.
pub struct Handlers {
    codecs: AHashMap<String, Box<dyn PayloadCodec>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Handlers {
    fn default() -> Self {
        let mut codecs: AHashMap<String, Box<dyn PayloadCodec>> = AHashMap::new();
        codecs.insert("yml".to_string(), Box::new(YamlCodec));
        codecs.insert(DEFAULT_KEY.to_string(), Box::new(RawCodec));
        Self { codecs }
    }
}

impl Handlers {
    /// Register a codec for an extension, replacing any previous one.
    pub fn register(&mut self, extension: &str, codec: Box<dyn PayloadCodec>) {
        self.codecs.insert(extension.to_string(), codec);
    }

    /// Pick the codec for a path by its leaf extension.
    pub fn for_path(&self, path: &str) -> &dyn PayloadCodec {
        let leaf = path.rsplit('/').next().unwrap_or(path);
        let extension = leaf.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(DEFAULT_KEY);
        self.codecs
            .get(extension)
            .or_else(|| self.codecs.get(DEFAULT_KEY))
            .expect("fallback codec is always registered")
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yml_extension_round_trips_structure() {
        let handlers = Handlers::default();
        let codec = handlers.for_path("config/settings.yml");

        let payload = Payload::doc(serde_yaml::Value::Mapping(
            [(
                serde_yaml::Value::String("x".into()),
                serde_yaml::Value::Number(1.into()),
            )]
            .into_iter()
            .collect(),
        ))
        .unwrap();

        let bytes = codec.encode("settings.yml", &payload).unwrap();
        let decoded = codec.decode("settings.yml", &bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn unknown_extension_is_identity_on_bytes() {
        let handlers = Handlers::default();
        let codec = handlers.for_path("assets/logo.bin");

        let payload = Payload::from(vec![0u8, 159, 146, 150]);
        let bytes = codec.encode("logo.bin", &payload).unwrap();
        assert_eq!(bytes, vec![0u8, 159, 146, 150]);
        assert_eq!(codec.decode("logo.bin", &bytes).unwrap(), payload);
    }

    #[test]
    fn extension_comes_from_leaf_name_only() {
        let handlers = Handlers::default();
        // The directory is named "x.yml" but the leaf has no extension.
        let codec = handlers.for_path("x.yml/raw");
        let bytes = codec.encode("raw", &Payload::from(b"data".as_slice())).unwrap();
        assert_eq!(codec.decode("raw", &bytes).unwrap(), Payload::from(b"data".as_slice()));
    }

    #[test]
    fn last_dot_wins() {
        let handlers = Handlers::default();
        let codec = handlers.for_path("archive.tar.yml");
        let payload = Payload::doc(vec![1, 2, 3]).unwrap();
        let bytes = codec.encode("archive.tar.yml", &payload).unwrap();
        assert_eq!(codec.decode("archive.tar.yml", &bytes).unwrap(), payload);
    }

    #[test]
    fn empty_yaml_decodes_to_null() {
        let handlers = Handlers::default();
        let codec = handlers.for_path("empty.yml");
        let decoded = codec.decode("empty.yml", b"").unwrap();
        assert_eq!(decoded, Payload::Doc(serde_yaml::Value::Null));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let handlers = Handlers::default();
        let codec = handlers.for_path("bad.yml");
        assert!(codec.decode("bad.yml", b"{unclosed: [").is_err());
    }

    #[test]
    fn custom_codec_can_be_registered() {
        struct Upper;
        impl PayloadCodec for Upper {
            fn decode(&self, _path: &str, bytes: &[u8]) -> Result<Payload> {
                Ok(Payload::Bytes(bytes.to_ascii_uppercase()))
            }
            fn encode(&self, _path: &str, payload: &Payload) -> Result<Vec<u8>> {
                match payload {
                    Payload::Bytes(b) => Ok(b.to_ascii_lowercase()),
                    Payload::Doc(_) => anyhow::bail!("bytes only"),
                }
            }
        }

        let mut handlers = Handlers::default();
        handlers.register("shout", Box::new(Upper));
        let codec = handlers.for_path("msg.shout");
        let bytes = codec.encode("msg.shout", &Payload::from(b"HeLLo".as_slice())).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(
            codec.decode("msg.shout", &bytes).unwrap(),
            Payload::from(b"HELLO".as_slice())
        );
    }
}
