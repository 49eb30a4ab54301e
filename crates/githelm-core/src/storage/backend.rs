// ── Persisted-storage backends ──
//
// String-keyed, string-valued storage with `getItem`/`setItem`/
// `removeItem` semantics. The Store and Cache layers put JSON envelopes
// in here; backends know nothing about their shape.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::error::CoreError;

/// A persistent key-value collaborator.
///
/// Implementations must tolerate concurrent writes to different keys.
pub trait StorageBackend: Send + Sync + 'static {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError>;
    fn remove_item(&self, key: &str) -> Result<(), CoreError>;
    fn keys(&self) -> Result<Vec<String>, CoreError>;
    fn clear(&self) -> Result<(), CoreError>;
}

// ── In-memory backend ────────────────────────────────────────────

/// Process-lifetime backend over a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.items.get(key).map(|r| r.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), CoreError> {
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.items.iter().map(|r| r.key().clone()).collect())
    }

    fn clear(&self) -> Result<(), CoreError> {
        self.items.clear();
        Ok(())
    }
}

// ── File backend ─────────────────────────────────────────────────

const FILE_SUFFIX: &str = ".json";

/// One file per key under a directory.
///
/// Keys are percent-encoded into file names. Writes land in a dot-prefixed
/// temp file first and are renamed into place, so a concurrent reader sees
/// either the old value or the new one.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{FILE_SUFFIX}", encode_key(key)))
    }

    fn io_err(key: &str, source: std::io::Error) -> CoreError {
        CoreError::StorageIo {
            key: key.to_owned(),
            source,
        }
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, CoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(key, e))?;
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}{FILE_SUFFIX}.tmp", encode_key(key)));
        std::fs::write(&tmp, value).map_err(|e| Self::io_err(key, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| Self::io_err(key, e))
    }

    fn remove_item(&self, key: &str) -> Result<(), CoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(Self::io_err(key, e)),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err("*", e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err("*", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(encoded) = name.strip_suffix(FILE_SUFFIX) {
                if let Some(key) = decode_key(encoded) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn clear(&self) -> Result<(), CoreError> {
        for key in self.keys()? {
            self.remove_item(&key)?;
        }
        Ok(())
    }
}

// ── Key encoding ─────────────────────────────────────────────────

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes.get(i) == Some(&b'%') {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(*bytes.get(i)?);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
