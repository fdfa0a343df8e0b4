//! Filesystem backends.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DraftKeeperError, Result};
use crate::storage::{BackupStorage, DocumentStore, DocumentUpdate};

const EXTENSION: &str = "json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A document as written by [`FsDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Primary document store that keeps one JSON file per document.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous version intact.
///
/// # Example
///
/// ```rust,no_run
/// use draft_keeper::FsDocumentStore;
///
/// let store = FsDocumentStore::new("/home/me/novel/manuscript");
/// ```
pub struct FsDocumentStore {
    base_dir: PathBuf,
}

impl FsDocumentStore {
    /// Create a new `FsDocumentStore` rooted at the given directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Read a stored document back, or `None` if it was never written.
    pub async fn load(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        let path = entry_path(&self.base_dir, document_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DraftKeeperError::PrimaryWrite(Box::new(e))),
        }
    }
}

impl DocumentStore for FsDocumentStore {
    async fn update(&self, document_id: &str, update: &DocumentUpdate) -> Result<()> {
        let path = entry_path(&self.base_dir, document_id)?;
        let doc = StoredDocument {
            id: document_id.to_string(),
            content: update.content.clone(),
            updated_at: update.updated_at,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        atomic_write(&path, &bytes)
            .await
            .map_err(|e| DraftKeeperError::PrimaryWrite(Box::new(e)))?;

        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Backup medium that stores each key as `<base_dir>/<key>.json`.
///
/// Any non-empty key is accepted. Bytes other than ASCII letters, digits, `-`
/// and `_` are written as `%XX` in the file name, so `act-1/scene-2` lands in
/// `act-1%2Fscene-2.json` and never outside `base_dir`. The empty key is
/// rejected with [`DraftKeeperError::InvalidKey`].
pub struct FsBackupStorage {
    base_dir: PathBuf,
}

impl FsBackupStorage {
    /// Create a new `FsBackupStorage` rooted at the given directory. The
    /// directory is created on first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl BackupStorage for FsBackupStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(entry_path(&self.base_dir, key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DraftKeeperError::BackupStorage(Box::new(e))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = entry_path(&self.base_dir, key)?;
        atomic_write(&path, value)
            .await
            .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?;

        tracing::debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(entry_path(&self.base_dir, key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DraftKeeperError::BackupStorage(Box::new(e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DraftKeeperError::BackupStorage(Box::new(e))),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| DraftKeeperError::BackupStorage(Box::new(e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn entry_path(base_dir: &Path, key: &str) -> Result<PathBuf> {
    Ok(base_dir.join(format!("{}.{EXTENSION}", encode_key(key)?)))
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Turns an arbitrary key into a single file name component.
fn encode_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(DraftKeeperError::InvalidKey(key.to_string()));
    }
    let mut name = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    Ok(name)
}

/// Inverse of [`encode_key`]; `None` for names this store did not write.
fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_plain(byte) => {
                out.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Unique per write: an unload backup may race a failed-save backup for the same key.
    let tmp = path.with_extension(format!("{}.tmp", TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
    let result = match tokio::fs::write(&tmp, content).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {e}", tmp.display());
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keys_keep_their_name() {
        assert_eq!(
            encode_key("emergency_backup_scene-42").unwrap(),
            "emergency_backup_scene-42"
        );
    }

    #[test]
    fn path_like_keys_become_one_component() {
        let keys = [
            ".", "..", "../escape", "act-1/scene-2", "a\\b", "draft..v2", "nul\0byte", "50%", "é",
        ];
        for key in keys {
            let name = encode_key(key).unwrap();
            assert!(name.bytes().all(|b| is_plain(b) || b == b'%'), "{name:?}");
            assert_eq!(decode_key(&name).as_deref(), Some(key));
        }
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(encode_key(""), Err(DraftKeeperError::InvalidKey(_))));
    }

    #[test]
    fn foreign_names_do_not_decode() {
        assert_eq!(decode_key("notes.backup"), None);
        assert_eq!(decode_key("bad%2"), None);
        assert_eq!(decode_key("bad%zz"), None);
        assert_eq!(decode_key("bad%+1"), None);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("occupied.json");
        // Renaming a file over a non-empty directory fails.
        tokio::fs::create_dir(&target).await.unwrap();
        tokio::fs::write(target.join("inner"), "x").await.unwrap();

        assert!(atomic_write(&target, b"{}").await.is_err());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["occupied.json"]);
    }
}
