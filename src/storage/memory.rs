//! In-process backup medium.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::storage::BackupStorage;

/// [`BackupStorage`] kept in memory.
///
/// Not durable across restarts; useful for tests and for hosts that mirror
/// the map into their own persistence. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryBackupStorage {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl BackupStorage for MemoryBackupStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let storage = MemoryBackupStorage::new();
        storage.set("k", b"v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(b"v".to_vec()));

        storage.delete("k").await.unwrap();
        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let storage = MemoryBackupStorage::new();
        storage.set("emergency_backup_a", b"1").await.unwrap();
        storage.set("emergency_backup_b", b"2").await.unwrap();
        storage.set("unrelated", b"3").await.unwrap();

        let mut keys = storage.list("emergency_backup_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["emergency_backup_a", "emergency_backup_b"]);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let storage = MemoryBackupStorage::new();
        let other = storage.clone();
        storage.set("k", b"v").await.unwrap();
        assert_eq!(other.len().await, 1);
    }
}
