use anyhow::{Context, Result};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tracing::debug;

/// A single fjall partition holding opaque byte entries.
pub struct DiskStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl DiskStore {
    pub fn open(path: &Path, partition: &str) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create cache directory: {}", path.display()))?;

        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open cache at {}", path.display()))?;
        let partition = keyspace
            .open_partition(partition, PartitionCreateOptions::default())
            .with_context(|| format!("Failed to open cache partition: {partition}"))?;
        debug!(path = %path.display(), "Opened disk store");

        Ok(Self {
            keyspace,
            partition,
        })
    }

    /// Removes every entry of the partition and returns how many there were.
    /// Nothing else under the store path is touched.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.partition.keys() {
            self.partition.remove(key?)?;
            removed += 1;
        }
        self.keyspace.persist(PersistMode::Buffer)?;
        debug!(removed, "Cleared disk store");
        Ok(removed)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.partition.get(key)?.map(|value| value.to_vec()))
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition.insert(key, value)?;
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_store_get_insert() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path(), "entries").unwrap();

        assert!(store.get(b"key1").unwrap().is_none());

        store.insert(b"key1", b"123").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"123".to_vec()));

        store.insert(b"key1", b"456").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"456".to_vec()));
        assert!(store.get(b"key2").unwrap().is_none());
    }

    #[test]
    fn test_disk_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path(), "entries").unwrap();
            store.insert(b"key1", b"123").unwrap();
        }

        let store = DiskStore::open(dir.path(), "entries").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"123".to_vec()));
    }

    #[test]
    fn test_disk_store_clear_keeps_other_files() {
        let dir = tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "keep me").unwrap();
        {
            let store = DiskStore::open(dir.path(), "entries").unwrap();
            store.insert(b"key1", b"123").unwrap();
            store.insert(b"key2", b"456").unwrap();
        }

        let store = DiskStore::open(dir.path(), "entries").unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.get(b"key1").unwrap().is_none());
        assert!(store.get(b"key2").unwrap().is_none());
        assert_eq!(store.clear().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&notes).unwrap(), "keep me");

        store.insert(b"key1", b"789").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"789".to_vec()));
    }
}
