//! Resident identity → embedding table with write-through persistence.

use crate::types::{Embedding, IdentityRecord};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failed during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("embedding for '{identity}' is malformed: {message}")]
    InvalidRecord { identity: String, message: String },
    #[error("identity table lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Backend { operation, source: source.into() }
    }
}

/// Persistent side of the store: keyed upsert, keyed delete, read-all.
pub trait EmbeddingBackend: Send {
    fn load_all(&mut self) -> Result<Vec<IdentityRecord>, StoreError>;
    fn upsert(&mut self, record: &IdentityRecord) -> Result<(), StoreError>;
    /// Returns whether a record was removed.
    fn remove(&mut self, identity: &str) -> Result<bool, StoreError>;
}

/// Non-persistent backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: BTreeMap<String, IdentityRecord>,
}

impl MemoryBackend {
    pub fn with_records(records: impl IntoIterator<Item = IdentityRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.identity.clone(), r)).collect(),
        }
    }
}

impl EmbeddingBackend for MemoryBackend {
    fn load_all(&mut self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn upsert(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.records.insert(record.identity.clone(), record.clone());
        Ok(())
    }

    fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(identity).is_some())
    }
}

/// Summary row for listings; never carries the vector.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub updated_at: String,
}

/// One canonical embedding per identity, kept resident.
///
/// Writes go to the backend first and reach the resident table only once the
/// backend accepted them. All writes are serialized by the backend mutex, and
/// readers always see whole records. Iteration order is ascending identity.
pub struct EmbeddingStore<B> {
    table: RwLock<BTreeMap<String, IdentityRecord>>,
    backend: Mutex<B>,
    registration: Mutex<()>,
}

impl<B: EmbeddingBackend> EmbeddingStore<B> {
    /// Load every well-formed record from `backend`. Malformed records are
    /// logged and skipped.
    pub fn open(mut backend: B) -> Result<Self, StoreError> {
        let mut table = BTreeMap::new();
        let mut skipped = 0usize;
        for record in backend.load_all()? {
            if !record.embedding.is_well_formed() {
                tracing::warn!(
                    identity = %record.identity,
                    len = record.embedding.values.len(),
                    "skipping malformed stored embedding"
                );
                skipped += 1;
                continue;
            }
            table.insert(record.identity.clone(), record);
        }

        tracing::info!(identities = table.len(), skipped, "embedding store loaded");

        Ok(Self {
            table: RwLock::new(table),
            backend: Mutex::new(backend),
            registration: Mutex::new(()),
        })
    }

    /// Consistent copy of every record.
    pub fn snapshot(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table.values().cloned().collect())
    }

    pub fn get(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table.get(identity).cloned())
    }

    pub fn contains(&self, identity: &str) -> Result<bool, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table.contains_key(identity))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn list(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table
            .values()
            .map(|r| IdentitySummary {
                identity: r.identity.clone(),
                updated_at: r.updated_at.clone(),
            })
            .collect())
    }

    /// Insert or replace the embedding for `identity`.
    pub fn upsert(&self, identity: &str, embedding: Embedding) -> Result<IdentityRecord, StoreError> {
        if !embedding.is_well_formed() {
            return Err(StoreError::InvalidRecord {
                identity: identity.to_string(),
                message: format!("{} values", embedding.values.len()),
            });
        }

        let record = IdentityRecord::new(identity, embedding);
        let mut backend = self.backend.lock().map_err(|_| StoreError::LockPoisoned)?;
        backend.upsert(&record)?;

        let mut table = self.table.write().map_err(|_| StoreError::LockPoisoned)?;
        let replaced = table.insert(record.identity.clone(), record.clone()).is_some();
        tracing::info!(identity, replaced, "embedding stored");
        Ok(record)
    }

    /// Delete the record for `identity`. Returns whether one existed.
    pub fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().map_err(|_| StoreError::LockPoisoned)?;
        let removed_persisted = backend.remove(identity)?;

        let mut table = self.table.write().map_err(|_| StoreError::LockPoisoned)?;
        let removed = table.remove(identity).is_some() || removed_persisted;
        tracing::info!(identity, removed, "embedding removed");
        Ok(removed)
    }

    /// Exclusive guard held across a duplicate check and the following write,
    /// so two registrations of the same face cannot both pass the check.
    pub fn registration_guard(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.registration.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_embedding;
    use std::sync::Arc;

    struct FailingBackend;

    impl EmbeddingBackend for FailingBackend {
        fn load_all(&mut self) -> Result<Vec<IdentityRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn upsert(&mut self, _record: &IdentityRecord) -> Result<(), StoreError> {
            Err(StoreError::backend("upsert", "disk full"))
        }
        fn remove(&mut self, _identity: &str) -> Result<bool, StoreError> {
            Err(StoreError::backend("remove", "disk full"))
        }
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let store = EmbeddingStore::open(MemoryBackend::default()).unwrap();
        store.upsert("alice", synthetic_embedding(0.1)).unwrap();
        store.upsert("alice", synthetic_embedding(0.9)).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let record = store.get("alice").unwrap().unwrap();
        assert_eq!(record.embedding, synthetic_embedding(0.9));
    }

    #[test]
    fn test_snapshot_sorted_by_identity() {
        let store = EmbeddingStore::open(MemoryBackend::default()).unwrap();
        for id in ["carol", "alice", "bob"] {
            store.upsert(id, synthetic_embedding(0.0)).unwrap();
        }
        let ids: Vec<String> = store.snapshot().unwrap().into_iter().map(|r| r.identity).collect();
        assert_eq!(ids, ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_open_skips_malformed_records() {
        let good = IdentityRecord::new("alice", synthetic_embedding(0.0));
        let bad = IdentityRecord::new("bob", Embedding::new(vec![0.0; 3]));
        let store = EmbeddingStore::open(MemoryBackend::with_records([good, bad])).unwrap();
        assert!(store.contains("alice").unwrap());
        assert!(!store.contains("bob").unwrap());
    }

    #[test]
    fn test_failed_write_leaves_table_unchanged() {
        let store = EmbeddingStore::open(FailingBackend).unwrap();
        let err = store.upsert("alice", synthetic_embedding(0.0)).unwrap_err();
        assert!(matches!(err, StoreError::Backend { operation: "upsert", .. }), "{err}");
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_rejects_malformed_embedding() {
        let store = EmbeddingStore::open(MemoryBackend::default()).unwrap();
        let err = store.upsert("alice", Embedding::new(vec![1.0; 5])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_remove() {
        let store = EmbeddingStore::open(MemoryBackend::default()).unwrap();
        store.upsert("alice", synthetic_embedding(0.0)).unwrap();
        assert!(store.remove("alice").unwrap());
        assert!(!store.remove("alice").unwrap());
        assert!(store.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_list_has_no_vectors() {
        let store = EmbeddingStore::open(MemoryBackend::default()).unwrap();
        store.upsert("alice", synthetic_embedding(0.0)).unwrap();
        let listing = store.list().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].identity, "alice");
        assert!(!listing[0].updated_at.is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_records() {
        let store = Arc::new(EmbeddingStore::open(MemoryBackend::default()).unwrap());
        store.upsert("alice", synthetic_embedding(0.0)).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    store.upsert("alice", synthetic_embedding(i as f32)).unwrap();
                }
            })
        };

        for _ in 0..200 {
            for record in store.snapshot().unwrap() {
                assert!(record.embedding.is_well_formed());
            }
        }
        writer.join().unwrap();
        assert_eq!(store.get("alice").unwrap().unwrap().embedding, synthetic_embedding(199.0));
    }
}
