//! Durable storage seam for accepted position reports.
//!
//! The relational engine itself is an external collaborator; the ingestion
//! pipeline only relies on the transactional contract below. [`MemoryStorage`]
//! is the bundled backend: writes are staged per transaction and become
//! visible all at once on commit. Position rows are keyed by `(mmsi, timestamp)`;
//! a row whose key is already taken is skipped, not treated as a failure.

use crate::voyage::Mmsi;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// AIS message type recorded for position rows (Position Report Class A).
pub const POSITION_REPORT_MESSAGE_TYPE: u8 = 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("storage is closed")]
    Closed,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselRecord {
    pub mmsi: Mmsi,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only position row keyed by `(mmsi, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPosition {
    pub mmsi: Mmsi,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub heading: Option<f64>,
    pub raw_message: String,
    pub message_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VesselResolution {
    pub created: usize,
    pub existing: usize,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError>;

    /// Releases the handle; later transactions fail with [`StorageError::Closed`].
    async fn close(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait StorageTransaction: Send {
    /// Creates missing vessel records and touches existing ones, resolving the
    /// whole id set in one lookup.
    async fn resolve_vessels(
        &mut self,
        ids: &[Mmsi],
        seen_at: DateTime<Utc>,
    ) -> Result<VesselResolution, StorageError>;

    /// Stages a row. Returns `false` without staging anything when a row with
    /// the same `(mmsi, timestamp)` is already stored or staged.
    async fn insert_position(&mut self, position: NewPosition) -> Result<bool, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    vessels: BTreeMap<Mmsi, VesselRecord>,
    positions: Vec<NewPosition>,
    position_keys: HashSet<(Mmsi, DateTime<Utc>)>,
    commits: u64,
    rollbacks: u64,
    fail_next_commit: bool,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with a backend error, leaving the tables untouched.
    pub async fn fail_next_commit(&self) {
        self.tables.lock().await.fail_next_commit = true;
    }

    pub async fn vessels(&self) -> Vec<VesselRecord> {
        self.tables.lock().await.vessels.values().cloned().collect()
    }

    pub async fn vessel(&self, mmsi: &Mmsi) -> Option<VesselRecord> {
        self.tables.lock().await.vessels.get(mmsi).cloned()
    }

    pub async fn positions(&self) -> Vec<NewPosition> {
        self.tables.lock().await.positions.clone()
    }

    pub async fn positions_for(&self, mmsi: &Mmsi) -> Vec<NewPosition> {
        self.tables
            .lock()
            .await
            .positions
            .iter()
            .filter(|p| &p.mmsi == mmsi)
            .cloned()
            .collect()
    }

    pub async fn vessel_count(&self) -> usize {
        self.tables.lock().await.vessels.len()
    }

    pub async fn position_count(&self) -> usize {
        self.tables.lock().await.positions.len()
    }

    pub async fn commit_count(&self) -> u64 {
        self.tables.lock().await.commits
    }

    pub async fn rollback_count(&self) -> u64 {
        self.tables.lock().await.rollbacks
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, StorageError> {
        if self.tables.lock().await.closed {
            return Err(StorageError::Closed);
        }

        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            vessel_upserts: BTreeMap::new(),
            positions: Vec::new(),
            staged_keys: HashSet::new(),
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.tables.lock().await.closed = true;
        Ok(())
    }
}

struct MemoryTransaction {
    tables: Arc<Mutex<MemoryTables>>,
    vessel_upserts: BTreeMap<Mmsi, DateTime<Utc>>,
    positions: Vec<NewPosition>,
    staged_keys: HashSet<(Mmsi, DateTime<Utc>)>,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn resolve_vessels(
        &mut self,
        ids: &[Mmsi],
        seen_at: DateTime<Utc>,
    ) -> Result<VesselResolution, StorageError> {
        let tables = self.tables.lock().await;
        if tables.closed {
            return Err(StorageError::Closed);
        }

        let mut resolution = VesselResolution::default();
        for mmsi in ids {
            if self.vessel_upserts.contains_key(mmsi) {
                continue;
            }
            if tables.vessels.contains_key(mmsi) {
                resolution.existing += 1;
            } else {
                resolution.created += 1;
            }
            self.vessel_upserts.insert(mmsi.clone(), seen_at);
        }

        Ok(resolution)
    }

    async fn insert_position(&mut self, position: NewPosition) -> Result<bool, StorageError> {
        let tables = self.tables.lock().await;
        if tables.closed {
            return Err(StorageError::Closed);
        }

        let key = (position.mmsi.clone(), position.timestamp);
        if tables.position_keys.contains(&key) || !self.staged_keys.insert(key) {
            return Ok(false);
        }

        self.positions.push(position);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        let mut tables = this.tables.lock().await;
        if tables.closed {
            return Err(StorageError::Closed);
        }

        if tables.fail_next_commit {
            tables.fail_next_commit = false;
            tables.rollbacks += 1;
            return Err(StorageError::Backend("injected commit failure".to_string()));
        }

        for (mmsi, seen_at) in this.vessel_upserts {
            tables
                .vessels
                .entry(mmsi.clone())
                .and_modify(|v| v.updated_at = seen_at)
                .or_insert(VesselRecord {
                    mmsi,
                    created_at: seen_at,
                    updated_at: seen_at,
                });
        }

        // Another transaction may have taken a key since it was staged
        for position in this.positions {
            let key = (position.mmsi.clone(), position.timestamp);
            if tables.position_keys.insert(key) {
                tables.positions.push(position);
            }
        }
        tables.commits += 1;

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tables.lock().await.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmsi(id: &str) -> Mmsi {
        id.parse().unwrap()
    }

    fn position(id: &str, secs: i64) -> NewPosition {
        NewPosition {
            mmsi: mmsi(id),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            latitude: 1.0,
            longitude: 2.0,
            speed: Some(10.0),
            course: None,
            heading: None,
            raw_message: String::new(),
            message_type: POSITION_REPORT_MESSAGE_TYPE,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        tx.resolve_vessels(&[mmsi("123456789")], Utc::now()).await.unwrap();
        tx.insert_position(position("123456789", 10)).await.unwrap();

        assert_eq!(storage.position_count().await, 0);
        tx.rollback().await.unwrap();

        assert_eq!(storage.position_count().await, 0);
        assert_eq!(storage.vessel_count().await, 0);
        assert_eq!(storage.rollback_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_vessels_counts_created_and_existing() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let first = tx.resolve_vessels(&[mmsi("123456789")], Utc::now()).await.unwrap();
        assert_eq!(first, VesselResolution { created: 1, existing: 0 });
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let second = tx
            .resolve_vessels(&[mmsi("123456789"), mmsi("987654321")], Utc::now())
            .await
            .unwrap();
        assert_eq!(second, VesselResolution { created: 1, existing: 1 });
        tx.commit().await.unwrap();

        assert_eq!(storage.vessel_count().await, 2);
    }

    #[tokio::test]
    async fn test_key_conflict_skips_only_that_row() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        assert!(tx.insert_position(position("123456789", 10)).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        tx.resolve_vessels(&[mmsi("555555555")], Utc::now()).await.unwrap();
        assert!(tx.insert_position(position("555555555", 10)).await.unwrap());
        assert!(!tx.insert_position(position("123456789", 10)).await.unwrap());
        assert!(!tx.insert_position(position("555555555", 10)).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(storage.position_count().await, 2);
        assert_eq!(storage.positions_for(&mmsi("555555555")).await.len(), 1);
        assert!(storage.vessel(&mmsi("555555555")).await.is_some());
        assert_eq!(storage.rollback_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_transactions_do_not_duplicate_keys() {
        let storage = MemoryStorage::new();
        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        assert!(first.insert_position(position("123456789", 10)).await.unwrap());
        assert!(second.insert_position(position("123456789", 10)).await.unwrap());

        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(storage.position_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let storage = MemoryStorage::new();
        storage.fail_next_commit().await;

        let mut tx = storage.begin().await.unwrap();
        tx.insert_position(position("123456789", 10)).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StorageError::Backend(_))));

        let mut tx = storage.begin().await.unwrap();
        tx.insert_position(position("123456789", 10)).await.unwrap();
        assert!(tx.commit().await.is_ok());
        assert_eq!(storage.position_count().await, 1);
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_transactions() {
        let storage = MemoryStorage::new();
        storage.close().await.unwrap();
        assert!(matches!(storage.begin().await, Err(StorageError::Closed)));
    }
}
