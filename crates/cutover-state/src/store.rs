//! StateStore — redb-backed persistence for deployment records.
//!
//! Records are checkpointed on every transition and stay in the store after
//! reaching a terminal state, which makes the store the archive of past
//! deployments. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_INDEX).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or update a record.
    pub fn put_record(&self, record: &DeploymentRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(DEPLOYMENT_INDEX).map_err(map_err!(Table))?;
            index
                .insert(record.id.as_str(), key.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %record.state, "deployment record stored");
        Ok(())
    }

    /// Get a record by deployment id.
    pub fn get_record(&self, deployment_id: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(DEPLOYMENT_INDEX).map_err(map_err!(Table))?;
        let Some(key) = index.get(deployment_id).map_err(map_err!(Read))? else {
            return Ok(None);
        };
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.value()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records of a service, oldest first.
    pub fn list_for_service(&self, service: &str) -> StateResult<Vec<DeploymentRecord>> {
        let prefix = format!("{service}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        results.sort_by_key(|r| r.created_at);
        Ok(results)
    }

    /// Every record in the store.
    pub fn list_records(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Records that never reached a terminal state, e.g. after a crash.
    pub fn list_unfinished(&self) -> StateResult<Vec<DeploymentRecord>> {
        Ok(self
            .list_records()?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .collect())
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete_record(&self, deployment_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut index = txn.open_table(DEPLOYMENT_INDEX).map_err(map_err!(Table))?;
            let key = index
                .remove(deployment_id)
                .map_err(map_err!(Write))?
                .map(|k| k.value().to_string());
            existed = key.is_some();
            if let Some(key) = key {
                let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%deployment_id, existed, "deployment record deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::Color;

    fn record(id: &str, service: &str) -> DeploymentRecord {
        DeploymentRecord::new(id, service, "img:v2", "img:v1", Color::Blue)
    }

    #[test]
    fn put_and_get_by_id() {
        let store = StateStore::open_in_memory().unwrap();
        let rec = record("d-1", "frontend");
        store.put_record(&rec).unwrap();

        let back = store.get_record("d-1").unwrap().unwrap();
        assert_eq!(back, rec);
        assert!(store.get_record("d-404").unwrap().is_none());
    }

    #[test]
    fn updates_overwrite() {
        let store = StateStore::open_in_memory().unwrap();
        let mut rec = record("d-1", "frontend");
        store.put_record(&rec).unwrap();

        rec.enter(DeploymentState::Provisioning);
        store.put_record(&rec).unwrap();

        let back = store.get_record("d-1").unwrap().unwrap();
        assert_eq!(back.state, DeploymentState::Provisioning);
        assert_eq!(store.list_records().unwrap().len(), 1);
    }

    #[test]
    fn list_for_service_is_prefix_scoped() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_record(&record("d-1", "front")).unwrap();
        store.put_record(&record("d-2", "frontend")).unwrap();
        store.put_record(&record("d-3", "frontend")).unwrap();
        store.put_record(&record("d-4", "backend")).unwrap();

        let frontend = store.list_for_service("frontend").unwrap();
        assert_eq!(frontend.len(), 2);
        assert!(frontend.iter().all(|r| r.service == "frontend"));
        assert_eq!(store.list_for_service("front").unwrap().len(), 1);
    }

    #[test]
    fn unfinished_excludes_terminal_records() {
        let store = StateStore::open_in_memory().unwrap();
        let mut done = record("d-1", "api");
        done.enter(DeploymentState::Provisioning);
        done.enter(DeploymentState::Failed {
            reason: "boom".to_string(),
        });
        let mut running = record("d-2", "api");
        running.enter(DeploymentState::Provisioning);

        store.put_record(&done).unwrap();
        store.put_record(&running).unwrap();

        let unfinished = store.list_unfinished().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "d-2");
    }

    #[test]
    fn delete_removes_record_and_index() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_record(&record("d-1", "api")).unwrap();

        assert!(store.delete_record("d-1").unwrap());
        assert!(!store.delete_record("d-1").unwrap());
        assert!(store.get_record("d-1").unwrap().is_none());
        assert!(store.list_for_service("api").unwrap().is_empty());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(DEPLOYMENTS).unwrap();
            table.insert("api/d-1", b"not json".as_slice()).unwrap();
            let mut index = txn.open_table(DEPLOYMENT_INDEX).unwrap();
            index.insert("d-1", "api/d-1").unwrap();
        }
        txn.commit().unwrap();

        let err = store.get_record("d-1").unwrap_err();
        assert!(matches!(err, StateError::Decode(_)));
        assert!(err.to_string().starts_with("corrupt deployment record"));
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutover.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_record(&record("d-1", "api")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.get_record("d-1").unwrap().is_some());
    }
}
