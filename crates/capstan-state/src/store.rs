//! StateStore: redb-backed persistence for deployment records.
//!
//! Provides typed operations over deployments and local instances. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! redb allows a single write transaction at a time, so every
//! read-modify-write below runs inside one write transaction and is atomic
//! with respect to other writers and readers.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable};
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

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// Fails with [`StateError::Busy`] while another handle holds the file.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StateError::Busy(path.display().to_string()),
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
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

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment. Fails if the id is already taken.
    pub fn create_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.table_key();
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key.to_string()));
            }
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment created");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    /// Write `deployment` only if the stored revision is still
    /// `expected_revision`. On success `deployment.revision` is bumped to
    /// the committed value.
    pub fn commit_deployment(
        &self,
        deployment: &mut Deployment,
        expected_revision: u64,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let stored = read_deployment(&table, &deployment.id)?
                .ok_or_else(|| StateError::NotFound(deployment.id.clone()))?;
            if stored.revision != expected_revision {
                return Err(StateError::Conflict {
                    id: deployment.id.clone(),
                    expected: expected_revision,
                    found: stored.revision,
                });
            }
            deployment.revision = expected_revision + 1;
            let value = serde_json::to_vec(&*deployment).map_err(map_err!(Serialize))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %deployment.id, revision = deployment.revision, "deployment committed");
        Ok(())
    }

    /// Atomically read, modify and write back a deployment.
    ///
    /// Returns the record as written.
    pub fn update_deployment<F>(&self, id: &str, f: F) -> StateResult<Deployment>
    where
        F: FnOnce(&mut Deployment),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment = read_deployment(&table, id)?
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;
            f(&mut deployment);
            deployment.revision += 1;
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, revision = updated.revision, "deployment updated");
        Ok(updated)
    }

    /// Delete a deployment by id. Returns true if it existed.
    pub fn delete_deployment(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "deployment deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all instances of one app version, ordered by index.
    pub fn list_instances(&self, app_id: &str, version: &str) -> StateResult<Vec<InstanceRecord>> {
        let prefix = instance_prefix(app_id, version);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete one instance. Returns true if it existed.
    pub fn delete_instance(&self, app_id: &str, version: &str, index: u32) -> StateResult<bool> {
        let key = instance_key(app_id, version, index);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete all instances of one app version. Returns number deleted.
    pub fn delete_instances(&self, app_id: &str, version: &str) -> StateResult<u32> {
        let prefix = instance_prefix(app_id, version);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            // Collect keys first; the range borrows the table.
            let keys: Vec<String> = {
                let mut keys = Vec::new();
                for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    let key = key.value().to_string();
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    keys.push(key);
                }
                keys
            };
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, %version, count, "instances deleted");
        Ok(count)
    }
}

/// Read and decode a deployment from an open table.
fn read_deployment<T>(table: &T, id: &str) -> StateResult<Option<Deployment>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => {
            let deployment: Deployment =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(deployment))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deployment(id: &str) -> Deployment {
        Deployment::new(
            NewDeployment {
                id: id.to_string(),
                app_id: "app-1".to_string(),
                version: "v2".to_string(),
                previous_version: "v1".to_string(),
                original_instances: 2,
                desired_web_instances: 3,
                canary_total_instances: None,
            },
            1000,
        )
        .unwrap()
    }

    fn test_instance(app_id: &str, version: &str, index: u32) -> InstanceRecord {
        InstanceRecord {
            app_id: app_id.to_string(),
            version: version.to_string(),
            index,
            status: InstanceStatus::Running,
            health: HealthStatus::Healthy,
            started_at: 1000,
            updated_at: 1000,
        }
    }

    // ── Deployment records ─────────────────────────────────────────

    #[test]
    fn deployment_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let deployment = test_deployment("dep-1");

        store.create_deployment(&deployment).unwrap();
        let retrieved = store.get_deployment("dep-1").unwrap();

        assert_eq!(retrieved, Some(deployment));
    }

    #[test]
    fn deployment_create_twice_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_deployment(&test_deployment("dep-1")).unwrap();

        let err = store.create_deployment(&test_deployment("dep-1")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn deployment_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_deployment("nope").unwrap().is_none());
    }

    #[test]
    fn deployment_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_deployment(&test_deployment("a")).unwrap();
        store.create_deployment(&test_deployment("b")).unwrap();
        store.create_deployment(&test_deployment("c")).unwrap();

        assert_eq!(store.list_deployments().unwrap().len(), 3);
    }

    #[test]
    fn commit_bumps_revision() {
        let store = StateStore::open_in_memory().unwrap();
        let mut deployment = test_deployment("dep-1");
        store.create_deployment(&deployment).unwrap();

        deployment.deploying_instances = 1;
        store.commit_deployment(&mut deployment, 0).unwrap();
        assert_eq!(deployment.revision, 1);

        let stored = store.get_deployment("dep-1").unwrap().unwrap();
        assert_eq!(stored.deploying_instances, 1);
        assert_eq!(stored.revision, 1);
    }

    #[test]
    fn commit_with_stale_revision_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let deployment = test_deployment("dep-1");
        store.create_deployment(&deployment).unwrap();

        // Another writer gets in first.
        store
            .update_deployment("dep-1", |d| d.error = Some("boom".to_string()))
            .unwrap();

        let mut stale = deployment.clone();
        stale.deploying_instances = 2;
        let err = store.commit_deployment(&mut stale, 0).unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 0,
                found: 1,
                ..
            }
        ));

        // The other writer's change survives.
        let stored = store.get_deployment("dep-1").unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(stored.deploying_instances, 0);
    }

    #[test]
    fn commit_missing_deployment_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let mut deployment = test_deployment("ghost");
        let err = store.commit_deployment(&mut deployment, 0).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn update_deployment_applies_closure() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_deployment(&test_deployment("dep-1")).unwrap();

        let updated = store
            .update_deployment("dep-1", |d| {
                d.request_cancel();
            })
            .unwrap();
        assert_eq!(updated.phase, DeploymentPhase::Canceling);
        assert_eq!(updated.revision, 1);

        let stored = store.get_deployment("dep-1").unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn update_missing_deployment_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_deployment("nope", |_| {}).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn deployment_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_deployment(&test_deployment("dep-1")).unwrap();

        assert!(store.delete_deployment("dep-1").unwrap());
        assert!(!store.delete_deployment("dep-1").unwrap());
        assert!(store.get_deployment("dep-1").unwrap().is_none());
    }

    // ── Instance records ───────────────────────────────────────────

    #[test]
    fn instance_list_is_scoped_to_version() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("app-1", "v1", 0)).unwrap();
        store.put_instance(&test_instance("app-1", "v1", 1)).unwrap();
        store.put_instance(&test_instance("app-1", "v2", 0)).unwrap();
        store.put_instance(&test_instance("app-2", "v1", 0)).unwrap();

        let v1 = store.list_instances("app-1", "v1").unwrap();
        assert_eq!(v1.len(), 2);
        assert_eq!(v1[0].index, 0);
        assert_eq!(v1[1].index, 1);
        assert_eq!(store.list_instances("app-1", "v2").unwrap().len(), 1);
    }

    #[test]
    fn instance_list_orders_past_ten() {
        let store = StateStore::open_in_memory().unwrap();
        for index in (0..12).rev() {
            store.put_instance(&test_instance("app-1", "v1", index)).unwrap();
        }
        let indexes: Vec<u32> = store
            .list_instances("app-1", "v1")
            .unwrap()
            .iter()
            .map(|r| r.index)
            .collect();
        assert_eq!(indexes, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn instance_delete_single() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("app-1", "v1", 0)).unwrap();

        assert!(store.delete_instance("app-1", "v1", 0).unwrap());
        assert!(!store.delete_instance("app-1", "v1", 0).unwrap());
    }

    #[test]
    fn instance_delete_all_for_version() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_instance(&test_instance("app-1", "v1", 0)).unwrap();
        store.put_instance(&test_instance("app-1", "v1", 1)).unwrap();
        store.put_instance(&test_instance("app-1", "v2", 0)).unwrap();

        assert_eq!(store.delete_instances("app-1", "v1").unwrap(), 2);
        assert!(store.list_instances("app-1", "v1").unwrap().is_empty());
        // v2 untouched
        assert_eq!(store.list_instances("app-1", "v2").unwrap().len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.create_deployment(&test_deployment("dep-1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let deployment = store.get_deployment("dep-1").unwrap();
        assert_eq!(deployment.map(|d| d.app_id), Some("app-1".to_string()));
    }

    #[test]
    fn second_open_reports_busy_until_first_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let first = StateStore::open(&db_path).unwrap();
        let err = StateStore::open(&db_path).err().unwrap();
        assert!(matches!(err, StateError::Busy(_)));

        drop(first);
        assert!(StateStore::open(&db_path).is_ok());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_instances("any", "v1").unwrap().is_empty());
        assert_eq!(store.delete_instances("any", "v1").unwrap(), 0);
        assert!(!store.delete_deployment("nope").unwrap());
    }
}
