//! JSON snapshot persistence for the committed ledger state

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::store::LedgerState;

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Snapshot file `<dir>/<name>.json`; the directory is created if missing
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.as_ref().join(format!("{}.json", name)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<LedgerState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        let mut state: LedgerState = serde_json::from_slice(&data)?;
        state.rebuild_indexes();
        info!(path = %self.path.display(), "loaded ledger snapshot");
        Ok(Some(state))
    }

    /// Write to a sibling temp file, then rename over the snapshot
    pub fn save(&self, state: &LedgerState) -> Result<()> {
        let data = serde_json::to_vec(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_load_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "ssc").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_preserves_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested"), "ssc").unwrap();

        let db = Database::in_memory();
        let mut batch = db.begin();
        batch.init_database_hash("seed");
        batch.add_contract(crate::store::ContractRecord::new("dice", "alice", "", ""));
        assert!(batch.create_table("dice", "params", &[]));
        batch.insert("dice", "params", crate::value::object([("houseEdge", crate::value::Value::Float(0.01))]));
        let expected = batch.database_hash().to_string();
        batch.commit();

        store.save(&db.snapshot()).unwrap();
        assert!(!store.path().with_extension("json.tmp").exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.database_hash(), expected);
    }
}
