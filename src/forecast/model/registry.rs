//! On-disk model versions.
//!
//! ```text
//! model_dir/
//! ├── latest.json          pointer to the active version (promoted atomically)
//! ├── model_v000001.json   immutable snapshot
//! └── model_v000002.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::snapshot::ModelSnapshot;
use crate::forecast::infra::fs::{ensure_dir, write_atomic, write_new};
use crate::{Error, Result};

const LATEST_POINTER: &str = "latest.json";
const MODEL_PREFIX: &str = "model_v";
const MODEL_SUFFIX: &str = ".json";

/// Contents of `latest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: u64,
    pub version_id: String,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

impl ModelRegistry {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn version_path(&self, version: u64) -> PathBuf {
        self.dir
            .join(format!("{MODEL_PREFIX}{version:06}{MODEL_SUFFIX}"))
    }

    /// Persist a snapshot and make it the active version.
    pub fn save(&self, snapshot: &ModelSnapshot, now: DateTime<Utc>) -> Result<PathBuf> {
        let path = self.version_path(snapshot.version);
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| Error::json(&path, e))?;
        write_new(&path, json.as_bytes())?;
        self.write_pointer(snapshot, now)?;
        info!(
            version = snapshot.version,
            version_id = %snapshot.version_id,
            "Model saved to {}",
            path.display()
        );
        Ok(path)
    }

    fn write_pointer(&self, snapshot: &ModelSnapshot, now: DateTime<Utc>) -> Result<()> {
        let pointer = LatestPointer {
            version: snapshot.version,
            version_id: snapshot.version_id.clone(),
            promoted_at: now,
        };
        let path = self.dir.join(LATEST_POINTER);
        let json = serde_json::to_string_pretty(&pointer).map_err(|e| Error::json(&path, e))?;
        write_atomic(&path, json.as_bytes())
    }

    /// Active pointer, if any version was ever promoted.
    pub fn latest_pointer(&self) -> Result<Option<LatestPointer>> {
        let path = self.dir.join(LATEST_POINTER);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let pointer = serde_json::from_str(&json).map_err(|e| Error::json(&path, e))?;
        Ok(Some(pointer))
    }

    /// Load the active snapshot. `Ok(None)` if no model was ever saved.
    pub fn load_latest(&self) -> Result<Option<ModelSnapshot>> {
        match self.latest_pointer()? {
            Some(pointer) => self.load_version(pointer.version).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_version(&self, version: u64) -> Result<ModelSnapshot> {
        let path = self.version_path(version);
        if !path.exists() {
            return Err(Error::ModelNotFound(format!("v{version:06}")));
        }
        let json = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let snapshot: ModelSnapshot = serde_json::from_str(&json).map_err(|e| Error::json(&path, e))?;
        debug!(version, "Loaded model snapshot");
        Ok(snapshot)
    }

    /// Stored versions, ascending.
    pub fn list_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))? {
            let entry = entry.map_err(|e| Error::io(&self.dir, e))?;
            let name = entry.file_name();
            let parsed = name
                .to_string_lossy()
                .strip_prefix(MODEL_PREFIX)
                .and_then(|rest| rest.strip_suffix(MODEL_SUFFIX))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(v) = parsed {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Version number for the next saved snapshot.
    pub fn next_version(&self) -> Result<u64> {
        Ok(self.list_versions()?.last().copied().unwrap_or(0) + 1)
    }

    /// Make an existing version the active one.
    pub fn promote(&self, version: u64, now: DateTime<Utc>) -> Result<ModelSnapshot> {
        let snapshot = self.load_version(version)?;
        self.write_pointer(&snapshot, now)?;
        info!(version, version_id = %snapshot.version_id, "Model version promoted");
        Ok(snapshot)
    }

    /// Point `latest.json` at the newest version older than the active one.
    pub fn rollback(&self, now: DateTime<Utc>) -> Result<ModelSnapshot> {
        let active = self
            .latest_pointer()?
            .ok_or_else(|| Error::ModelNotFound("no active model".to_string()))?;
        let target = self
            .list_versions()?
            .into_iter()
            .filter(|v| *v < active.version)
            .max()
            .ok_or_else(|| {
                Error::ModelNotFound(format!("no version before v{:06}", active.version))
            })?;
        self.promote(target, now)
    }

    /// Keep the newest `keep` versions plus the active one; delete the rest.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let active = self.latest_pointer()?.map(|p| p.version);
        let versions = self.list_versions()?;
        let cutoff = versions.len().saturating_sub(keep);
        let mut removed = 0;
        for version in versions.into_iter().take(cutoff) {
            if Some(version) == active {
                continue;
            }
            let path = self.version_path(version);
            fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            debug!(version, "Removed old model version");
            removed += 1;
        }
        if removed > 0 {
            info!(removed, keep, "Cleaned up old model versions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::config::CalibratorConfig;
    use crate::forecast::model::schema::FeatureSchema;
    use crate::forecast::model::snapshot::test_support::{lead_driven_samples, t0};
    use chrono::Duration;

    fn snapshot(version: u64) -> ModelSnapshot {
        ModelSnapshot::train(
            version,
            lead_driven_samples(30, t0()),
            FeatureSchema::current(),
            &CalibratorConfig::default(),
            t0() + Duration::hours(version as i64),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        assert!(registry.load_latest().unwrap().is_none());
        assert_eq!(registry.next_version().unwrap(), 1);
        assert!(matches!(registry.load_version(1), Err(Error::ModelNotFound(_))));
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        registry.save(&snapshot(1), t0()).unwrap();
        registry.save(&snapshot(2), t0()).unwrap();

        assert!(dir.path().join("model_v000002.json").exists());
        assert_eq!(registry.list_versions().unwrap(), vec![1, 2]);
        let latest = registry.load_latest().unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.version_id, "v000002_20240101_020000");
        assert_eq!(registry.next_version().unwrap(), 3);
    }

    #[test]
    fn test_versions_are_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        registry.save(&snapshot(1), t0()).unwrap();
        assert!(registry.save(&snapshot(1), t0()).is_err());
    }

    #[test]
    fn test_rollback_moves_pointer_back() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        for v in 1..=3 {
            registry.save(&snapshot(v), t0()).unwrap();
        }
        assert_eq!(registry.rollback(t0()).unwrap().version, 2);
        assert_eq!(registry.rollback(t0()).unwrap().version, 1);
        assert!(registry.rollback(t0()).is_err());
        // versions are still on disk and next_version does not reuse them
        assert_eq!(registry.next_version().unwrap(), 4);
        assert_eq!(registry.promote(3, t0()).unwrap().version, 3);
    }

    #[test]
    fn test_prune_keeps_active() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        for v in 1..=5 {
            registry.save(&snapshot(v), t0()).unwrap();
        }
        registry.promote(1, t0()).unwrap();

        assert_eq!(registry.prune(2).unwrap(), 2);
        assert_eq!(registry.list_versions().unwrap(), vec![1, 4, 5]);
        assert_eq!(registry.load_latest().unwrap().unwrap().version, 1);
    }
}
