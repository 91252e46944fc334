//! Feature store persistence.
//!
//! One JSON Lines file holds the committed state: a header line followed by
//! one row per constituency. Every commit also leaves an immutable backup.
//!
//! ```text
//! base_dir/
//! ├── features_latest.jsonl                       (promoted atomically)
//! ├── .writer.lock                                (held during a cycle)
//! └── backups/
//!     └── features_2025-10-15_060000.jsonl        (create_new, never rewritten)
//! ```
//!
//! Readers never take the lock: the tmp-then-rename promotion means they see
//! either the previous or the new file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::vector::{ConstituencyBaseline, ConstituencyFeatureVector, FEATURE_NAMES};
use crate::forecast::config::FeatureBounds;
use crate::forecast::infra::fs::{ensure_dir, write_atomic, write_new};
use crate::forecast::infra::WriterLock;
use crate::{Error, Result, StorageError};

/// On-disk format revision of the header + rows layout.
pub const STORE_FORMAT_VERSION: u32 = 1;

const LATEST_FILE: &str = "features_latest.jsonl";
const LOCK_FILE: &str = ".writer.lock";
const BACKUP_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "features_";
const BACKUP_SUFFIX: &str = ".jsonl";
const BACKUP_TS_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// First line of every store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub format_version: u32,
    /// Monotonic commit counter.
    pub store_version: u64,
    /// Feature names in model order.
    pub schema: Vec<String>,
    pub committed_at: DateTime<Utc>,
    pub row_count: usize,
}

/// A stored row that could not be used. Logged and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowIssue {
    /// 1-based line number in the file.
    pub line: usize,
    pub reason: String,
}

/// A loaded store file.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub header: StoreHeader,
    pub vectors: Vec<ConstituencyFeatureVector>,
    pub skipped_rows: Vec<RowIssue>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub store_version: u64,
    pub row_count: usize,
    pub latest_path: PathBuf,
    pub backup_path: PathBuf,
}

/// One immutable backup file.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
}

/// Data-quality summary over a set of vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreValidation {
    pub rows: usize,
    pub duplicates: Vec<String>,
    pub non_finite: Vec<String>,
    /// (constituency id, feature name)
    pub out_of_bounds: Vec<(String, String)>,
    /// Share of rows with no issue, in [0, 1].
    pub quality_score: f64,
}

impl StoreValidation {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.non_finite.is_empty() && self.out_of_bounds.is_empty()
    }
}

/// Check a vector set for duplicate ids, non-finite values and bound breaches.
pub fn validate_vectors(
    vectors: &[ConstituencyFeatureVector],
    bounds: &FeatureBounds,
) -> StoreValidation {
    let mut seen = HashSet::new();
    let mut bad_rows = HashSet::new();
    let mut report = StoreValidation {
        rows: vectors.len(),
        ..Default::default()
    };

    for (idx, fv) in vectors.iter().enumerate() {
        if !seen.insert(fv.constituency_id.as_str()) {
            report.duplicates.push(fv.constituency_id.clone());
            bad_rows.insert(idx);
        }
        if !fv.all_finite() {
            report.non_finite.push(fv.constituency_id.clone());
            bad_rows.insert(idx);
        }
        for name in fv.out_of_bounds(bounds) {
            report
                .out_of_bounds
                .push((fv.constituency_id.clone(), name.to_string()));
            bad_rows.insert(idx);
        }
    }

    report.quality_score = if vectors.is_empty() {
        1.0
    } else {
        1.0 - bad_rows.len() as f64 / vectors.len() as f64
    };
    report
}

/// Current feature schema as owned strings.
pub fn store_schema() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// File-backed feature store.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    base_dir: PathBuf,
}

impl FeatureStore {
    /// Open (creating directories if needed).
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        ensure_dir(&base_dir.join(BACKUP_DIR))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.base_dir.join(LATEST_FILE)
    }

    fn backup_dir(&self) -> PathBuf {
        self.base_dir.join(BACKUP_DIR)
    }

    /// Take the single-writer lock. Fails fast if another writer holds it.
    pub fn lock_writer(&self) -> Result<WriterLock> {
        WriterLock::acquire(&self.base_dir.join(LOCK_FILE))
    }

    /// Load the committed state. `Ok(None)` if nothing was ever committed.
    pub fn load_latest(&self) -> Result<Option<StoreSnapshot>> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(None);
        }
        self.load_path(&path).map(Some)
    }

    /// Load any store file (latest or backup).
    pub fn load_path(&self, path: &Path) -> Result<StoreSnapshot> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut lines = content.lines().enumerate();

        let header: StoreHeader = lines
            .next()
            .and_then(|(_, line)| serde_json::from_str(line).ok())
            .ok_or_else(|| StorageError::Header(path.display().to_string()))?;

        let mut vectors = Vec::with_capacity(header.row_count);
        let mut skipped_rows = Vec::new();
        let mut seen = HashSet::new();

        for (idx, line) in lines {
            let line_num = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConstituencyFeatureVector>(line) {
                Ok(fv) if !seen.insert(fv.constituency_id.clone()) => {
                    warn!(
                        line = line_num,
                        constituency = %fv.constituency_id,
                        "Skipping duplicate constituency row"
                    );
                    skipped_rows.push(RowIssue {
                        line: line_num,
                        reason: format!("duplicate constituency {}", fv.constituency_id),
                    });
                }
                Ok(fv) => vectors.push(fv),
                Err(e) => {
                    warn!(line = line_num, error = %e, "Skipping malformed feature row");
                    skipped_rows.push(RowIssue {
                        line: line_num,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if vectors.len() + skipped_rows.len() != header.row_count {
            warn!(
                expected = header.row_count,
                found = vectors.len() + skipped_rows.len(),
                "Row count differs from header in {}",
                path.display()
            );
        }

        info!(
            store_version = header.store_version,
            rows = vectors.len(),
            skipped = skipped_rows.len(),
            "Loaded feature store from {}",
            path.display()
        );

        Ok(StoreSnapshot {
            header,
            vectors,
            skipped_rows,
        })
    }

    fn current_version(&self) -> Result<u64> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(0);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let header: StoreHeader = content
            .lines()
            .next()
            .and_then(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| StorageError::Header(path.display().to_string()))?;
        Ok(header.store_version)
    }

    /// Write `vectors` as the new committed state.
    ///
    /// 1. Writes the immutable backup `backups/features_<as_of>.jsonl`
    /// 2. Promotes `features_latest.jsonl` via tmp + rename
    ///
    /// The lock parameter proves the caller is the single writer.
    pub fn commit(
        &self,
        _lock: &WriterLock,
        vectors: &[ConstituencyFeatureVector],
        as_of: DateTime<Utc>,
    ) -> Result<CommitReceipt> {
        let header = StoreHeader {
            format_version: STORE_FORMAT_VERSION,
            store_version: self.current_version()? + 1,
            schema: store_schema(),
            committed_at: as_of,
            row_count: vectors.len(),
        };

        let latest_path = self.latest_path();
        let mut body = serde_json::to_string(&header).map_err(|e| Error::json(&latest_path, e))?;
        body.push('\n');
        for fv in vectors {
            let row = serde_json::to_string(fv).map_err(|e| Error::json(&latest_path, e))?;
            body.push_str(&row);
            body.push('\n');
        }

        let backup_path = self.backup_dir().join(format!(
            "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
            as_of.format(BACKUP_TS_FORMAT)
        ));
        write_new(&backup_path, body.as_bytes())?;
        write_atomic(&latest_path, body.as_bytes())?;

        info!(
            store_version = header.store_version,
            rows = header.row_count,
            backup = %backup_path.display(),
            "Feature store committed"
        );

        Ok(CommitReceipt {
            store_version: header.store_version,
            row_count: header.row_count,
            latest_path,
            backup_path,
        })
    }

    /// Create the initial store from historical baseline rows.
    pub fn bootstrap(
        &self,
        lock: &WriterLock,
        baselines: &[ConstituencyBaseline],
        initial_volatility: f64,
        as_of: DateTime<Utc>,
    ) -> Result<CommitReceipt> {
        if self.latest_path().exists() {
            return Err(Error::invalid_input(format!(
                "feature store already bootstrapped at {}",
                self.latest_path().display()
            )));
        }
        if baselines.is_empty() {
            return Err(Error::invalid_input("no baseline rows"));
        }

        let mut seen = HashSet::new();
        for row in baselines {
            if !seen.insert(row.constituency_id.as_str()) {
                return Err(Error::DuplicateConstituency(row.constituency_id.clone()));
            }
            if row.constituency_id.trim().is_empty() || !row.shares.is_valid() {
                return Err(Error::invalid_input(format!(
                    "invalid baseline row for '{}'",
                    row.constituency_id
                )));
            }
        }

        let vectors: Vec<_> = baselines
            .iter()
            .map(|b| ConstituencyFeatureVector::from_baseline(b, initial_volatility, as_of))
            .collect();
        self.commit(lock, &vectors, as_of)
    }

    /// All backups, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let name = entry.file_name();
            if let Some(taken_at) = parse_backup_name(&name.to_string_lossy()) {
                backups.push(BackupEntry {
                    path: entry.path(),
                    taken_at,
                });
            }
        }
        backups.sort_by_key(|b| b.taken_at);
        Ok(backups)
    }

    /// Delete backups older than the retention window. Backups inside the
    /// window are never touched. Returns the number removed.
    pub fn prune_backups(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let mut removed = 0;
        for backup in self.list_backups()? {
            if backup.taken_at < cutoff {
                fs::remove_file(&backup.path).map_err(|e| Error::io(&backup.path, e))?;
                debug!(taken_at = %backup.taken_at, "Removed old backup: {}", backup.path.display());
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, retention_days, "Cleaned up old feature backups");
        }
        Ok(removed)
    }

    /// Re-commit a backup's rows as a new version. History stays immutable.
    pub fn restore_backup(
        &self,
        lock: &WriterLock,
        backup_path: &Path,
        as_of: DateTime<Utc>,
    ) -> Result<CommitReceipt> {
        let snapshot = self.load_path(backup_path)?;
        if snapshot.vectors.is_empty() {
            return Err(Error::StoreEmpty(backup_path.display().to_string()));
        }
        info!(
            from_version = snapshot.header.store_version,
            "Restoring feature store from {}",
            backup_path.display()
        );
        self.commit(lock, &snapshot.vectors, as_of)
    }
}

fn parse_backup_name(name: &str) -> Option<DateTime<Utc>> {
    let ts = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    NaiveDateTime::parse_from_str(ts, BACKUP_TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::vector::BaselineShares;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, 6, 0, 0).unwrap()
    }

    fn baselines() -> Vec<ConstituencyBaseline> {
        ["AC_001", "AC_002", "AC_003"]
            .iter()
            .map(|id| ConstituencyBaseline {
                constituency_id: id.to_string(),
                region: "North".to_string(),
                shares: BaselineShares::new(45.0, 40.0, 15.0),
            })
            .collect()
    }

    fn bootstrapped() -> (tempfile::TempDir, FeatureStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::open(dir.path()).unwrap();
        let lock = store.lock_writer().unwrap();
        store.bootstrap(&lock, &baselines(), 2.5, ts(1)).unwrap();
        (dir, store)
    }

    #[test]
    fn test_empty_store_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::open(dir.path()).unwrap();
        assert!(store.load_latest().unwrap().is_none());
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_and_reload() {
        let (_dir, store) = bootstrapped();
        let snapshot = store.load_latest().unwrap().unwrap();
        assert_eq!(snapshot.header.store_version, 1);
        assert_eq!(snapshot.header.schema, store_schema());
        assert_eq!(snapshot.vectors.len(), 3);
        assert_eq!(snapshot.vectors[0].poll_lead, 5.0);
        assert!(snapshot.skipped_rows.is_empty());
        assert_eq!(store.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_bootstrap_rejects_duplicates_and_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::open(dir.path()).unwrap();
        let lock = store.lock_writer().unwrap();
        let mut rows = baselines();
        rows.push(rows[0].clone());
        assert!(matches!(
            store.bootstrap(&lock, &rows, 2.5, ts(1)),
            Err(Error::DuplicateConstituency(id)) if id == "AC_001"
        ));
        assert!(store.load_latest().unwrap().is_none());

        store.bootstrap(&lock, &baselines(), 2.5, ts(1)).unwrap();
        assert!(store.bootstrap(&lock, &baselines(), 2.5, ts(2)).is_err());
    }

    #[test]
    fn test_commit_increments_version_and_keeps_backups() {
        let (_dir, store) = bootstrapped();
        let lock = store.lock_writer().unwrap();
        let mut vectors = store.load_latest().unwrap().unwrap().vectors;
        vectors[0].sentiment_a = 0.3;

        let receipt = store.commit(&lock, &vectors, ts(2)).unwrap();
        assert_eq!(receipt.store_version, 2);
        assert!(receipt.backup_path.ends_with("features_2025-10-02_060000.jsonl"));

        let backups = store.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        let first = store.load_path(&backups[0].path).unwrap();
        assert_eq!(first.vectors[0].sentiment_a, 0.0);
        assert_eq!(store.load_latest().unwrap().unwrap().vectors[0].sentiment_a, 0.3);
    }

    #[test]
    fn test_backup_never_overwritten() {
        let (_dir, store) = bootstrapped();
        let lock = store.lock_writer().unwrap();
        let vectors = store.load_latest().unwrap().unwrap().vectors;
        let err = store.commit(&lock, &vectors, ts(1)).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::BackupExists(_))));
        // promotion did not happen
        assert_eq!(store.load_latest().unwrap().unwrap().header.store_version, 1);
    }

    #[test]
    fn test_malformed_row_skipped() {
        let (_dir, store) = bootstrapped();
        let path = store.latest_path();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"constituency_id\": \"AC_004\", \"broken\n");
        fs::write(&path, content).unwrap();

        let snapshot = store.load_latest().unwrap().unwrap();
        assert_eq!(snapshot.vectors.len(), 3);
        assert_eq!(snapshot.skipped_rows.len(), 1);
        assert_eq!(snapshot.skipped_rows[0].line, 5);
    }

    #[test]
    fn test_missing_header_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::open(dir.path()).unwrap();
        fs::write(store.latest_path(), "garbage\n").unwrap();
        assert!(matches!(
            store.load_latest(),
            Err(Error::Storage(StorageError::Header(_)))
        ));
    }

    #[test]
    fn test_prune_respects_retention() {
        let (_dir, store) = bootstrapped();
        let lock = store.lock_writer().unwrap();
        let vectors = store.load_latest().unwrap().unwrap().vectors;
        store.commit(&lock, &vectors, ts(20)).unwrap();

        // Oct 1 backup is 40 days old, Oct 20 is 21 days old
        let now = Utc.with_ymd_and_hms(2025, 11, 10, 6, 0, 0).unwrap();
        assert_eq!(store.prune_backups(30, now).unwrap(), 1);
        let remaining = store.list_backups().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].taken_at, ts(20));
        assert_eq!(store.prune_backups(30, now).unwrap(), 0);
    }

    #[test]
    fn test_restore_backup_creates_new_version() {
        let (_dir, store) = bootstrapped();
        let lock = store.lock_writer().unwrap();
        let mut vectors = store.load_latest().unwrap().unwrap().vectors;
        vectors[1].poll_lead = -12.0;
        store.commit(&lock, &vectors, ts(2)).unwrap();

        let first_backup = store.list_backups().unwrap()[0].path.clone();
        let receipt = store.restore_backup(&lock, &first_backup, ts(3)).unwrap();
        assert_eq!(receipt.store_version, 3);
        assert_eq!(store.load_latest().unwrap().unwrap().vectors[1].poll_lead, 5.0);
    }

    #[test]
    fn test_validate_vectors() {
        let bounds = FeatureBounds::default();
        let mut vectors: Vec<_> = baselines()
            .iter()
            .map(|b| ConstituencyFeatureVector::from_baseline(b, 2.5, ts(1)))
            .collect();
        assert!(validate_vectors(&vectors, &bounds).is_clean());

        vectors[1].sentiment_b = -4.0;
        vectors.push(vectors[0].clone());
        let report = validate_vectors(&vectors, &bounds);
        assert_eq!(report.duplicates, vec!["AC_001".to_string()]);
        assert_eq!(
            report.out_of_bounds,
            vec![("AC_002".to_string(), "sentiment_b".to_string())]
        );
        assert!((report.quality_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_backup_name_parsing() {
        assert_eq!(
            parse_backup_name("features_2025-10-01_060000.jsonl"),
            Some(ts(1))
        );
        assert_eq!(parse_backup_name("features_latest.jsonl"), None);
        assert_eq!(parse_backup_name("notes.txt"), None);
    }
}
