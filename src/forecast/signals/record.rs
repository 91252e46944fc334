//! Normalized signal records handed over by the ingestion/NLP collaborators.
//!
//! A record is a fixed tagged structure: scope, alliance, kind, value and
//! timestamp are required; sample size and source quality default to 1.0.
//! Records are validated, never coerced. Whether a sentiment score came from
//! a transformer model or a keyword fallback makes no difference here.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::forecast::types::Alliance;
use crate::{Error, Result, SignalError};

/// Geographic scope of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum SignalScope {
    /// Direct coverage of one constituency
    Constituency(String),
    /// Region-wide coverage (feeds the regional modifier)
    Region(String),
}

impl SignalScope {
    pub fn id(&self) -> &str {
        match self {
            SignalScope::Constituency(id) | SignalScope::Region(id) => id,
        }
    }
}

/// What the value measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Sentiment toward the alliance, in [-1, 1]
    Sentiment,
    /// Poll vote share for the alliance, in percentage points [0, 100]
    Poll,
}

impl SignalKind {
    /// Allowed value range.
    pub fn value_range(self) -> (f64, f64) {
        match self {
            SignalKind::Sentiment => (-1.0, 1.0),
            SignalKind::Poll => (0.0, 100.0),
        }
    }
}

fn default_sample_size() -> f64 {
    1.0
}

fn default_source_quality() -> f64 {
    1.0
}

/// One normalized signal observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub scope: SignalScope,
    pub alliance: Alliance,
    pub kind: SignalKind,
    pub value: f64,
    /// Respondents / articles behind the value. Weighted by its square root.
    #[serde(default = "default_sample_size")]
    pub sample_size: f64,
    /// Upstream source reliability in [0, 1].
    #[serde(default = "default_source_quality")]
    pub source_quality: f64,
    pub observed_at: DateTime<Utc>,
}

impl SignalRecord {
    /// Sentiment record with default weights.
    pub fn sentiment(
        scope: SignalScope,
        alliance: Alliance,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scope,
            alliance,
            kind: SignalKind::Sentiment,
            value,
            sample_size: default_sample_size(),
            source_quality: default_source_quality(),
            observed_at,
        }
    }

    /// Poll vote-share record with default weights.
    pub fn poll(
        scope: SignalScope,
        alliance: Alliance,
        vote_share: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: SignalKind::Poll,
            ..Self::sentiment(scope, alliance, vote_share, observed_at)
        }
    }

    pub fn with_sample_size(mut self, sample_size: f64) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_source_quality(mut self, source_quality: f64) -> Self {
        self.source_quality = source_quality;
        self
    }

    /// Check every field against its declared domain.
    pub fn validate(&self) -> std::result::Result<(), SignalError> {
        if self.scope.id().trim().is_empty() {
            return Err(SignalError::EmptyScope);
        }
        let checks = [
            ("value", self.value),
            ("sample_size", self.sample_size),
            ("source_quality", self.source_quality),
        ];
        for (field, v) in checks {
            if !v.is_finite() {
                return Err(SignalError::NonFinite { field });
            }
        }
        let (min, max) = self.kind.value_range();
        if self.value < min || self.value > max {
            return Err(SignalError::OutOfRange {
                field: "value",
                value: self.value,
                min,
                max,
            });
        }
        if self.sample_size < 0.0 {
            return Err(SignalError::OutOfRange {
                field: "sample_size",
                value: self.sample_size,
                min: 0.0,
                max: f64::MAX,
            });
        }
        if !(0.0..=1.0).contains(&self.source_quality) {
            return Err(SignalError::OutOfRange {
                field: "source_quality",
                value: self.source_quality,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }
}

/// A validated batch of records for one cycle.
#[derive(Debug, Clone, Default)]
pub struct SignalBatch {
    pub records: Vec<SignalRecord>,
    /// Records dropped at the boundary (malformed or out of domain).
    pub rejected: usize,
}

impl SignalBatch {
    /// Validate already-typed records, dropping invalid ones.
    pub fn from_records(records: Vec<SignalRecord>) -> Self {
        let mut batch = Self::default();
        for (idx, record) in records.into_iter().enumerate() {
            batch.push_checked(record, idx + 1);
        }
        batch
    }

    /// Parse JSON Lines. Malformed lines are skipped and counted; only I/O
    /// failures abort.
    pub fn from_jsonl<R: BufRead>(reader: R) -> Result<Self> {
        let mut batch = Self::default();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::invalid_input(format!("read signals: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SignalRecord>(&line) {
                Ok(record) => batch.push_checked(record, line_num + 1),
                Err(e) => {
                    warn!(
                        line = line_num + 1,
                        error = %SignalError::Json(e.to_string()),
                        "Skipping malformed signal record"
                    );
                    batch.rejected += 1;
                }
            }
        }
        Ok(batch)
    }

    /// Read a JSON Lines file.
    pub fn read_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let batch = Self::from_jsonl(BufReader::new(file))?;
        info!(
            accepted = batch.records.len(),
            rejected = batch.rejected,
            "Loaded signal batch from {}",
            path.display()
        );
        Ok(batch)
    }

    fn push_checked(&mut self, record: SignalRecord, position: usize) {
        match record.validate() {
            Ok(()) => self.records.push(record),
            Err(e) => {
                warn!(
                    position,
                    scope = record.scope.id(),
                    error = %e,
                    "Rejecting signal record"
                );
                self.rejected += 1;
            }
        }
    }
}
