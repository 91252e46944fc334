//! Constituency feature vectors: storage, validation and EMA updates.

pub mod store;
pub mod updater;
pub mod vector;

pub use store::{
    store_schema, validate_vectors, BackupEntry, CommitReceipt, FeatureStore, RowIssue,
    StoreHeader, StoreSnapshot, StoreValidation,
};
pub use updater::{ema, DataGap, FeatureUpdater, UpdateReport};
pub use vector::{BaselineShares, ConstituencyBaseline, ConstituencyFeatureVector, FEATURE_NAMES};
