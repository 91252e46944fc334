//! Win-probability model: classifier, isotonic calibration, versioning.
//!
//! ```text
//! labeled history ──► LogisticClassifier::fit ──► raw scores
//!                                                   │
//!                         IsotonicCalibration::fit ◄┘
//!                                   │
//!                    ModelSnapshot (versioned, validated)
//!                                   │
//!            ModelCalibrator (active + previous) ◄──► ModelRegistry (disk)
//! ```

pub mod calibrator;
pub mod classifier;
pub mod isotonic;
pub mod registry;
pub mod schema;
pub mod snapshot;

pub use calibrator::{ModelCalibrator, RefreshReport};
pub use classifier::{sigmoid, LabeledOutcome, LabeledSample, LogisticClassifier};
pub use isotonic::IsotonicCalibration;
pub use registry::{LatestPointer, ModelRegistry};
pub use schema::FeatureSchema;
pub use snapshot::{format_version_id, ModelMetrics, ModelSnapshot};
