//! Signal ingestion boundary and per-cycle aggregation.

pub mod aggregator;
pub mod record;

pub use aggregator::{
    contribution_weights, recency_weight, record_weight, AggregatedSignal, CycleSignals,
    ScopeSignals, SignalAggregator, SignalKey,
};
pub use record::{SignalBatch, SignalKind, SignalRecord, SignalScope};
