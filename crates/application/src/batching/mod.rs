//! Time-windowed, per-camera batch aggregation.

mod aggregator;

pub use aggregator::BatchAggregator;
