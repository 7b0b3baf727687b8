// src/processing/mod.rs
pub mod calculator;
pub mod cloud_mask;
pub mod composite;
pub mod expression;
pub mod indices;
pub mod parallel;
pub mod reducer;

// Re-export main components
pub use calculator::{evaluate, normalized_difference};
pub use cloud_mask::{derive_mask, CloudMask};
pub use composite::{composite, CompositeMode};
pub use expression::{BandMathExpression, Binding, Expression};
pub use parallel::{compute_index, ParallelProcessor};
pub use reducer::{Histogram, HistogramBucket, PercentileValue, ZonalReducer, ZonalStatistics};
