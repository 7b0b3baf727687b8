// src/utils/mod.rs
pub mod fixed_point;

pub use fixed_point::{from_fixed_point, to_fixed_point};
