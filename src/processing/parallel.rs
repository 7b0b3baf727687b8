// src/processing/parallel.rs
use std::thread;

use flume::{Receiver, Sender};
use log::debug;
use parking_lot::Mutex;

use super::calculator::evaluate;
use super::indices::IndexCalculator;
use crate::error::{Error, Result};
use crate::raster::{BandRaster, RasterStack};

/// Fans independent jobs out over a fixed set of worker threads.
///
/// Jobs are queued on a channel and picked up by whichever worker is free;
/// results are slotted back by job index, so output order always matches
/// input order and the outcome equals sequential evaluation.
pub struct ParallelProcessor {
    workers: usize,
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ParallelProcessor {
    pub fn new(workers: Option<usize>) -> Self {
        let workers = workers.unwrap_or_else(num_cpus::get).max(1);
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `job` to every item, keeping input order
    pub fn map<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let results: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());
        let (tx, rx): (Sender<(usize, T)>, Receiver<(usize, T)>) = flume::unbounded();
        for item in items.into_iter().enumerate() {
            // receiver is alive until the end of this function
            let _ = tx.send(item);
        }
        drop(tx);

        let workers = self.workers.min(total);
        debug!("dispatching {total} jobs to {workers} workers");

        let job = &job;
        let results_ref = &results;
        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                scope.spawn(move || {
                    for (idx, item) in rx {
                        let output = job(item);
                        results_ref.lock()[idx] = Some(output);
                    }
                });
            }
        });

        results.into_inner().into_iter().flatten().collect()
    }

    /// Evaluate every calculator against the same stack
    pub fn compute_indices(
        &self,
        stack: &RasterStack,
        calculators: &[Box<dyn IndexCalculator>],
        reflectance_scale: Option<f64>,
    ) -> Result<Vec<BandRaster>> {
        self.map(calculators.iter().collect(), |calculator| {
            compute_index(calculator.as_ref(), stack, reflectance_scale)
        })
        .into_iter()
        .collect()
    }
}

/// Evaluate one index. Calculators that need reflectance in [0, 1] read
/// every band divided by `reflectance_scale` (e.g. 10000 for Sentinel-2 L2A).
pub fn compute_index(
    calculator: &dyn IndexCalculator,
    stack: &RasterStack,
    reflectance_scale: Option<f64>,
) -> Result<BandRaster> {
    let mut expr = calculator.expression();

    if let Some(scale) = reflectance_scale {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::invalid_parameter(
                "reflectance_scale",
                scale,
                "must be finite and > 0",
            ));
        }
        let needs_scaling = calculator.needs_input_scaling() && (scale - 1.0).abs() > f64::EPSILON;
        debug!(
            "{}: needs_input_scaling={}, reflectance_scale={}, scaling={}",
            calculator.name(),
            calculator.needs_input_scaling(),
            scale,
            needs_scaling
        );
        if needs_scaling {
            expr.formula = expr.formula.scale_bands(scale);
        }
    }

    evaluate(stack, &expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::indices::{NDI, SAVI};
    use crate::raster::{GeoTransform, SpatialRef};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn stack() -> RasterStack {
        RasterStack::new(SpatialRef::new("EPSG:4326", GeoTransform::default()), 1, 2)
            .with_band("B4", array![[1000.0, 2000.0]])
            .unwrap()
            .with_band("B8", array![[3000.0, 2000.0]])
            .unwrap()
    }

    #[test]
    fn test_map_preserves_order() {
        let processor = ParallelProcessor::new(Some(3));
        let out = processor.map((0..50).collect(), |x: i32| x * 2);
        assert_eq!(out, (0..50).map(|x| x * 2).collect::<Vec<_>>());
        assert!(processor.map(Vec::<i32>::new(), |x| x).is_empty());
    }

    #[test]
    fn test_compute_indices_matches_sequential() {
        let calculators: Vec<Box<dyn IndexCalculator>> = vec![
            Box::new(NDI::new("B8", "B4", Some("NDVI".into()))),
            Box::new(SAVI::new("B8", "B4", 0.5, None)),
        ];
        let s = stack();
        let parallel = ParallelProcessor::new(Some(2))
            .compute_indices(&s, &calculators, Some(10000.0))
            .unwrap();
        for (calc, raster) in calculators.iter().zip(&parallel) {
            let sequential = compute_index(calc.as_ref(), &s, Some(10000.0)).unwrap();
            assert_eq!(raster.name(), sequential.name());
            assert_eq!(raster.values(), sequential.values());
        }
    }

    #[test]
    fn test_scaling_applies_only_when_needed() {
        let s = stack();
        let ndvi = NDI::new("B8", "B4", None);
        let raw = compute_index(&ndvi, &s, None).unwrap();
        let scaled = compute_index(&ndvi, &s, Some(10000.0)).unwrap();
        assert_relative_eq!(raw.get(0, 0).unwrap(), scaled.get(0, 0).unwrap(), epsilon = 1e-6);

        // SAVI on reflectance 0.3 / 0.1: 1.5 * 0.2 / 0.9
        let savi = SAVI::new("B8", "B4", 0.5, None);
        let out = compute_index(&savi, &s, Some(10000.0)).unwrap();
        assert_relative_eq!(out.get(0, 0).unwrap(), 1.5 * 0.2 / 0.9, epsilon = 1e-5);
    }

    #[test]
    fn test_invalid_scale() {
        let ndvi = NDI::new("B8", "B4", None);
        assert!(matches!(
            compute_index(&ndvi, &stack(), Some(0.0)),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
