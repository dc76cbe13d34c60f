//! Converts a scenario phase into a batch of `Detection`s with sampled
//! confidence values, the same noise model shape the teacher's physics
//! module used for per-epoch measurement jitter.

use detection_types::Detection;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::scenarios::PhaseConfig;

pub fn sample_detections(phase: &PhaseConfig, rng: &mut impl Rng) -> Vec<Detection> {
    phase
        .labels
        .iter()
        .map(|spec| {
            let normal = Normal::new(spec.mean_confidence, spec.stddev.max(0.001))
                .expect("label confidence stddev must be finite and positive");
            let confidence = normal.sample(rng).clamp(0.0, 1.0);
            Detection {
                label: spec.label,
                confidence,
            }
        })
        .collect()
}
