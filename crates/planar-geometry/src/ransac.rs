use rand::prelude::*;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correspondences::Correspondences;
use crate::dlt::{homography_dlt, MIN_CORRESPONDENCES};
use crate::error::HomographyError;
use crate::homography::Homography;

/// Number of hypotheses scored together in parallel mode.
const PARALLEL_BATCH_SIZE: usize = 64;

/// Parameters for RANSAC homography estimation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Inlier threshold in pixels.
    ///
    /// A pair is an inlier when its symmetric transfer error is below `threshold^2`.
    pub threshold: f64,
    /// Upper bound on the number of sampled hypotheses.
    pub max_iterations: usize,
    /// Probability of drawing at least one outlier-free sample, drives the adaptive budget.
    pub confidence: f64,
    /// Optional RNG seed for deterministic runs.
    pub random_seed: Option<u64>,
    /// Score hypotheses in batches on the rayon pool.
    pub parallel: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.99,
            random_seed: Some(0),
            parallel: false,
        }
    }
}

impl RansacParams {
    /// Set the inlier threshold in pixels.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the confidence of the adaptive stopping criterion.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set or clear the RNG seed.
    pub fn with_random_seed(mut self, random_seed: Option<u64>) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// Enable or disable batched parallel scoring.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Result of a RANSAC homography fit.
#[derive(Clone, Debug)]
pub struct RansacResult {
    /// Estimated model, refit on the consensus set.
    pub model: Homography,
    /// Per-correspondence inlier mask with respect to `model`.
    pub inliers: Vec<bool>,
    /// Total inlier count.
    pub inlier_count: usize,
    /// Number of hypotheses evaluated.
    pub iterations: usize,
}

/// A scored hypothesis.
#[derive(Clone, Debug)]
struct Candidate {
    model: Homography,
    inliers: Vec<bool>,
    inlier_count: usize,
}

/// Whether `candidate` replaces `best`. Ties keep the earlier candidate.
fn improves_on(candidate: &Candidate, best: Option<&Candidate>) -> bool {
    candidate.inlier_count > best.map_or(0, |b| b.inlier_count)
}

/// Symmetric transfer error `|H x - x'|^2 + |H^-1 x' - x|^2`.
///
/// Infinite when either point is mapped to infinity.
pub fn symmetric_transfer_error(
    h: &Homography,
    h_inv: &Homography,
    x1: &[f64; 2],
    x2: &[f64; 2],
) -> f64 {
    let (Some(fwd), Some(bwd)) = (h.project(*x1), h_inv.project(*x2)) else {
        return f64::INFINITY;
    };
    let (dx, dy) = (fwd[0] - x2[0], fwd[1] - x2[1]);
    let (ex, ey) = (bwd[0] - x1[0], bwd[1] - x1[1]);
    dx * dx + dy * dy + ex * ex + ey * ey
}

fn score_model(
    model: Homography,
    correspondences: &Correspondences,
    threshold_sq: f64,
) -> Option<Candidate> {
    let model_inv = model.inverse().ok()?;
    let inliers: Vec<bool> = correspondences
        .iter()
        .map(|(x1, x2)| symmetric_transfer_error(&model, &model_inv, x1, x2) < threshold_sq)
        .collect();
    let inlier_count = inliers.iter().filter(|&&b| b).count();
    Some(Candidate {
        model,
        inliers,
        inlier_count,
    })
}

fn evaluate_sample(
    sample: &[usize; 4],
    correspondences: &Correspondences,
    threshold_sq: f64,
) -> Option<Candidate> {
    let (src, dst) = (correspondences.src(), correspondences.dst());
    let s1 = sample.map(|i| src[i]);
    let s2 = sample.map(|i| dst[i]);
    let model = homography_dlt(&s1, &s2).ok()?;
    score_model(model, correspondences, threshold_sq)
}

/// Number of iterations needed to draw an outlier-free minimal sample with the
/// given confidence, for an inlier ratio `inlier_ratio`.
pub fn required_iterations(inlier_ratio: f64, confidence: f64) -> f64 {
    let p_outlier_sample = (1.0 - inlier_ratio.powi(MIN_CORRESPONDENCES as i32))
        .clamp(f64::EPSILON, 1.0 - f64::EPSILON);
    ((1.0 - confidence).ln() / p_outlier_sample.ln()).ceil()
}

/// Robustly estimate a homography with adaptive RANSAC.
///
/// Minimal samples of 4 distinct pairs are fitted with the normalized DLT and
/// scored by the symmetric transfer error. A hypothesis replaces the current
/// best only with a strictly larger consensus, and every improvement shrinks the
/// iteration budget to the number of samples needed at the requested confidence.
/// Degenerate samples count as iterations without inliers.
///
/// The best consensus set is refit with the DLT and the inlier mask recomputed
/// against the refit. If the refit is degenerate, the best minimal model is kept.
///
/// With `params.parallel` the samples are still drawn in order from a single
/// RNG and the batch results are reduced in sample order, so the output is
/// identical to the sequential run with the same seed.
///
/// # Errors
///
/// * [`HomographyError::InsufficientData`] for fewer than 4 pairs.
/// * [`HomographyError::NoConsensus`] when no hypothesis gathers 4 inliers.
pub fn ransac_homography(
    correspondences: &Correspondences,
    params: &RansacParams,
) -> Result<RansacResult, HomographyError> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Err(HomographyError::InsufficientData {
            required: MIN_CORRESPONDENCES,
            actual: n,
        });
    }

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            let mut tr = rand::rng();
            StdRng::from_rng(&mut tr)
        }
    };

    let threshold_sq = params.threshold * params.threshold;
    let batch_size = if params.parallel {
        PARALLEL_BATCH_SIZE
    } else {
        1
    };

    let mut best: Option<Candidate> = None;
    let mut budget = params.max_iterations;
    let mut performed = 0usize;

    while performed < budget {
        let samples: Vec<[usize; 4]> = (0..batch_size.min(budget - performed))
            .map(|_| {
                let idx = rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES);
                [idx.index(0), idx.index(1), idx.index(2), idx.index(3)]
            })
            .collect();

        let candidates: Vec<Option<Candidate>> = if params.parallel {
            samples
                .par_iter()
                .map(|s| evaluate_sample(s, correspondences, threshold_sq))
                .collect()
        } else {
            samples
                .iter()
                .map(|s| evaluate_sample(s, correspondences, threshold_sq))
                .collect()
        };

        for candidate in candidates {
            performed += 1;

            if let Some(candidate) = candidate {
                if improves_on(&candidate, best.as_ref()) {
                    let ratio = candidate.inlier_count as f64 / n as f64;
                    let required = required_iterations(ratio, params.confidence);
                    // saturating conversion, NaN maps to zero
                    budget = (required as usize)
                        .max(performed)
                        .min(params.max_iterations);

                    log::debug!(
                        "ransac iteration {performed}: {} inliers of {n}, budget {budget}",
                        candidate.inlier_count
                    );
                    best = Some(candidate);
                }
            }

            if performed >= budget {
                break;
            }
        }
    }

    let best = match best {
        Some(b) if b.inlier_count >= MIN_CORRESPONDENCES => b,
        other => {
            return Err(HomographyError::NoConsensus {
                best_inliers: other.map_or(0, |b| b.inlier_count),
                required: MIN_CORRESPONDENCES,
            })
        }
    };

    let consensus = correspondences.subset(&best.inliers)?;
    let refit = homography_dlt(consensus.src(), consensus.dst())
        .ok()
        .and_then(|h| score_model(h, correspondences, threshold_sq))
        .filter(|c| c.inlier_count >= MIN_CORRESPONDENCES);

    let chosen = match refit {
        Some(refit) => refit,
        None => {
            log::warn!(
                "ransac refit on {} inliers is degenerate, keeping the minimal model",
                best.inlier_count
            );
            best
        }
    };

    log::debug!(
        "ransac finished after {performed} iterations with {} of {n} inliers",
        chosen.inlier_count
    );

    Ok(RansacResult {
        model: chosen.model,
        inliers: chosen.inliers,
        inlier_count: chosen.inlier_count,
        iterations: performed,
    })
}
