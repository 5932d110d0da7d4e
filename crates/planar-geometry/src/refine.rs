//! Gold Standard refinement of a homography.
//!
//! The homography entries and a corrected position for every source point are
//! estimated jointly by minimizing the reprojection error
//! `sum_i |x_i - x̂_i|^2 + |H x̂_i - x'_i|^2` with Levenberg-Marquardt.

use planar_optim::{
    Factor, FactorError, FactorResult, LevenbergMarquardt, LinearizationResult, Problem,
    ProblemError, TerminationReason, Variable,
};
use serde::{Deserialize, Serialize};

use crate::correspondences::Correspondences;
use crate::dlt::{normalize_points_2d, MIN_CORRESPONDENCES};
use crate::error::HomographyError;
use crate::homogeneous::W_EPSILON;
use crate::homography::Homography;
use crate::linalg::{self, Mat33};

const HOMOGRAPHY_VAR: &str = "homography";

/// Parameters controlling the Gold Standard refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease.
    pub cost_tolerance: f64,
    /// Convergence threshold on gradient norm.
    pub gradient_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

impl RefineParams {
    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iterations = max_iters;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    fn optimizer(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::default()
            .with_max_iterations(self.max_iterations)
            .with_cost_tolerance(self.cost_tolerance)
            .with_gradient_tolerance(self.gradient_tolerance)
            .with_lambda_init(self.initial_lambda)
    }
}

/// Output of [`refine_homography`].
#[derive(Debug, Clone)]
pub struct RefineResult {
    /// The refined homography, normalized.
    pub homography: Homography,
    /// Corrected source points `x̂_i`.
    pub corrected_src: Vec<[f64; 2]>,
    /// Corrected target points `H x̂_i`.
    pub corrected_dst: Vec<[f64; 2]>,
    /// Sum of squared reprojection errors at the start, in pixels^2.
    pub initial_error: f64,
    /// Sum of squared reprojection errors at the end, in pixels^2.
    pub final_error: f64,
    /// Number of LM iterations.
    pub iterations: usize,
    /// Whether the optimizer met one of its convergence criteria.
    pub converged: bool,
    /// Why the optimizer stopped, `None` if it failed.
    pub termination: Option<TerminationReason>,
}

impl RefineResult {
    /// Turn a non-converged refinement into an error.
    pub fn ensure_converged(self) -> Result<Self, HomographyError> {
        if self.converged {
            Ok(self)
        } else {
            Err(HomographyError::NumericalNonConvergence(format!(
                "stopped with {:?} after {} iterations (error {:.6e} -> {:.6e})",
                self.termination, self.iterations, self.initial_error, self.final_error
            )))
        }
    }
}

/// Reprojection factor of one correspondence.
///
/// Connects the homography (9 entries, row-major) and the corrected source
/// point. Residual: `r = [x - x̂, y - ŷ, u - x', v - y']` with `(u, v) = H (x̂, ŷ)`.
struct ReprojectionFactor {
    src: [f64; 2],
    dst: [f64; 2],
}

impl Factor for ReprojectionFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 2 {
            return Err(FactorError::DimensionMismatch {
                expected: 2,
                actual: params.len(),
            });
        }
        let (h, p) = (params[0], params[1]);
        if h.len() != 9 {
            return Err(FactorError::DimensionMismatch {
                expected: 9,
                actual: h.len(),
            });
        }
        if p.len() != 2 {
            return Err(FactorError::DimensionMismatch {
                expected: 2,
                actual: p.len(),
            });
        }

        let (x, y) = (p[0], p[1]);
        let c = h[6] * x + h[7] * y + h[8];
        if c.abs() < W_EPSILON {
            return Err(FactorError::InvalidParameters(format!(
                "point ({x}, {y}) is mapped to infinity"
            )));
        }
        let u = (h[0] * x + h[1] * y + h[2]) / c;
        let v = (h[3] * x + h[4] * y + h[5]) / c;

        let residual = vec![
            self.src[0] - x,
            self.src[1] - y,
            u - self.dst[0],
            v - self.dst[1],
        ];

        if !compute_jacobian {
            return Ok(LinearizationResult::new(residual, None, 11));
        }

        // columns: h0..h8, x̂, ŷ
        let mut jac = vec![0.0; 4 * 11];
        jac[9] = -1.0;
        jac[11 + 10] = -1.0;

        let row_u = &mut jac[22..33];
        row_u[0] = x / c;
        row_u[1] = y / c;
        row_u[2] = 1.0 / c;
        row_u[6] = -u * x / c;
        row_u[7] = -u * y / c;
        row_u[8] = -u / c;
        row_u[9] = (h[0] - u * h[6]) / c;
        row_u[10] = (h[1] - u * h[7]) / c;

        let row_v = &mut jac[33..44];
        row_v[3] = x / c;
        row_v[4] = y / c;
        row_v[5] = 1.0 / c;
        row_v[6] = -v * x / c;
        row_v[7] = -v * y / c;
        row_v[8] = -v / c;
        row_v[9] = (h[3] - v * h[6]) / c;
        row_v[10] = (h[4] - v * h[7]) / c;

        Ok(LinearizationResult::new(residual, Some(jac), 11))
    }

    fn residual_dim(&self) -> usize {
        4
    }

    fn num_variables(&self) -> usize {
        2
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        if idx == 0 {
            9
        } else {
            2
        }
    }
}

fn point_var(i: usize) -> String {
    format!("point_{i:06}")
}

fn values<'a>(problem: &'a Problem, name: &str) -> Result<&'a [f64], HomographyError> {
    problem.values(name).ok_or_else(|| {
        ProblemError::VariableNotFound {
            name: name.to_string(),
        }
        .into()
    })
}

fn apply(m: &Mat33, p: [f64; 2]) -> [f64; 2] {
    let q = linalg::mul_mat33_vec3(m, &[p[0], p[1], 1.0]);
    [q[0] / q[2], q[1] / q[2]]
}

/// `H p` for every point, keeping the matching `fallback` where `p` maps to infinity.
fn map_or_keep(h: &Homography, points: &[[f64; 2]], fallback: &[[f64; 2]]) -> Vec<[f64; 2]> {
    points
        .iter()
        .zip(fallback)
        .map(|(p, f)| h.project(*p).unwrap_or(*f))
        .collect()
}

/// The starting estimate reported as a non-converged refinement.
fn unrefined(
    h0: &Homography,
    correspondences: &Correspondences,
    error: f64,
    iterations: usize,
) -> RefineResult {
    RefineResult {
        homography: h0.normalized(),
        corrected_src: correspondences.src().to_vec(),
        corrected_dst: map_or_keep(h0, correspondences.src(), correspondences.dst()),
        initial_error: error,
        final_error: error,
        iterations,
        converged: false,
        termination: None,
    }
}

/// Refine a homography with the Gold Standard algorithm.
///
/// Minimizes `sum_i |x_i - x̂_i|^2 + |H x̂_i - x'_i|^2` over the 9 entries of `H`
/// and the corrected source points `x̂_i`, starting from `h0` and `x̂_i = x_i`.
/// The points are conditioned with a single similarity transform shared by both
/// images, which scales the cost uniformly and leaves the optimum unchanged.
///
/// The corrected points are eliminated from every linear solve with a Schur
/// complement, so each iteration factors a 9x9 system whatever the number of
/// correspondences.
///
/// The returned `final_error` never exceeds `initial_error`: if the optimizer
/// fails or ends above its starting cost, the starting parameters are returned
/// with `converged = false`. When `h0` maps a source point to infinity the
/// reprojection error is undefined; the starting parameters are returned with
/// both errors set to infinity and `termination = None`.
///
/// # Errors
///
/// * [`HomographyError::InsufficientData`] for fewer than 4 pairs.
/// * [`HomographyError::DegenerateTransform`] when `h0` is singular.
/// * [`HomographyError::DegenerateConfiguration`] when all points coincide.
pub fn refine_homography(
    h0: &Homography,
    correspondences: &Correspondences,
    params: &RefineParams,
) -> Result<RefineResult, HomographyError> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Err(HomographyError::InsufficientData {
            required: MIN_CORRESPONDENCES,
            actual: n,
        });
    }
    h0.inverse()?;

    // one similarity for both images keeps the cost proportional to pixels^2
    let all_points: Vec<[f64; 2]> = correspondences
        .src()
        .iter()
        .chain(correspondences.dst())
        .copied()
        .collect();
    let (_, t) = normalize_points_2d(&all_points)?;
    let t_inv = linalg::inverse_mat33(&t).ok_or_else(|| {
        HomographyError::DegenerateConfiguration("singular conditioning transform".to_string())
    })?;
    let cost_to_pixels = 1.0 / (t[0][0] * t[0][0]);

    // H̃ = T H T^-1
    let h_cond = Homography::from_array(linalg::mul_mat33(
        &t,
        &linalg::mul_mat33(h0.as_array(), &t_inv),
    ));
    let h_cond = Homography::from_array(linalg::scale_mat33(
        h_cond.as_array(),
        1.0 / h_cond.frobenius_norm(),
    ));

    let mut problem = Problem::new();
    problem.add_variable(
        Variable::euclidean(HOMOGRAPHY_VAR, 9),
        h_cond.to_row_major().to_vec(),
    )?;
    for (i, (x1, x2)) in correspondences.iter().enumerate() {
        let src = apply(&t, *x1);
        let dst = apply(&t, *x2);
        problem.add_variable(
            Variable::euclidean(point_var(i), 2).eliminated(),
            src.to_vec(),
        )?;
        problem.add_factor(
            Box::new(ReprojectionFactor { src, dst }),
            vec![HOMOGRAPHY_VAR.to_string(), point_var(i)],
        )?;
    }

    let initial_cost = match problem.compute_total_cost() {
        Ok(cost) => cost,
        Err(e) => {
            log::warn!("gold standard cannot evaluate the initial estimate, keeping it: {e}");
            return Ok(unrefined(h0, correspondences, f64::INFINITY, 0));
        }
    };
    let outcome = params.optimizer().optimize(&mut problem);

    let (final_cost, iterations, termination) = match outcome {
        Ok(res) if res.final_cost <= initial_cost => {
            log::debug!(
                "gold standard: cost {:.6e} -> {:.6e} in {} iterations ({:?})",
                res.initial_cost * cost_to_pixels,
                res.final_cost * cost_to_pixels,
                res.iterations,
                res.termination_reason
            );
            (res.final_cost, res.iterations, Some(res.termination_reason))
        }
        other => {
            match &other {
                Ok(res) => log::warn!(
                    "gold standard ended above its starting cost ({:.6e} > {:.6e}), keeping the initial estimate",
                    res.final_cost,
                    initial_cost
                ),
                Err(e) => log::warn!("gold standard failed, keeping the initial estimate: {e}"),
            }
            let iterations = other.map_or(0, |res| res.iterations);
            return Ok(unrefined(
                h0,
                correspondences,
                initial_cost * cost_to_pixels,
                iterations,
            ));
        }
    };

    let h_values = values(&problem, HOMOGRAPHY_VAR)?;
    let h_values: &[f64; 9] = h_values.try_into().map_err(|_| {
        HomographyError::from(ProblemError::from(FactorError::DimensionMismatch {
            expected: 9,
            actual: h_values.len(),
        }))
    })?;
    let h_cond = Homography::from_row_major(h_values);
    let h_refined = Homography::from_array(linalg::mul_mat33(
        &t_inv,
        &linalg::mul_mat33(h_cond.as_array(), &t),
    ))
    .normalized();

    let mut corrected_src = Vec::with_capacity(n);
    for i in 0..n {
        let p = values(&problem, &point_var(i))?;
        corrected_src.push(apply(&t_inv, [p[0], p[1]]));
    }
    let corrected_dst = map_or_keep(&h_refined, &corrected_src, correspondences.dst());

    let converged = matches!(
        termination,
        Some(TerminationReason::CostConverged | TerminationReason::GradientConverged)
    );

    Ok(RefineResult {
        homography: h_refined,
        corrected_src,
        corrected_dst,
        initial_error: initial_cost * cost_to_pixels,
        final_error: final_cost * cost_to_pixels,
        iterations,
        converged,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlt::estimate_homography_dlt;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn h_true() -> Homography {
        Homography::from_array([
            [0.95, 0.1, 40.0],
            [-0.08, 1.02, -15.0],
            [1e-4, 2e-4, 1.0],
        ])
    }

    fn noisy_set(n: usize, noise: f64, seed: u64) -> Correspondences {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut c = Correspondences::default();
        for _ in 0..n {
            let p = [rng.random_range(0.0..640.0), rng.random_range(0.0..480.0)];
            let q = h_true().transform_xy(p).expect("finite");
            let mut jitter = || {
                if noise > 0.0 {
                    rng.random_range(-noise..noise)
                } else {
                    0.0
                }
            };
            c.push(
                [p[0] + jitter(), p[1] + jitter()],
                [q[0] + jitter(), q[1] + jitter()],
            );
        }
        c
    }

    #[test]
    fn test_factor_jacobian_matches_finite_differences() -> FactorResult<()> {
        let factor = ReprojectionFactor {
            src: [0.3, -0.2],
            dst: [0.5, 0.1],
        };
        let h = [1.1, 0.05, 0.2, -0.1, 0.9, -0.3, 0.05, 0.02, 1.0];
        let p = [0.25, -0.15];
        let lin = factor.linearize(&[&h, &p], true)?;

        let eps = 1e-7;
        for col in 0..11 {
            let (mut hp, mut pp) = (h, p);
            if col < 9 {
                hp[col] += eps;
            } else {
                pp[col - 9] += eps;
            }
            let perturbed = factor.linearize(&[&hp, &pp], false)?;
            for row in 0..4 {
                let numeric = (perturbed.residual[row] - lin.residual[row]) / eps;
                let analytic = lin.jacobian_element(row, col).unwrap_or(f64::NAN);
                assert_relative_eq!(numeric, analytic, epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_refine_monotonic_on_noisy_data() -> Result<(), HomographyError> {
        let c = noisy_set(40, 1.0, 5);
        let h0 = estimate_homography_dlt(&c)?;

        let res = refine_homography(&h0, &c, &RefineParams::default())?;
        assert!(res.final_error <= res.initial_error);
        assert!(res.final_error > 0.0);
        assert_eq!(res.corrected_src.len(), 40);
        assert_eq!(res.corrected_dst.len(), 40);

        // the corrected pairs are consistent with the refined homography
        for (s, d) in res.corrected_src.iter().zip(&res.corrected_dst) {
            let q = res.homography.transform_xy(*s)?;
            assert_relative_eq!(q[0], d[0], epsilon = 1e-9);
            assert_relative_eq!(q[1], d[1], epsilon = 1e-9);
        }

        // the reported error matches the corrected points
        let recomputed: f64 = c
            .iter()
            .zip(res.corrected_src.iter().zip(&res.corrected_dst))
            .map(|((x1, x2), (s, d))| {
                (x1[0] - s[0]).powi(2)
                    + (x1[1] - s[1]).powi(2)
                    + (x2[0] - d[0]).powi(2)
                    + (x2[1] - d[1]).powi(2)
            })
            .sum();
        assert_relative_eq!(recomputed, res.final_error, max_relative = 1e-6);
        Ok(())
    }

    #[test]
    fn test_refine_noise_free_stays_exact() -> Result<(), HomographyError> {
        let c = noisy_set(12, 0.0, 9);
        let res = refine_homography(&h_true(), &c, &RefineParams::default())?;
        assert!(res.initial_error < 1e-12);
        assert!(res.final_error <= res.initial_error);
        assert!(res.homography.distance_up_to_scale(&h_true()) < 1e-8);
        Ok(())
    }

    #[test]
    fn test_refine_recovers_from_perturbed_start() -> Result<(), HomographyError> {
        let c = noisy_set(30, 0.0, 21);
        let mut start = h_true().to_row_major();
        start[2] += 3.0;
        start[4] *= 1.01;
        let h0 = Homography::from_row_major(&start);

        let res = refine_homography(&h0, &c, &RefineParams::default())?;
        assert!(res.converged);
        assert!(res.final_error < 1e-6 * res.initial_error);
        assert!(res.homography.distance_up_to_scale(&h_true()) < 1e-6);
        Ok(())
    }

    #[test]
    fn test_refine_not_converged() -> Result<(), HomographyError> {
        let c = noisy_set(10, 0.5, 1);
        let h0 = estimate_homography_dlt(&c)?;
        let res = refine_homography(&h0, &c, &RefineParams::default().with_max_iterations(0))?;

        assert!(!res.converged);
        assert_eq!(res.iterations, 0);
        assert_eq!(res.final_error, res.initial_error);
        assert!(matches!(
            res.ensure_converged(),
            Err(HomographyError::NumericalNonConvergence(_))
        ));
        Ok(())
    }

    #[test]
    fn test_refine_many_correspondences() -> Result<(), HomographyError> {
        let c = noisy_set(3000, 0.5, 17);
        let h0 = estimate_homography_dlt(&c)?;

        let res = refine_homography(&h0, &c, &RefineParams::default())?;
        assert!(res.converged);
        assert!(res.final_error <= res.initial_error);
        assert_eq!(res.corrected_src.len(), 3000);

        let expected = h_true().transform_xy([320.0, 240.0])?;
        let got = res.homography.transform_xy([320.0, 240.0])?;
        assert_relative_eq!(got[0], expected[0], epsilon = 0.5);
        assert_relative_eq!(got[1], expected[1], epsilon = 0.5);
        Ok(())
    }

    #[test]
    fn test_refine_start_with_point_at_infinity() -> Result<(), HomographyError> {
        // (100, 20) lies on the vanishing line of h0
        let h0 = Homography::from_array([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-0.01, 0.0, 1.0]]);
        let src = vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0], [100.0, 20.0]];
        let mut dst: Vec<[f64; 2]> = src[..4]
            .iter()
            .map(|p| h0.transform_xy(*p))
            .collect::<Result<_, _>>()?;
        dst.push([50.0, 50.0]);
        let c = Correspondences::new(src.clone(), dst.clone())?;

        let res = refine_homography(&h0, &c, &RefineParams::default())?;
        assert!(!res.converged);
        assert_eq!(res.termination, None);
        assert_eq!(res.iterations, 0);
        assert!(res.final_error <= res.initial_error);
        assert!(res.homography.distance_up_to_scale(&h0) < 1e-12);
        assert_eq!(res.corrected_src, src);
        assert_eq!(res.corrected_dst[4], [50.0, 50.0]);
        for (d, expected) in res.corrected_dst[..4].iter().zip(&dst[..4]) {
            assert_relative_eq!(d[0], expected[0], epsilon = 1e-9);
            assert_relative_eq!(d[1], expected[1], epsilon = 1e-9);
        }
        assert!(matches!(
            res.ensure_converged(),
            Err(HomographyError::NumericalNonConvergence(_))
        ));
        Ok(())
    }

    #[test]
    fn test_refine_invalid_input() {
        let c = noisy_set(3, 0.0, 2);
        assert!(matches!(
            refine_homography(&h_true(), &c, &RefineParams::default()),
            Err(HomographyError::InsufficientData { .. })
        ));

        let c = noisy_set(8, 0.0, 2);
        let singular = Homography::from_array([[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(
            refine_homography(&singular, &c, &RefineParams::default()),
            Err(HomographyError::DegenerateTransform(_))
        ));
    }
}
