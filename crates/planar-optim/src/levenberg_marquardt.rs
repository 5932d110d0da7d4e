//! Levenberg-Marquardt optimizer for non-linear least squares optimization
//!
//! The Levenberg-Marquardt algorithm is a trust-region method that combines
//! the advantages of gradient descent and Gauss-Newton methods. It solves
//! the damped normal equations: (J^T J + λI) δ = -J^T r
//!
//! Variables marked with [`crate::Variable::eliminated`] are folded out of the
//! system with a Schur complement, so a problem with many small independent
//! blocks only ever factors the dense system of the remaining variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::factor::FactorError;
use crate::linear_system::{build_normal_equations, VariableLayout};
use crate::problem::{Problem, ProblemError};

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Problem-related error
    #[error("Problem error: {0}")]
    Problem(#[from] ProblemError),

    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    Factor(#[from] FactorError),

    /// Linear system solve failed (singular matrix)
    #[error("Linear system solve failed: {0}")]
    SolveFailed(String),

    /// Numerical instability detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// The factor graph cannot be solved with the requested elimination
    #[error("Invalid problem structure: {0}")]
    InvalidStructure(String),
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Cost before the first iteration
    pub initial_cost: f64,
    /// Final cost (sum of squared residuals)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Reason for termination
    pub termination_reason: TerminationReason,
}

impl OptimizerResult {
    /// Whether the optimizer stopped on one of its convergence criteria.
    pub fn converged(&self) -> bool {
        matches!(
            self.termination_reason,
            TerminationReason::CostConverged | TerminationReason::GradientConverged
        )
    }
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged: cost change below tolerance
    CostConverged,
    /// Converged: gradient norm below tolerance
    GradientConverged,
    /// Maximum iterations reached
    MaxIterations,
    /// Lambda exceeded maximum (likely numerical issues)
    LambdaMaxExceeded,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter
    pub lambda_init: f64,
    /// Maximum damping parameter
    pub lambda_max: f64,
    /// Factor for lambda adaptation
    pub lambda_factor: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost decrease
    pub cost_tolerance: f64,
    /// Convergence threshold for gradient norm
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 50,
            cost_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
        }
    }
}

impl LevenbergMarquardt {
    /// Minimum step norm threshold. Steps smaller than this are considered zero.
    const STEP_SIZE_TOLERANCE: f64 = 1e-14;

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative cost tolerance.
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Set the gradient norm tolerance.
    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    /// Set the initial damping.
    pub fn with_lambda_init(mut self, lambda_init: f64) -> Self {
        self.lambda_init = lambda_init;
        self
    }

    /// Minimize the total cost of `problem`, updating its variables in place.
    ///
    /// Only steps that lower the cost are kept. A rejected step is reverted and
    /// the damping grows until either a step succeeds or `lambda_max` is passed.
    /// A trial point where some factor cannot be evaluated is rejected the
    /// same way.
    pub fn optimize(&self, problem: &mut Problem) -> Result<OptimizerResult, OptimizerError> {
        if problem.get_variables().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No variables in problem".to_string(),
            ));
        }

        if problem.get_factors().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No factors in problem".to_string(),
            ));
        }

        let layout = VariableLayout::from_problem(problem);
        if layout.total_dim == 0 {
            return Err(OptimizerError::NumericalInstability(
                "Total parameter dimension is zero".to_string(),
            ));
        }

        let initial_cost = problem.compute_total_cost()?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "Initial cost is not finite: {initial_cost}"
            )));
        }

        let mut current_cost = initial_cost;
        let mut lambda = self.lambda_init;
        let mut iterations = 0;

        let result = |final_cost, iterations, termination_reason| OptimizerResult {
            initial_cost,
            final_cost,
            iterations,
            termination_reason,
        };

        loop {
            if iterations >= self.max_iterations {
                return Ok(result(
                    current_cost,
                    iterations,
                    TerminationReason::MaxIterations,
                ));
            }

            let normal = build_normal_equations(problem, &layout)?;

            let gradient_norm = normal.gradient_norm();
            if gradient_norm < self.gradient_tolerance {
                return Ok(result(
                    current_cost,
                    iterations,
                    TerminationReason::GradientConverged,
                ));
            }

            let delta = normal.solve_damped(lambda)?;

            let step_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
            if step_norm < Self::STEP_SIZE_TOLERANCE {
                return Ok(result(
                    current_cost,
                    iterations,
                    TerminationReason::CostConverged,
                ));
            }

            let snapshot = self.apply_step(problem, &layout.var_names, &delta)?;
            let new_cost = match problem.compute_total_cost() {
                Ok(cost) => cost,
                Err(ProblemError::FactorEvaluation(e)) => {
                    log::trace!(
                        "lm iteration {}: trial point not evaluable: {e}",
                        iterations + 1
                    );
                    f64::INFINITY
                }
                Err(e) => {
                    self.revert_step(problem, &layout.var_names, snapshot)?;
                    return Err(e.into());
                }
            };
            iterations += 1;

            if new_cost.is_finite() && new_cost < current_cost {
                let relative_decrease = if current_cost > 0.0 {
                    (current_cost - new_cost) / current_cost
                } else {
                    0.0
                };
                current_cost = new_cost;
                lambda = (lambda / self.lambda_factor).max(1e-15);

                log::trace!(
                    "lm iteration {iterations}: cost {current_cost:.6e} (accepted, lambda {lambda:.1e})"
                );

                if relative_decrease < self.cost_tolerance {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::CostConverged,
                    ));
                }
            } else {
                self.revert_step(problem, &layout.var_names, snapshot)?;
                lambda *= self.lambda_factor;

                log::trace!(
                    "lm iteration {iterations}: cost {new_cost:.6e} rejected, lambda {lambda:.1e}"
                );

                // the step only changed the cost at round-off level
                if (new_cost - current_cost).abs() <= self.cost_tolerance * current_cost {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::CostConverged,
                    ));
                }

                if lambda > self.lambda_max {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::LambdaMaxExceeded,
                    ));
                }
            }
        }
    }

    fn apply_step(
        &self,
        problem: &mut Problem,
        var_names: &[String],
        delta: &[f64],
    ) -> Result<Vec<Vec<f64>>, OptimizerError> {
        let variables = problem.get_variables_mut();
        let mut param_offset = 0;
        let mut snapshot: Vec<Vec<f64>> = Vec::with_capacity(var_names.len());

        for var_name in var_names {
            let var = variables
                .get_mut(var_name)
                .ok_or_else(|| ProblemError::VariableNotFound {
                    name: var_name.clone(),
                })?;

            snapshot.push(var.values.clone());

            let dim = var.dim();
            for (v, d) in var
                .values
                .iter_mut()
                .zip(&delta[param_offset..param_offset + dim])
            {
                *v += d;
            }

            param_offset += dim;
        }

        Ok(snapshot)
    }

    /// Revert the step to the previous values.
    fn revert_step(
        &self,
        problem: &mut Problem,
        var_names: &[String],
        snapshot: Vec<Vec<f64>>,
    ) -> Result<(), OptimizerError> {
        let variables = problem.get_variables_mut();

        for (var_name, old_vals) in var_names.iter().zip(snapshot) {
            let var = variables
                .get_mut(var_name)
                .ok_or_else(|| ProblemError::VariableNotFound {
                    name: var_name.clone(),
                })?;
            var.values = old_vals;
        }

        Ok(())
    }
}
