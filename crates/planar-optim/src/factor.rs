//! Factor trait for factor graph optimization
//!
//! Factors represent constraints or measurements in a factor graph. Each factor
//! computes a residual (error) and optionally a Jacobian with respect to the
//! connected variables.

use thiserror::Error;

/// Errors raised while evaluating a factor.
#[derive(Debug, Error, PartialEq)]
pub enum FactorError {
    /// Invalid dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Jacobian computation failed
    #[error("Jacobian computation failed: {0}")]
    JacobianFailed(String),

    /// Invalid parameter values
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Output of factor linearization
#[derive(Debug, Clone)]
pub struct LinearizationResult {
    /// Residual vector (error)
    pub residual: Vec<f64>,
    /// Jacobian matrix (row-major, flattened)
    /// Shape: (residual_dim, total_local_dim)
    pub jacobian: Option<Vec<f64>>,
    /// Total local dimension (number of Jacobian columns)
    pub total_local_dim: usize,
}

impl LinearizationResult {
    /// Create a new linearization result
    pub fn new(residual: Vec<f64>, jacobian: Option<Vec<f64>>, total_local_dim: usize) -> Self {
        Self {
            residual,
            jacobian,
            total_local_dim,
        }
    }

    /// Get the residual dimension
    pub fn residual_dim(&self) -> usize {
        self.residual.len()
    }

    /// Get a specific Jacobian element (row-major order)
    pub fn jacobian_element(&self, row: usize, col: usize) -> Option<f64> {
        self.jacobian
            .as_ref()
            .and_then(|j| j.get(row * self.total_local_dim + col).copied())
    }
}

/// Trait for factor (constraint) implementations in factor graph optimization.
///
/// A factor represents a measurement or constraint connecting one or more variables.
/// It computes the residual and Jacobian for the current variable values,
/// which are used by the optimizer to minimize the total cost.
///
/// The Jacobian columns are laid out variable after variable, in the order in
/// which the variables were listed when the factor was added to the problem.
pub trait Factor: Send + Sync {
    /// Compute the residual and optionally the Jacobian at the given parameter values.
    ///
    /// # Arguments
    ///
    /// * `params` - Slice of variable values (one slice per connected variable)
    /// * `compute_jacobian` - Whether to compute the Jacobian matrix
    fn linearize(&self, params: &[&[f64]], compute_jacobian: bool)
        -> FactorResult<LinearizationResult>;

    /// Get the dimension of the residual vector.
    fn residual_dim(&self) -> usize;

    /// Get the number of variables this factor connects.
    fn num_variables(&self) -> usize;

    /// Get the dimension of a specific connected variable.
    fn variable_local_dim(&self, idx: usize) -> usize;

    /// Get the total dimension of all connected variables.
    fn total_local_dim(&self) -> usize {
        (0..self.num_variables())
            .map(|i| self.variable_local_dim(i))
            .sum()
    }
}

/// A simple prior factor that penalizes deviation from a target value.
///
/// Residual: r = x - target
#[derive(Debug, Clone)]
pub struct PriorFactor {
    /// Target value
    pub target: Vec<f64>,
}

impl PriorFactor {
    /// Create a new prior factor
    pub fn new(target: Vec<f64>) -> Self {
        Self { target }
    }
}

impl Factor for PriorFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 1 {
            return Err(FactorError::DimensionMismatch {
                expected: 1,
                actual: params.len(),
            });
        }

        let x = params[0];
        if x.len() != self.target.len() {
            return Err(FactorError::DimensionMismatch {
                expected: self.target.len(),
                actual: x.len(),
            });
        }

        let residual: Vec<f64> = x.iter().zip(&self.target).map(|(xi, ti)| xi - ti).collect();

        let jacobian = if compute_jacobian {
            let n = x.len();
            let mut jac = vec![0.0; n * n];
            for i in 0..n {
                jac[i * n + i] = 1.0;
            }
            Some(jac)
        } else {
            None
        };

        Ok(LinearizationResult::new(residual, jacobian, x.len()))
    }

    fn residual_dim(&self) -> usize {
        self.target.len()
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        self.target.len()
    }
}
