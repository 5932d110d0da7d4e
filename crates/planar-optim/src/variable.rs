//! Variables for factor graph optimization
//!
//! Variables hold the parameters being optimized. Every variable lives in a
//! Euclidean space, so the update is a plain vector addition.
//!
//! A variable can be marked for elimination. The solver then removes it from
//! the damped normal equations with a Schur complement before solving for the
//! remaining variables, and recovers its step by back-substitution. This only
//! holds when no factor connects two eliminated variables.

/// A variable in an optimization problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Name of the variable (used for referencing in factors)
    pub name: String,
    /// Current parameter values
    pub values: Vec<f64>,
    dim: usize,
    eliminated: bool,
}

impl Variable {
    /// Create a new Euclidean variable.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the variable
    /// * `dim` - Dimension (e.g. 2 for an image point, 9 for a homography)
    pub fn euclidean(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            values: vec![0.0; dim],
            dim,
            eliminated: false,
        }
    }

    /// Mark the variable for Schur elimination, e.g. a per-point block.
    pub fn eliminated(mut self) -> Self {
        self.eliminated = true;
        self
    }

    /// Whether the solver eliminates this variable before the linear solve.
    pub fn is_eliminated(&self) -> bool {
        self.eliminated
    }

    /// Get the dimension (degrees of freedom) of this variable.
    pub fn dim(&self) -> usize {
        self.dim
    }
}
