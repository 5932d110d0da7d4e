//! Problem struct for factor graph optimization
//!
//! A Problem contains variables (parameters to optimize) and factors (constraints/measurements).

use std::collections::HashMap;

use thiserror::Error;

use super::factor::{Factor, FactorError};
use super::variable::Variable;

/// Errors that can occur when working with optimization problems.
#[derive(Debug, Error, PartialEq)]
pub enum ProblemError {
    /// Variable with this name already exists
    #[error("Variable '{name}' already exists")]
    DuplicateVariable {
        /// Name of the duplicated variable.
        name: String,
    },
    /// Variable with this name was not found
    #[error("Variable '{name}' not found")]
    VariableNotFound {
        /// Name of the missing variable.
        name: String,
    },
    /// Dimension mismatch between expected and actual values
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },
    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    FactorEvaluation(#[from] FactorError),
}

/// A factor together with the names of the variables it connects.
pub type FactorEntry = (Box<dyn Factor>, Vec<String>);

/// An optimization problem containing variables and factors.
#[derive(Default)]
pub struct Problem {
    variables: HashMap<String, Variable>,
    factors: Vec<FactorEntry>,
}

impl Problem {
    /// Create a new empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable with its initial values.
    pub fn add_variable(
        &mut self,
        mut var: Variable,
        initial_values: Vec<f64>,
    ) -> Result<(), ProblemError> {
        if self.variables.contains_key(&var.name) {
            return Err(ProblemError::DuplicateVariable {
                name: var.name.clone(),
            });
        }
        if initial_values.len() != var.dim() {
            return Err(ProblemError::DimensionMismatch {
                expected: var.dim(),
                actual: initial_values.len(),
            });
        }
        var.values = initial_values;
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Add a factor connecting the named variables.
    ///
    /// The variable dimensions must match the dimensions declared by the factor.
    pub fn add_factor(
        &mut self,
        factor: Box<dyn Factor>,
        var_names: Vec<String>,
    ) -> Result<(), ProblemError> {
        if var_names.len() != factor.num_variables() {
            return Err(ProblemError::DimensionMismatch {
                expected: factor.num_variables(),
                actual: var_names.len(),
            });
        }
        for (idx, name) in var_names.iter().enumerate() {
            let var = self
                .variables
                .get(name)
                .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })?;
            if var.dim() != factor.variable_local_dim(idx) {
                return Err(ProblemError::DimensionMismatch {
                    expected: factor.variable_local_dim(idx),
                    actual: var.dim(),
                });
            }
        }
        self.factors.push((factor, var_names));
        Ok(())
    }

    /// All variables indexed by name.
    pub fn get_variables(&self) -> &HashMap<String, Variable> {
        &self.variables
    }

    /// Mutable access to all variables.
    pub fn get_variables_mut(&mut self) -> &mut HashMap<String, Variable> {
        &mut self.variables
    }

    /// Current values of a variable.
    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.variables.get(name).map(|v| v.values.as_slice())
    }

    /// All factors with their connected variable names.
    pub fn get_factors(&self) -> &[FactorEntry] {
        &self.factors
    }

    /// Collect the parameter slices a factor is connected to.
    pub(crate) fn factor_params<'a>(
        &'a self,
        var_names: &[String],
    ) -> Result<Vec<&'a [f64]>, ProblemError> {
        var_names
            .iter()
            .map(|name| {
                self.values(name)
                    .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })
            })
            .collect()
    }

    /// Sum of squared residuals over all factors.
    pub fn compute_total_cost(&self) -> Result<f64, ProblemError> {
        let mut total_cost = 0.0;

        for (factor, var_names) in &self.factors {
            let params = self.factor_params(var_names)?;
            let result = factor.linearize(&params, false)?;
            total_cost += result.residual.iter().map(|r| r * r).sum::<f64>();
        }

        Ok(total_cost)
    }
}
