use std::collections::HashMap;

use faer::prelude::SpSolver;

use crate::factor::FactorError;
use crate::levenberg_marquardt::OptimizerError;
use crate::problem::{Problem, ProblemError};

/// Where the columns of a variable live in the normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Start column in the reduced (dense) block.
    Reduced(usize),
    /// Index of the eliminated block.
    Eliminated(usize),
}

/// Fixed variable ordering and column layout of the normal equations.
///
/// Reduced variables come first, eliminated ones after, each group sorted by
/// name. A step vector follows the same order.
#[derive(Debug, Clone)]
pub(crate) struct VariableLayout {
    pub var_names: Vec<String>,
    pub slots: HashMap<String, Slot>,
    pub reduced_dim: usize,
    pub block_dims: Vec<usize>,
    pub total_dim: usize,
}

impl VariableLayout {
    pub fn from_problem(problem: &Problem) -> Self {
        let variables = problem.get_variables();
        let mut reduced: Vec<&String> = Vec::new();
        let mut eliminated: Vec<&String> = Vec::new();
        for (name, var) in variables {
            if var.is_eliminated() {
                eliminated.push(name);
            } else {
                reduced.push(name);
            }
        }
        reduced.sort();
        eliminated.sort();

        let mut slots = HashMap::with_capacity(variables.len());
        let mut reduced_dim = 0;
        for name in &reduced {
            slots.insert((*name).clone(), Slot::Reduced(reduced_dim));
            reduced_dim += variables[*name].dim();
        }
        let mut block_dims = Vec::with_capacity(eliminated.len());
        for name in &eliminated {
            slots.insert((*name).clone(), Slot::Eliminated(block_dims.len()));
            block_dims.push(variables[*name].dim());
        }

        let total_dim = reduced_dim + block_dims.iter().sum::<usize>();
        let var_names = reduced.into_iter().chain(eliminated).cloned().collect();

        Self {
            var_names,
            slots,
            reduced_dim,
            block_dims,
            total_dim,
        }
    }

    fn slot_of(&self, name: &str) -> Result<Slot, ProblemError> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| ProblemError::VariableNotFound {
                name: name.to_string(),
            })
    }
}

/// Normal equations of one eliminated variable: its diagonal block `H_ee`,
/// the coupling `H_ce` with the reduced variables and its gradient `b_e`.
pub(crate) struct EliminatedBlock {
    dim: usize,
    hee: Vec<f64>,
    hce: Vec<f64>,
    be: Vec<f64>,
}

/// Normal equations `J^T J` and `J^T r` in block-arrow form.
///
/// ```text
/// | H_cc  H_ce | | δc |     | b_c |
/// | H_ec  H_ee | | δe | = - | b_e |
/// ```
///
/// `H_cc` is dense over the reduced variables and `H_ee` is block diagonal.
/// Without eliminated variables `H_cc` is the whole system.
pub(crate) struct NormalEquations {
    reduced_dim: usize,
    hcc: Vec<f64>,
    bc: Vec<f64>,
    blocks: Vec<EliminatedBlock>,
}

impl NormalEquations {
    /// Euclidean norm of `J^T r`.
    pub fn gradient_norm(&self) -> f64 {
        self.bc
            .iter()
            .chain(self.blocks.iter().flat_map(|b| b.be.iter()))
            .map(|g| g * g)
            .sum::<f64>()
            .sqrt()
    }

    /// Solve `(J^T J + λI) δ = -J^T r`, with δ in layout order.
    ///
    /// Each eliminated block is folded into the reduced system
    /// `S = H_cc + λI - Σ H_ce (H_ee + λI)^-1 H_ec`, then recovered from
    /// `δe = -(H_ee + λI)^-1 (b_e + H_ec δc)`.
    pub fn solve_damped(&self, lambda: f64) -> Result<Vec<f64>, OptimizerError> {
        let nc = self.reduced_dim;
        let mut s = self.hcc.clone();
        for i in 0..nc {
            s[i * nc + i] += lambda;
        }
        let mut g: Vec<f64> = self.bc.iter().map(|b| -b).collect();

        // per block: Y = (H_ee + λI)^-1 [H_ec | b_e], a dim x (nc + 1) matrix
        let mut folded = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let d = block.dim;
            if d == 0 {
                folded.push(faer::Mat::<f64>::zeros(0, nc + 1));
                continue;
            }
            let a = faer::Mat::<f64>::from_fn(d, d, |i, j| {
                let v = block.hee[i * d + j];
                if i == j {
                    v + lambda
                } else {
                    v
                }
            });
            let rhs = faer::Mat::<f64>::from_fn(d, nc + 1, |i, j| {
                if j < nc {
                    block.hce[j * d + i]
                } else {
                    block.be[i]
                }
            });
            let y = a.partial_piv_lu().solve(rhs);

            for i in 0..nc {
                for k in 0..d {
                    let h = block.hce[i * d + k];
                    if h == 0.0 {
                        continue;
                    }
                    for j in 0..nc {
                        s[i * nc + j] -= h * y.read(k, j);
                    }
                    g[i] += h * y.read(k, nc);
                }
            }
            folded.push(y);
        }

        let delta_c: Vec<f64> = if nc == 0 {
            Vec::new()
        } else {
            let s = faer::Mat::<f64>::from_fn(nc, nc, |i, j| s[i * nc + j]);
            let rhs = faer::Mat::<f64>::from_fn(nc, 1, |i, _| g[i]);
            let solution = s.partial_piv_lu().solve(rhs);
            (0..nc).map(|i| solution.read(i, 0)).collect()
        };

        let mut delta = Vec::with_capacity(nc + self.blocks.iter().map(|b| b.dim).sum::<usize>());
        delta.extend_from_slice(&delta_c);
        for (block, y) in self.blocks.iter().zip(&folded) {
            for k in 0..block.dim {
                let coupled: f64 = (0..nc).map(|j| y.read(k, j) * delta_c[j]).sum();
                delta.push(-y.read(k, nc) - coupled);
            }
        }

        if delta.iter().any(|d| !d.is_finite()) {
            return Err(OptimizerError::SolveFailed(
                "LU solve produced non-finite values".to_string(),
            ));
        }

        Ok(delta)
    }
}

/// Accumulate the normal equations of every factor in the problem.
pub(crate) fn build_normal_equations(
    problem: &Problem,
    layout: &VariableLayout,
) -> Result<NormalEquations, OptimizerError> {
    let nc = layout.reduced_dim;
    let mut hcc = vec![0.0; nc * nc];
    let mut bc = vec![0.0; nc];
    let mut blocks: Vec<EliminatedBlock> = layout
        .block_dims
        .iter()
        .map(|&dim| EliminatedBlock {
            dim,
            hee: vec![0.0; dim * dim],
            hce: vec![0.0; nc * dim],
            be: vec![0.0; dim],
        })
        .collect();

    for (factor, factor_var_names) in problem.get_factors() {
        let params = problem.factor_params(factor_var_names)?;
        let result = factor.linearize(&params, true)?;

        let jacobian = result.jacobian.as_ref().ok_or_else(|| {
            FactorError::JacobianFailed("Jacobian required for optimization".to_string())
        })?;

        let cols = result.total_local_dim;
        if cols != factor.total_local_dim() {
            return Err(FactorError::DimensionMismatch {
                expected: factor.total_local_dim(),
                actual: cols,
            }
            .into());
        }
        if jacobian.len() != result.residual_dim() * cols {
            return Err(FactorError::DimensionMismatch {
                expected: result.residual_dim() * cols,
                actual: jacobian.len(),
            }
            .into());
        }

        // (reduced column, local column) pairs and the eliminated block, if any
        let mut columns = Vec::with_capacity(cols);
        let mut eliminated: Option<(usize, usize)> = None;
        let mut local_offset = 0;
        for (idx, name) in factor_var_names.iter().enumerate() {
            let dim = factor.variable_local_dim(idx);
            match layout.slot_of(name)? {
                Slot::Reduced(start) => {
                    columns.extend((0..dim).map(|d| (start + d, local_offset + d)));
                }
                Slot::Eliminated(block) => {
                    if eliminated.is_some() {
                        return Err(OptimizerError::InvalidStructure(format!(
                            "factor connects more than one eliminated variable ({})",
                            factor_var_names.join(", ")
                        )));
                    }
                    eliminated = Some((block, local_offset));
                }
            }
            local_offset += dim;
        }

        for (row, r) in result.residual.iter().enumerate() {
            let jac_row = &jacobian[row * cols..(row + 1) * cols];
            for &(gi, li) in &columns {
                let ji = jac_row[li];
                if ji == 0.0 {
                    continue;
                }
                bc[gi] += ji * r;
                for &(gj, lj) in &columns {
                    hcc[gi * nc + gj] += ji * jac_row[lj];
                }
            }

            if let Some((block, offset)) = eliminated {
                let block = &mut blocks[block];
                let d = block.dim;
                let je = &jac_row[offset..offset + d];
                for (a, &ja) in je.iter().enumerate() {
                    if ja == 0.0 {
                        continue;
                    }
                    block.be[a] += ja * r;
                    for (b, &jb) in je.iter().enumerate() {
                        block.hee[a * d + b] += ja * jb;
                    }
                    for &(gi, li) in &columns {
                        block.hce[gi * d + a] += jac_row[li] * ja;
                    }
                }
            }
        }
    }

    Ok(NormalEquations {
        reduced_dim: nc,
        hcc,
        bc,
        blocks,
    })
}
