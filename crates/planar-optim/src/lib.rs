#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod factor;
mod levenberg_marquardt;
mod linear_system;
mod problem;
mod variable;

pub use factor::{Factor, FactorError, FactorResult, LinearizationResult, PriorFactor};
pub use levenberg_marquardt::{
    LevenbergMarquardt, OptimizerError, OptimizerResult, TerminationReason,
};
pub use problem::{Problem, ProblemError};
pub use variable::Variable;
