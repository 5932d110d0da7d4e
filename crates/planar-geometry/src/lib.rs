#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the geometry module.
pub mod error;

/// Homogeneous points and lines of the projective plane.
pub mod homogeneous;

/// The homography value type.
pub mod homography;

/// Paired point sets used for estimation.
pub mod correspondences;

/// Normalized direct linear transform.
pub mod dlt;

/// Robust estimation with adaptive RANSAC.
pub mod ransac;

/// Gold Standard refinement of a homography.
pub mod refine;

/// Affine and metric rectification.
pub mod rectification;

/// Small fixed-size linear algebra helpers.
pub mod linalg;

pub use correspondences::Correspondences;
pub use dlt::{estimate_homography_dlt, homography_dlt};
pub use error::{GeometryError, HomographyError};
pub use homogeneous::{
    angle_between_lines, intersection, is_incident, line_through, normalize_point, Line2D,
    Point2D,
};
pub use homography::Homography;
pub use ransac::{ransac_homography, symmetric_transfer_error, RansacParams, RansacResult};
pub use rectification::{
    affine_rectification, affine_rectification_from_parallel_pairs,
    metric_rectification_from_orthogonal_pairs, vanishing_line,
};
pub use refine::{refine_homography, RefineParams, RefineResult};
