//! Geometric image transformations with homographies.
//!
//! This module provides functions for applying projective transformations to
//! images:
//!
//! - [`apply_homography`] sizes the output canvas so that the whole
//!   transformed image is visible and returns the canvas placement.
//! - [`warp_onto_canvas`] renders into a canvas chosen by the caller, which is
//!   how several images are brought into one mosaic.
//! - [`warp_perspective`] fills a destination image of a fixed size.
//!
//! # Examples
//!
//! ```
//! use planar_geometry::Homography;
//! use planar_image::{Image, ImageSize};
//! use planar_imgproc::warp::{apply_homography, WarpParams};
//!
//! let image = Image::<u8, 1>::from_size_val(ImageSize { width: 4, height: 3 }, 255).unwrap();
//! let h = Homography::from_array([[2.0, 0.0, 5.0], [0.0, 2.0, -1.0], [0.0, 0.0, 1.0]]);
//!
//! let (warped, canvas) = apply_homography(&image, &h, &WarpParams::default()).unwrap();
//! assert_eq!((canvas.min_x, canvas.min_y), (5, -1));
//! assert_eq!(warped.size(), canvas.size());
//! ```

mod canvas;
mod perspective;

use planar_image::ImageError;
use serde::{Deserialize, Serialize};

use crate::interpolation::InterpolationMode;

pub use canvas::Canvas;
pub use perspective::{apply_homography, warp_onto_canvas, warp_perspective};

/// Default upper bound on the number of output pixels of a warp.
pub const DEFAULT_MAX_PIXELS: usize = 1 << 28;

/// An error type for the warp module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WarpError {
    /// The homography cannot be inverted.
    #[error("Degenerate transform: normalized determinant {0:e} is too small")]
    DegenerateTransform(f64),

    /// The transformed image crosses or touches the line at infinity.
    #[error("The transformed image is unbounded: {0}")]
    UnboundedCanvas(String),

    /// The output canvas exceeds [`WarpParams::max_pixels`].
    #[error("Canvas of {width}x{height} pixels exceeds the limit of {max_pixels} pixels")]
    CanvasTooLarge {
        /// Canvas width in pixels.
        width: usize,
        /// Canvas height in pixels.
        height: usize,
        /// The configured limit.
        max_pixels: usize,
    },

    /// The input image has no pixels.
    #[error("Cannot warp an empty image")]
    EmptyImage,

    /// A mosaic needs at least one layer.
    #[error("A mosaic needs at least one image")]
    EmptyMosaic,

    /// Error from the image container.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Parameters of [`apply_homography`] and [`crate::mosaic::mosaic`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpParams {
    /// How the source image is sampled.
    pub interpolation: InterpolationMode,
    /// Largest accepted output canvas, in pixels.
    pub max_pixels: usize,
}

impl Default for WarpParams {
    fn default() -> Self {
        Self {
            interpolation: InterpolationMode::Bilinear,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl WarpParams {
    /// Set the interpolation mode.
    pub fn with_interpolation(mut self, interpolation: InterpolationMode) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Set the largest accepted output canvas.
    pub fn with_max_pixels(mut self, max_pixels: usize) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Fail with [`WarpError::CanvasTooLarge`] when `canvas` exceeds the limit.
    pub fn check_canvas(&self, canvas: &Canvas) -> Result<(), WarpError> {
        match canvas.width.checked_mul(canvas.height) {
            Some(n) if n <= self.max_pixels => Ok(()),
            _ => Err(WarpError::CanvasTooLarge {
                width: canvas.width,
                height: canvas.height,
                max_pixels: self.max_pixels,
            }),
        }
    }
}
