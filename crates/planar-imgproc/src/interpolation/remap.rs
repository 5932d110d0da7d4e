use crate::parallel;

use super::grid::SamplingGrid;
use super::interpolate::interpolate_pixel;
use super::InterpolationMode;
use planar_image::{Image, ImageDtype, ImageError};

/// Tolerance, in pixels, by which a source coordinate may leave the valid
/// range `[0, W - 1] x [0, H - 1]` and still be sampled.
pub const SAMPLE_SLACK: f64 = 1e-6;

/// Apply generic geometric transformation to an image.
///
/// Each destination pixel is sampled from `src` at the position stored in the
/// grid. Positions that are not finite or fall outside the source image are
/// set to the background value `T::default()`.
///
/// # Arguments
///
/// * `src` - The input image container with shape (height, width, C).
/// * `dst` - The output image container with shape (height, width, C).
/// * `grid` - The source coordinates of every destination pixel.
/// * `interpolation` - The interpolation mode to use.
///
/// # Errors
///
/// The output image must have the same size as the grid.
pub fn remap<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    grid: &SamplingGrid,
    interpolation: InterpolationMode,
) -> Result<(), ImageError> {
    if dst.size() != grid.size() {
        return Err(ImageError::InvalidImageSize(
            grid.size().width,
            grid.size().height,
            dst.width(),
            dst.height(),
        ));
    }

    let max_x = src.cols() as f64 - 1.0 + SAMPLE_SLACK;
    let max_y = src.rows() as f64 - 1.0 + SAMPLE_SLACK;
    let inside = |x: f64, y: f64| {
        x >= -SAMPLE_SLACK && x <= max_x && y >= -SAMPLE_SLACK && y <= max_y
    };

    // parallelize the remap operation by rows
    parallel::par_iter_rows_resample(dst, grid.map_x(), grid.map_y(), |x, y, dst_pixel| {
        // comparisons with NaN are false, so missing sources fall through
        if inside(x, y) {
            let values = interpolate_pixel(src, x, y, interpolation);
            for (pixel, value) in dst_pixel.iter_mut().zip(values) {
                *pixel = T::from_f32(value);
            }
        } else {
            dst_pixel.fill(T::default());
        }
    });

    Ok(())
}
