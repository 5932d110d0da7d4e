use planar_image::{Image, ImageDtype};

/// Kernel for nearest neighbor interpolation
///
/// # Arguments
///
/// * `image` - The input image container, not empty.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
///
/// # Returns
///
/// The interpolated pixel values.
pub(crate) fn nearest_neighbor_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f64,
    v: f64,
) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());

    let iu = u.round().clamp(0.0, (cols - 1) as f64) as usize;
    let iv = v.round().clamp(0.0, (rows - 1) as f64) as usize;

    let base = (iv * cols + iu) * C;

    let mut pixel = [0.0; C];
    for (px, src) in pixel.iter_mut().zip(&image.as_slice()[base..base + C]) {
        *px = (*src).into();
    }

    pixel
}
