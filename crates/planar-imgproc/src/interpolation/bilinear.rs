use planar_image::{Image, ImageDtype};

/// Kernel for bilinear interpolation
///
/// # Arguments
///
/// * `image` - The input image container, not empty.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
///
/// # Returns
///
/// The interpolated pixel values. The position is clamped to the image and the
/// upper neighbour of the last row or column is the pixel itself.
pub(crate) fn bilinear_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f64,
    v: f64,
) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());

    let u = u.clamp(0.0, (cols - 1) as f64);
    let v = v.clamp(0.0, (rows - 1) as f64);

    let iu0 = u.floor() as usize;
    let iv0 = v.floor() as usize;

    let frac_u = (u - iu0 as f64) as f32;
    let frac_v = (v - iv0 as f64) as f32;

    let frac_uu = 1.0 - frac_u;
    let frac_vv = 1.0 - frac_v;

    let w00 = frac_uu * frac_vv;
    let w01 = frac_u * frac_vv;
    let w10 = frac_uu * frac_v;
    let w11 = frac_u * frac_v;

    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let base00 = (iv0 * cols + iu0) * C;
    let base01 = (iv0 * cols + iu1) * C;
    let base10 = (iv1 * cols + iu0) * C;
    let base11 = (iv1 * cols + iu1) * C;

    let data = image.as_slice();
    let value = |base: usize, k: usize| -> f32 { data[base + k].into() };

    let mut pixel = [0.0; C];
    for (k, px) in pixel.iter_mut().enumerate() {
        *px = value(base00, k) * w00
            + value(base01, k) * w01
            + value(base10, k) * w10
            + value(base11, k) * w11;
    }

    pixel
}
