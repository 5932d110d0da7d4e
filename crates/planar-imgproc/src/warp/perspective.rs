use planar_geometry::linalg::normalized_det_mat33;
use planar_geometry::Homography;
use planar_image::{Image, ImageDtype};

use super::{Canvas, WarpError, WarpParams};
use crate::interpolation::{grid::meshgrid_from_fn, remap, InterpolationMode};

fn invert(h: &Homography) -> Result<Homography, WarpError> {
    h.inverse()
        .map_err(|_| WarpError::DegenerateTransform(normalized_det_mat33(h.as_array())))
}

/// Inverse-map every pixel of `dst`, placed at `(min_x, min_y)`, into `src`.
fn warp_into<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    h_inv: &Homography,
    origin: (i64, i64),
    interpolation: InterpolationMode,
) -> Result<(), WarpError> {
    let (x0, y0) = (origin.0 as f64, origin.1 as f64);

    // create meshgrid to find corresponding positions in src from dst
    let grid = meshgrid_from_fn(dst.cols(), dst.rows(), |u, v| {
        match h_inv.project([u as f64 + x0, v as f64 + y0]) {
            Some([x, y]) => (x, y),
            None => (f64::NAN, f64::NAN),
        }
    });

    remap(src, dst, &grid, interpolation)?;

    Ok(())
}

/// Applies a homography to an image on a canvas sized to fit the result.
///
/// The canvas is the bounding box of the four transformed corners (see
/// [`Canvas::for_image`]). Each output pixel `(u, v)` is sampled from the
/// source at `H^-1 (u + min_x, v + min_y, 1)`; positions outside the source,
/// or mapped to infinity, are left at the background value zero.
///
/// # Arguments
///
/// * `image` - The input image with shape (height, width, channels).
/// * `h` - The 3x3 homography src -> dst.
/// * `params` - Interpolation mode and canvas size limit.
///
/// # Returns
///
/// The warped image and its placement in the destination frame.
///
/// # Errors
///
/// * [`WarpError::DegenerateTransform`] if `h` is singular.
/// * [`WarpError::UnboundedCanvas`] if the image crosses the line sent to infinity.
/// * [`WarpError::CanvasTooLarge`] if the canvas exceeds `params.max_pixels`.
/// * [`WarpError::EmptyImage`] if the image has no pixels.
pub fn apply_homography<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    h: &Homography,
    params: &WarpParams,
) -> Result<(Image<T, C>, Canvas), WarpError> {
    let canvas = Canvas::for_image(image.size(), h)?;
    params.check_canvas(&canvas)?;

    log::debug!(
        "warping {}x{} image onto {}x{} canvas at ({}, {})",
        image.width(),
        image.height(),
        canvas.width,
        canvas.height,
        canvas.min_x,
        canvas.min_y
    );

    let warped = warp_onto_canvas(image, h, &canvas, params.interpolation)?;
    Ok((warped, canvas))
}

/// Renders the warp of `image` by `h` into an arbitrary canvas.
///
/// Parts of the transformed image outside the canvas are cropped and canvas
/// pixels without a source are zero.
///
/// # Errors
///
/// [`WarpError::DegenerateTransform`] if `h` is singular and
/// [`WarpError::EmptyImage`] if the image has no pixels.
pub fn warp_onto_canvas<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    h: &Homography,
    canvas: &Canvas,
    interpolation: InterpolationMode,
) -> Result<Image<T, C>, WarpError> {
    if image.cols() == 0 || image.rows() == 0 {
        return Err(WarpError::EmptyImage);
    }
    let h_inv = invert(h)?;
    let mut dst = Image::from_size_val(canvas.size(), T::default())?;
    warp_into(
        image,
        &mut dst,
        &h_inv,
        (canvas.min_x, canvas.min_y),
        interpolation,
    )?;
    Ok(dst)
}

/// Applies a perspective transformation to an image.
///
/// The destination keeps its size and origin: pixel `(u, v)` of `dst` is
/// sampled at `H^-1 (u, v, 1)`.
///
/// * `src` - The input image with shape (height, width, channels).
/// * `dst` - The output image with shape (height, width, channels).
/// * `h` - The 3x3 perspective transformation src -> dst.
/// * `interpolation` - The interpolation mode to use.
///
/// # Example
///
/// ```
/// use planar_geometry::Homography;
/// use planar_image::{Image, ImageSize};
/// use planar_imgproc::interpolation::InterpolationMode;
/// use planar_imgproc::warp::warp_perspective;
///
/// let src = Image::<f32, 1>::new(
///   ImageSize {
///     width: 4,
///     height: 5,
///   },
///   vec![0.0f32; 4 * 5]
/// ).unwrap();
///
/// let h = Homography::from_array([[1.0, 0.0, -1.0], [0.0, 1.0, 1.0], [0.0, 0.0, 1.0]]);
///
/// let mut dst = Image::<f32, 1>::from_size_val(
///   ImageSize {
///     width: 2,
///     height: 3,
///   },
///   0.0
/// ).unwrap();
///
/// warp_perspective(&src, &mut dst, &h, InterpolationMode::Bilinear).unwrap();
///
/// assert_eq!(dst.size().width, 2);
/// assert_eq!(dst.size().height, 3);
/// ```
pub fn warp_perspective<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    h: &Homography,
    interpolation: InterpolationMode,
) -> Result<(), WarpError> {
    if src.cols() == 0 || src.rows() == 0 {
        return Err(WarpError::EmptyImage);
    }
    let h_inv = invert(h)?;
    warp_into(src, dst, &h_inv, (0, 0), interpolation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use planar_image::ImageSize;

    fn from_row_major(m: [f64; 9]) -> Homography {
        Homography::from_row_major(&m)
    }

    #[test]
    fn warp_perspective_identity() -> Result<(), WarpError> {
        let image: Image<f32, 3> = Image::from_size_val(
            ImageSize {
                width: 4,
                height: 5,
            },
            0.0f32,
        )?;

        let new_size = ImageSize {
            width: 2,
            height: 3,
        };

        let mut image_transformed = Image::from_size_val(new_size, 0.0)?;

        warp_perspective(
            &image,
            &mut image_transformed,
            &Homography::identity(),
            InterpolationMode::Bilinear,
        )?;

        assert_eq!(image_transformed.num_channels(), 3);
        assert_eq!(image_transformed.size(), new_size);

        Ok(())
    }

    #[test]
    fn warp_perspective_hflip() -> Result<(), WarpError> {
        let image = Image::<_, 1>::new(
            ImageSize {
                width: 2,
                height: 3,
            },
            vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0],
        )?;

        let image_expected = vec![1.0, 0.0, 3.0, 2.0, 5.0, 4.0];

        // flip matrix
        let h = from_row_major([-1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

        let mut image_transformed = Image::<_, 1>::from_size_val(image.size(), 0.0)?;

        warp_perspective(
            &image,
            &mut image_transformed,
            &h,
            InterpolationMode::Bilinear,
        )?;

        assert_eq!(image_transformed.as_slice(), image_expected);

        Ok(())
    }

    #[test]
    fn test_warp_perspective_shift() -> Result<(), WarpError> {
        let image = Image::<_, 1>::new(
            ImageSize {
                width: 4,
                height: 4,
            },
            vec![
                0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0,
                15.0,
            ],
        )?;

        // shift left by 1 pixel
        let h = from_row_major([1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

        let image_expected = vec![
            1.0f32, 2.0, 3.0, 0.0, 5.0, 6.0, 7.0, 0.0, 9.0, 10.0, 11.0, 0.0, 13.0, 14.0, 15.0, 0.0,
        ];

        let mut image_transformed = Image::<_, 1>::from_size_val(image.size(), 0.0)?;

        warp_perspective(
            &image,
            &mut image_transformed,
            &h,
            InterpolationMode::Bilinear,
        )?;

        assert_eq!(image_transformed.as_slice(), image_expected);

        Ok(())
    }

    #[test]
    fn test_apply_homography_identity_u8() -> Result<(), WarpError> {
        let image = Image::<u8, 3>::from_fn([5, 4].into(), |x, y, c| (10 * y + x + 100 * c) as u8);
        let (warped, canvas) =
            apply_homography(&image, &Homography::identity(), &WarpParams::default())?;
        assert_eq!(canvas, Canvas::new(0, 0, 5, 4));
        assert_eq!(warped, image);
        Ok(())
    }

    #[test]
    fn test_apply_homography_translation() -> Result<(), WarpError> {
        let image = Image::<f32, 1>::new([4, 1].into(), vec![0.0, 10.0, 20.0, 30.0])?;
        let h = from_row_major([1.0, 0.0, 10.5, 0.0, 1.0, -3.0, 0.0, 0.0, 1.0]);

        let (warped, canvas) = apply_homography(&image, &h, &WarpParams::default())?;
        assert_eq!(canvas, Canvas::new(10, -3, 5, 1));

        // the first and last columns sample half a pixel outside the source
        let expected = [0.0, 5.0, 15.0, 25.0, 0.0];
        for (a, b) in warped.as_slice().iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_apply_homography_upscale_bilinear() -> Result<(), WarpError> {
        let image = Image::<f32, 1>::new([2, 2].into(), vec![0.0, 1.0, 2.0, 3.0])?;
        let h = from_row_major([2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0]);

        let (warped, canvas) = apply_homography(&image, &h, &WarpParams::default())?;
        assert_eq!(canvas, Canvas::new(0, 0, 3, 3));

        let expected = [0.0, 0.5, 1.0, 1.0, 1.5, 2.0, 2.0, 2.5, 3.0];
        for (a, b) in warped.as_slice().iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }

        let nearest = WarpParams::default().with_interpolation(InterpolationMode::Nearest);
        let (warped, _) = apply_homography(&image, &h, &nearest)?;
        assert_eq!(warped.as_slice()[0], 0.0);
        assert_eq!(warped.as_slice()[8], 3.0);
        Ok(())
    }

    #[test]
    fn test_apply_homography_perspective_keeps_content() -> Result<(), WarpError> {
        let image = Image::<f32, 1>::from_size_val([32, 24].into(), 1.0)?;
        let h = from_row_major([1.1, 0.2, -5.0, -0.1, 0.9, 12.0, 4e-4, -6e-4, 1.0]);

        let (warped, canvas) = apply_homography(&image, &h, &WarpParams::default())?;
        assert_eq!(warped.size(), canvas.size());

        // pixels whose preimage is well inside the source carry the source value
        let h_inv = h.inverse().map_err(|_| WarpError::EmptyImage)?;
        for v in 0..canvas.height {
            for u in 0..canvas.width {
                let p = canvas.from_canvas([u as f64, v as f64]);
                let Some([x, y]) = h_inv.project(p) else {
                    continue;
                };
                let value = warped.get_pixel(u, v, 0)?;
                if (0.5..30.5).contains(&x) && (0.5..22.5).contains(&y) {
                    assert_relative_eq!(value, 1.0, epsilon = 1e-5);
                } else if !(-0.5..31.5).contains(&x) || !(-0.5..23.5).contains(&y) {
                    assert_eq!(value, 0.0);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_apply_homography_errors() -> Result<(), WarpError> {
        let image = Image::<u8, 1>::from_size_val([10, 10].into(), 1)?;

        let singular = from_row_major([1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert!(matches!(
            apply_homography(&image, &singular, &WarpParams::default()),
            Err(WarpError::DegenerateTransform(_))
        ));

        let scale = from_row_major([10.0, 0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 1.0]);
        let params = WarpParams::default().with_max_pixels(1000);
        assert_eq!(
            apply_homography(&image, &scale, &params).map(|(_, c)| c),
            Err(WarpError::CanvasTooLarge {
                width: 91,
                height: 91,
                max_pixels: 1000
            })
        );

        let horizon = from_row_major([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, -0.2, 1.0]);
        assert!(matches!(
            apply_homography(&image, &horizon, &WarpParams::default()),
            Err(WarpError::UnboundedCanvas(_))
        ));
        Ok(())
    }

    #[test]
    fn test_warp_onto_larger_canvas() -> Result<(), WarpError> {
        let image = Image::<u8, 1>::from_size_val([3, 2].into(), 9)?;
        let canvas = Canvas::new(-2, -1, 7, 4);
        let warped = warp_onto_canvas(
            &image,
            &Homography::identity(),
            &canvas,
            InterpolationMode::Nearest,
        )?;

        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 0, 0, 0, 0,
            0, 0, 9, 9, 9, 0, 0,
            0, 0, 9, 9, 9, 0, 0,
            0, 0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(warped.as_slice(), &expected);
        Ok(())
    }
}
