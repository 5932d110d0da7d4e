//! Compositing of several images warped into a common frame.

use planar_geometry::Homography;
use planar_image::{Image, ImageDtype};

use crate::parallel;
use crate::warp::{warp_onto_canvas, Canvas, WarpError, WarpParams};

/// The canvas covering all the images after their warps.
///
/// # Errors
///
/// Fails with [`WarpError::EmptyMosaic`] for no layers and otherwise as
/// [`Canvas::for_image`] does for any single layer.
pub fn mosaic_canvas<T, const C: usize>(
    layers: &[(&Image<T, C>, Homography)],
) -> Result<Canvas, WarpError> {
    let mut canvas: Option<Canvas> = None;
    for (image, h) in layers {
        let c = Canvas::for_image(image.size(), h)?;
        canvas = Some(match canvas {
            Some(acc) => acc.union(&c),
            None => c,
        });
    }
    canvas.ok_or(WarpError::EmptyMosaic)
}

/// Warps every image by its homography onto one canvas and keeps, for each
/// sample, the maximum over the layers.
///
/// Canvas pixels not covered by any layer are zero. The homographies map each
/// image into a common frame, e.g. the identity for the reference image and
/// the estimated homography for the others.
///
/// # Errors
///
/// * [`WarpError::EmptyMosaic`] if `layers` is empty.
/// * [`WarpError::CanvasTooLarge`] if the union canvas exceeds `params.max_pixels`.
/// * any error of [`Canvas::for_image`] for a single layer.
pub fn mosaic<T, const C: usize>(
    layers: &[(&Image<T, C>, Homography)],
    params: &WarpParams,
) -> Result<(Image<T, C>, Canvas), WarpError>
where
    T: ImageDtype + PartialOrd,
{
    let canvas = mosaic_canvas(layers)?;
    params.check_canvas(&canvas)?;

    log::debug!(
        "compositing {} images onto {}x{} canvas at ({}, {})",
        layers.len(),
        canvas.width,
        canvas.height,
        canvas.min_x,
        canvas.min_y
    );

    let mut composite = Image::from_size_val(canvas.size(), T::default())?;
    for (image, h) in layers {
        let warped = warp_onto_canvas(image, h, &canvas, params.interpolation)?;
        parallel::par_iter_rows_val(&warped, &mut composite, |src, dst| {
            if *src > *dst {
                *dst = *src;
            }
        });
    }

    Ok((composite, canvas))
}
