//! A thin driver sequencing matching, robust estimation, refinement and
//! compositing of an image pair.
//!
//! Keypoint matching and visualization are not part of this crate. They are
//! injected through [`CorrespondenceMatcher`] and [`OverlaySink`], so any
//! detector or plotting backend can be plugged in.

use planar_geometry::{
    ransac_homography, refine_homography, symmetric_transfer_error, Correspondences, Homography,
    HomographyError, RansacParams, RansacResult, RefineParams, RefineResult,
};
use planar_image::{Image, ImageDtype};
use planar_imgproc::mosaic::mosaic;
use planar_imgproc::warp::{Canvas, WarpError, WarpParams};
use serde::{Deserialize, Serialize};

/// An error type for the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The injected matcher failed.
    #[error("Matcher failed: {0}")]
    Matcher(String),

    /// Estimation or refinement failed.
    #[error(transparent)]
    Homography(#[from] HomographyError),

    /// Warping or compositing failed.
    #[error(transparent)]
    Warp(#[from] WarpError),
}

/// Produces point correspondences between two images.
///
/// The source side of the returned set holds pixels of `moving`, the target
/// side the matching pixels of `reference`, so the homography estimated from
/// it maps `moving` onto `reference`.
pub trait CorrespondenceMatcher<T, const C: usize> {
    /// Match the two images.
    fn match_pair(
        &mut self,
        reference: &Image<T, C>,
        moving: &Image<T, C>,
    ) -> Result<Correspondences, PipelineError>;
}

/// Receives overlays for display.
///
/// Coordinates are canvas pixels of the mosaic, unless the label says
/// otherwise. All methods default to doing nothing.
pub trait OverlaySink {
    /// A labelled set of points.
    fn points(&mut self, _label: &str, _points: &[[f64; 2]]) {}

    /// A labelled set of line segments.
    fn lines(&mut self, _label: &str, _segments: &[([f64; 2], [f64; 2])]) {}

    /// A free-form status message.
    fn message(&mut self, _text: &str) {}
}

/// An [`OverlaySink`] that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OverlaySink for NullSink {}

/// Configuration of [`stitch_pair`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Robust estimation parameters.
    pub ransac: RansacParams,
    /// Gold Standard refinement parameters, `None` to skip refinement.
    pub refine: Option<RefineParams>,
    /// Resampling parameters of the mosaic.
    pub warp: WarpParams,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            ransac: RansacParams::default(),
            refine: Some(RefineParams::default()),
            warp: WarpParams::default(),
        }
    }
}

impl StitchConfig {
    /// Set the robust estimation parameters.
    pub fn with_ransac(mut self, ransac: RansacParams) -> Self {
        self.ransac = ransac;
        self
    }

    /// Set the refinement parameters, `None` to skip refinement.
    pub fn with_refine(mut self, refine: Option<RefineParams>) -> Self {
        self.refine = refine;
        self
    }

    /// Set the resampling parameters of the mosaic.
    pub fn with_warp(mut self, warp: WarpParams) -> Self {
        self.warp = warp;
        self
    }
}

/// Output of [`stitch_pair`].
#[derive(Debug, Clone)]
pub struct Stitched<T, const C: usize> {
    /// The homography mapping `moving` onto `reference`.
    pub homography: Homography,
    /// Inlier mask of `homography` over the matched correspondences, scored
    /// with the RANSAC threshold.
    pub inliers: Vec<bool>,
    /// The robust fit. Its mask is the one scored against the RANSAC model.
    pub ransac: RansacResult,
    /// The refinement, if it was requested.
    pub refinement: Option<RefineResult>,
    /// The two images composited on their union canvas.
    pub mosaic: Image<T, C>,
    /// Placement of the mosaic in the frame of `reference`.
    pub canvas: Canvas,
}

/// Stitch `moving` onto `reference`.
///
/// The stages are:
///
/// 1. match the images with `matcher`;
/// 2. fit a homography with [`ransac_homography`];
/// 3. if configured, polish it on the inliers with [`refine_homography`];
/// 4. composite both images on their union canvas with [`mosaic`].
///
/// After refinement the inlier mask is scored again against the refined
/// homography. Inliers, outliers and the outline of the warped `moving` image
/// are sent to `sink`.
///
/// # Errors
///
/// Any stage failure aborts the call: [`PipelineError::Matcher`] from the
/// matcher, [`PipelineError::Homography`] from estimation (e.g. too few or
/// degenerate correspondences) and [`PipelineError::Warp`] from compositing.
/// A refinement that does not converge is not an error; its result is kept in
/// [`Stitched::refinement`].
pub fn stitch_pair<T, const C: usize, M, S>(
    reference: &Image<T, C>,
    moving: &Image<T, C>,
    matcher: &mut M,
    sink: &mut S,
    config: &StitchConfig,
) -> Result<Stitched<T, C>, PipelineError>
where
    T: ImageDtype + PartialOrd,
    M: CorrespondenceMatcher<T, C> + ?Sized,
    S: OverlaySink + ?Sized,
{
    let correspondences = matcher.match_pair(reference, moving)?;
    log::info!("matched {} correspondences", correspondences.len());

    let ransac = ransac_homography(&correspondences, &config.ransac)?;
    log::info!(
        "ransac kept {}/{} inliers after {} iterations",
        ransac.inlier_count,
        correspondences.len(),
        ransac.iterations
    );

    let (refinement, homography) = match &config.refine {
        Some(params) => {
            let inliers = correspondences.subset(&ransac.inliers)?;
            let refined = refine_homography(&ransac.model, &inliers, params)?;
            if !refined.converged {
                log::warn!(
                    "refinement stopped without converging after {} iterations",
                    refined.iterations
                );
            }
            log::info!(
                "refinement error {:.6e} -> {:.6e} px^2",
                refined.initial_error,
                refined.final_error
            );
            let h = refined.homography;
            (Some(refined), h)
        }
        None => (None, ransac.model),
    };

    let inliers = if refinement.is_some() {
        score_inliers(&homography, &correspondences, config.ransac.threshold)
            .unwrap_or_else(|| ransac.inliers.clone())
    } else {
        ransac.inliers.clone()
    };

    let (composite, canvas) = mosaic(
        &[(reference, Homography::identity()), (moving, homography)],
        &config.warp,
    )?;
    log::info!(
        "mosaic {}x{} at ({}, {})",
        canvas.width,
        canvas.height,
        canvas.min_x,
        canvas.min_y
    );

    report_overlays(
        sink,
        &correspondences,
        &inliers,
        &homography,
        moving,
        &canvas,
    );

    Ok(Stitched {
        homography,
        inliers,
        ransac,
        refinement,
        mosaic: composite,
        canvas,
    })
}

/// Mask of the pairs whose symmetric transfer error under `h` is below
/// `threshold^2`, `None` for a singular `h`.
fn score_inliers(
    h: &Homography,
    correspondences: &Correspondences,
    threshold: f64,
) -> Option<Vec<bool>> {
    let h_inv = h.inverse().ok()?;
    let threshold_sq = threshold * threshold;
    let mask: Vec<bool> = correspondences
        .iter()
        .map(|(x1, x2)| symmetric_transfer_error(h, &h_inv, x1, x2) < threshold_sq)
        .collect();
    let count = mask.iter().filter(|&&k| k).count();
    log::debug!("refined homography keeps {count} of {} inliers", mask.len());
    Some(mask)
}

fn report_overlays<T, const C: usize, S: OverlaySink + ?Sized>(
    sink: &mut S,
    correspondences: &Correspondences,
    inliers: &[bool],
    homography: &Homography,
    moving: &Image<T, C>,
    canvas: &Canvas,
) {
    let (mut inlier_points, mut outlier_points) = (Vec::new(), Vec::new());
    for ((_, dst), keep) in correspondences.iter().zip(inliers) {
        let p = canvas.to_canvas(*dst);
        if *keep {
            inlier_points.push(p);
        } else {
            outlier_points.push(p);
        }
    }
    sink.points("inliers", &inlier_points);
    sink.points("outliers", &outlier_points);

    let to_canvas = canvas.translation().compose(homography);
    let (w, h) = (moving.width() as f64 - 1.0, moving.height() as f64 - 1.0);
    let corners = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]];
    let outline: Option<Vec<[f64; 2]>> = corners.iter().map(|c| to_canvas.project(*c)).collect();
    if let Some(outline) = outline {
        let segments: Vec<_> = (0..4).map(|i| (outline[i], outline[(i + 1) % 4])).collect();
        sink.lines("moving_outline", &segments);
    }

    sink.message(&format!(
        "{} of {} correspondences are inliers",
        inlier_points.len(),
        correspondences.len()
    ));
}
