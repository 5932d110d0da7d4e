use argh::FromArgs;
use planar::{
    geometry::{Correspondences, Homography},
    image::{Image, ImageSize},
    pipeline::{stitch_pair, CorrespondenceMatcher, OverlaySink, PipelineError, StitchConfig},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;

/// Stitches a synthetic image pair related by a known homography
#[derive(FromArgs)]
struct Args {
    /// path to a JSON file with the stitching configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// width and height of the synthetic images
    #[argh(option, default = "320")]
    size: usize,

    /// number of correspondences with a wrong target
    #[argh(option, short = 'o', default = "20")]
    outliers: usize,

    /// bound of the uniform noise added to the targets, in pixels
    #[argh(option, short = 'n', default = "0.5")]
    noise: f64,

    /// seed of the synthetic data
    #[argh(option, short = 's', default = "0")]
    seed: u64,
}

/// Plays the role of a keypoint matcher: it knows the true homography and
/// reports a grid of matches, some of them wrong.
struct SyntheticMatcher {
    h: Homography,
    outliers: usize,
    noise: f64,
    rng: StdRng,
}

impl CorrespondenceMatcher<u8, 3> for SyntheticMatcher {
    fn match_pair(
        &mut self,
        _reference: &Image<u8, 3>,
        moving: &Image<u8, 3>,
    ) -> Result<Correspondences, PipelineError> {
        let mut c = Correspondences::default();
        let (w, h) = (moving.width() as f64, moving.height() as f64);
        for gy in 1..10 {
            for gx in 1..10 {
                let p = [w * gx as f64 / 10.0, h * gy as f64 / 10.0];
                let q = self
                    .h
                    .transform_xy(p)
                    .map_err(|e| PipelineError::Matcher(e.to_string()))?;
                let q = if self.rng.random_bool(0.5) && c.len() < self.outliers {
                    [
                        self.rng.random_range(0.0..w),
                        self.rng.random_range(0.0..h),
                    ]
                } else if self.noise > 0.0 {
                    [
                        q[0] + self.rng.random_range(-self.noise..self.noise),
                        q[1] + self.rng.random_range(-self.noise..self.noise),
                    ]
                } else {
                    q
                };
                c.push(p, q);
            }
        }
        Ok(c)
    }
}

/// Logs what a plotting backend would draw.
struct LogSink;

impl OverlaySink for LogSink {
    fn points(&mut self, label: &str, points: &[[f64; 2]]) {
        log::info!("overlay {label}: {} points", points.len());
    }

    fn lines(&mut self, label: &str, segments: &[([f64; 2], [f64; 2])]) {
        for (a, b) in segments {
            log::debug!("overlay {label}: ({:.1}, {:.1}) -> ({:.1}, {:.1})", a[0], a[1], b[0], b[1]);
        }
    }

    fn message(&mut self, text: &str) {
        log::info!("{text}");
    }
}

#[derive(Serialize)]
struct Report {
    homography: Homography,
    ground_truth: Homography,
    distance: f64,
    inliers: usize,
    correspondences: usize,
    ransac_iterations: usize,
    refinement_error: Option<(f64, f64)>,
    refinement_converged: Option<bool>,
    canvas: planar::imgproc::warp::Canvas,
}

fn checkerboard(size: ImageSize, cell: usize, tint: u8) -> Image<u8, 3> {
    Image::from_fn(size, |x, y, c| {
        let on = ((x / cell) + (y / cell)) % 2 == 0;
        match (on, c) {
            (true, 0) => tint,
            (true, _) => 220,
            (false, _) => 30,
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();
    if args.size < 16 {
        return Err(format!("--size must be at least 16, got {}", args.size).into());
    }

    let config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => StitchConfig::default(),
    };
    log::debug!("configuration: {}", serde_json::to_string(&config)?);

    let size = ImageSize {
        width: args.size,
        height: args.size * 3 / 4,
    };
    let reference = checkerboard(size, 16, 220);
    let moving = checkerboard(size, 16, 120);

    let s = args.size as f64;
    let ground_truth = Homography::from_array([
        [0.95, 0.05, 0.45 * s],
        [-0.04, 1.0, 0.05 * s],
        [2e-4 * 320.0 / s, -1e-4 * 320.0 / s, 1.0],
    ]);

    let mut matcher = SyntheticMatcher {
        h: ground_truth,
        outliers: args.outliers,
        noise: args.noise,
        rng: StdRng::seed_from_u64(args.seed),
    };

    let stitched = stitch_pair(&reference, &moving, &mut matcher, &mut LogSink, &config)?;

    let report = Report {
        homography: stitched.homography,
        ground_truth,
        distance: stitched.homography.distance_up_to_scale(&ground_truth),
        inliers: stitched.inliers.iter().filter(|&&k| k).count(),
        correspondences: stitched.inliers.len(),
        ransac_iterations: stitched.ransac.iterations,
        refinement_error: stitched
            .refinement
            .as_ref()
            .map(|r| (r.initial_error, r.final_error)),
        refinement_converged: stitched.refinement.as_ref().map(|r| r.converged),
        canvas: stitched.canvas,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
