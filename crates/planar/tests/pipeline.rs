use planar::geometry::{
    symmetric_transfer_error, Correspondences, Homography, HomographyError, RansacParams,
};
use planar::image::{Image, ImageSize};
use planar::imgproc::warp::Canvas;
use planar::pipeline::{
    stitch_pair, CorrespondenceMatcher, NullSink, OverlaySink, PipelineError, StitchConfig,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_OUTLIERS: usize = 15;

fn h_true() -> Homography {
    Homography::from_array([
        [1.0, 0.02, 60.0],
        [-0.01, 1.0, 10.0],
        [1e-4, 0.0, 1.0],
    ])
}

fn textured(size: ImageSize) -> Image<u8, 1> {
    Image::from_fn(size, |x, y, _| ((x * 7 + y * 13) % 251) as u8)
}

/// Matches on a grid of the moving image using a known homography, with
/// sub-pixel noise on the inliers and the first few targets displaced.
struct SyntheticMatcher {
    h: Homography,
    noise: f64,
    seed: u64,
}

impl CorrespondenceMatcher<u8, 1> for SyntheticMatcher {
    fn match_pair(
        &mut self,
        _reference: &Image<u8, 1>,
        moving: &Image<u8, 1>,
    ) -> Result<Correspondences, PipelineError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut c = Correspondences::default();
        for gy in 0..8 {
            for gx in 0..10 {
                let p = [
                    5.0 + gx as f64 * (moving.width() as f64 - 10.0) / 9.0,
                    5.0 + gy as f64 * (moving.height() as f64 - 10.0) / 7.0,
                ];
                let q = self
                    .h
                    .transform_xy(p)
                    .map_err(|e| PipelineError::Matcher(e.to_string()))?;
                let q = if c.len() < NUM_OUTLIERS {
                    let angle: f64 = rng.random_range(0.0..std::f64::consts::TAU);
                    let dist: f64 = rng.random_range(30.0..80.0);
                    [q[0] + dist * angle.cos(), q[1] + dist * angle.sin()]
                } else {
                    [
                        q[0] + rng.random_range(-self.noise..=self.noise),
                        q[1] + rng.random_range(-self.noise..=self.noise),
                    ]
                };
                c.push(p, q);
            }
        }
        Ok(c)
    }
}

struct FailingMatcher;

impl CorrespondenceMatcher<u8, 1> for FailingMatcher {
    fn match_pair(
        &mut self,
        _reference: &Image<u8, 1>,
        _moving: &Image<u8, 1>,
    ) -> Result<Correspondences, PipelineError> {
        Err(PipelineError::Matcher("no features".to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    points: Vec<(String, usize)>,
    segments: usize,
    messages: Vec<String>,
}

impl OverlaySink for RecordingSink {
    fn points(&mut self, label: &str, points: &[[f64; 2]]) {
        self.points.push((label.to_string(), points.len()));
    }

    fn lines(&mut self, _label: &str, segments: &[([f64; 2], [f64; 2])]) {
        self.segments += segments.len();
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
}

#[test]
fn test_stitch_pair_recovers_homography() -> Result<(), Box<dyn std::error::Error>> {
    let size = ImageSize {
        width: 120,
        height: 90,
    };
    let (reference, moving) = (textured(size), textured(size));
    let mut matcher = SyntheticMatcher {
        h: h_true(),
        noise: 0.3,
        seed: 3,
    };
    let mut sink = RecordingSink::default();

    let stitched = stitch_pair(
        &reference,
        &moving,
        &mut matcher,
        &mut sink,
        &StitchConfig::default(),
    )?;

    // the planted outliers come first and none of them is accepted
    assert!(stitched.ransac.inliers[..NUM_OUTLIERS].iter().all(|k| !k));
    assert!(stitched.ransac.inlier_count >= 62);

    for p in [[0.0, 0.0], [119.0, 0.0], [119.0, 89.0], [0.0, 89.0], [60.0, 45.0]] {
        let a = stitched.homography.transform_xy(p)?;
        let b = h_true().transform_xy(p)?;
        assert!((a[0] - b[0]).hypot(a[1] - b[1]) < 0.5, "{a:?} vs {b:?}");
    }

    let refinement = stitched.refinement.as_ref().ok_or("refinement missing")?;
    assert!(refinement.final_error <= refinement.initial_error);
    assert_eq!(refinement.corrected_src.len(), stitched.ransac.inlier_count);

    let expected_canvas = Canvas::for_image(size, &Homography::identity())?
        .union(&Canvas::for_image(size, &stitched.homography)?);
    assert_eq!(stitched.canvas, expected_canvas);
    assert_eq!(stitched.mosaic.size(), stitched.canvas.size());
    assert_eq!(stitched.canvas.min_x, 0);

    // the reported mask belongs to the refined homography
    let correspondences = matcher.match_pair(&reference, &moving)?;
    let h_inv = stitched.homography.inverse()?;
    let threshold_sq = StitchConfig::default().ransac.threshold.powi(2);
    assert_eq!(stitched.inliers.len(), 80);
    for ((x1, x2), keep) in correspondences.iter().zip(&stitched.inliers) {
        let err = symmetric_transfer_error(&stitched.homography, &h_inv, x1, x2);
        assert_eq!(*keep, err < threshold_sq);
    }
    assert!(stitched.inliers[..NUM_OUTLIERS].iter().all(|k| !k));

    let inlier_count = stitched.inliers.iter().filter(|&&k| k).count();
    assert_eq!(
        sink.points,
        vec![
            ("inliers".to_string(), inlier_count),
            ("outliers".to_string(), 80 - inlier_count),
        ]
    );
    assert_eq!(sink.segments, 4);
    assert_eq!(sink.messages.len(), 1);
    Ok(())
}

#[test]
fn test_stitch_pair_without_refinement() -> Result<(), Box<dyn std::error::Error>> {
    let size = ImageSize {
        width: 80,
        height: 60,
    };
    let (reference, moving) = (textured(size), textured(size));
    let mut matcher = SyntheticMatcher {
        h: h_true(),
        noise: 0.0,
        seed: 11,
    };
    let config = StitchConfig::default()
        .with_refine(None)
        .with_ransac(RansacParams::default().with_parallel(true));

    let stitched = stitch_pair(&reference, &moving, &mut matcher, &mut NullSink, &config)?;

    assert!(stitched.refinement.is_none());
    assert_eq!(stitched.homography, stitched.ransac.model);
    assert_eq!(stitched.inliers, stitched.ransac.inliers);
    assert!(stitched.homography.distance_up_to_scale(&h_true()) < 1e-6);

    // the reference is composited at its own position
    let value = stitched.mosaic.get_pixel(3, 4, 0)?;
    assert!(value >= reference.get_pixel(3, 4, 0)?);
    Ok(())
}

#[test]
fn test_stitch_pair_matcher_failure() {
    let image = textured([10, 10].into());
    let res = stitch_pair(
        &image,
        &image,
        &mut FailingMatcher,
        &mut NullSink,
        &StitchConfig::default(),
    );
    assert!(matches!(res, Err(PipelineError::Matcher(_))));
}

#[test]
fn test_stitch_pair_too_few_matches() {
    struct Sparse;
    impl CorrespondenceMatcher<u8, 1> for Sparse {
        fn match_pair(
            &mut self,
            _reference: &Image<u8, 1>,
            _moving: &Image<u8, 1>,
        ) -> Result<Correspondences, PipelineError> {
            Ok(Correspondences::new(
                vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
                vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            )?)
        }
    }

    let image = textured([10, 10].into());
    let res = stitch_pair(
        &image,
        &image,
        &mut Sparse,
        &mut NullSink,
        &StitchConfig::default(),
    );
    assert!(matches!(
        res,
        Err(PipelineError::Homography(
            HomographyError::InsufficientData { .. }
        ))
    ));
}

#[test]
fn test_stitch_config_from_json() -> Result<(), serde_json::Error> {
    let config: StitchConfig = serde_json::from_str(
        r#"{ "refine": null, "ransac": { "threshold": 2.0, "random_seed": 42 } }"#,
    )?;
    assert!(config.refine.is_none());
    assert_eq!(config.ransac.threshold, 2.0);
    assert_eq!(config.ransac.random_seed, Some(42));
    assert_eq!(config.ransac.max_iterations, RansacParams::default().max_iterations);
    assert_eq!(config.warp, StitchConfig::default().warp);

    let json = serde_json::to_value(StitchConfig::default())?;
    assert!(json["refine"].is_object());
    assert_eq!(json["warp"]["interpolation"], "bilinear");
    Ok(())
}
