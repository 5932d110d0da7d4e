use planar_geometry::homogeneous::W_EPSILON;
use planar_geometry::linalg::normalized_det_mat33;
use planar_geometry::Homography;
use planar_image::ImageSize;
use serde::{Deserialize, Serialize};

use super::WarpError;

/// Per-axis extent, in pixels, beyond which a canvas is treated as unbounded.
const MAX_EXTENT: f64 = 2_147_483_648.0;

/// Integer placement of an output image in the coordinate frame of the warp.
///
/// Pixel `(u, v)` of an image rendered on the canvas shows the point
/// `(u + min_x, v + min_y)` of the warped plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Canvas {
    /// x coordinate of the leftmost pixel column.
    pub min_x: i64,
    /// y coordinate of the topmost pixel row.
    pub min_y: i64,
    /// Number of pixel columns.
    pub width: usize,
    /// Number of pixel rows.
    pub height: usize,
}

impl Canvas {
    /// Create a canvas from its offset and size.
    pub const fn new(min_x: i64, min_y: i64, width: usize, height: usize) -> Self {
        Self {
            min_x,
            min_y,
            width,
            height,
        }
    }

    /// A canvas at the origin with the given size.
    pub const fn from_size(size: ImageSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// The canvas holding an image of `size` after it is warped by `h`.
    ///
    /// The four corners `(0, 0)`, `(W - 1, 0)`, `(W - 1, H - 1)` and
    /// `(0, H - 1)` are transformed and the canvas is the integer bounding box
    /// of their images: `min = floor(min)`, `max = ceil(max)` and
    /// `width = max_x - min_x + 1`.
    ///
    /// # Errors
    ///
    /// * [`WarpError::EmptyImage`] if the image has no pixels.
    /// * [`WarpError::DegenerateTransform`] if `h` is singular.
    /// * [`WarpError::UnboundedCanvas`] if the image touches or crosses the
    ///   line that `h` sends to infinity.
    pub fn for_image(size: ImageSize, h: &Homography) -> Result<Self, WarpError> {
        if size.width == 0 || size.height == 0 {
            return Err(WarpError::EmptyImage);
        }
        if h.is_degenerate() {
            return Err(WarpError::DegenerateTransform(normalized_det_mat33(
                h.as_array(),
            )));
        }

        let (xmax, ymax) = ((size.width - 1) as f64, (size.height - 1) as f64);
        let corners = [[0.0, 0.0], [xmax, 0.0], [xmax, ymax], [0.0, ymax]];

        // w is affine in (x, y), so equal signs at the corners cover the whole image
        let m = h.as_array();
        let w = corners.map(|c| m[2][0] * c[0] + m[2][1] * c[1] + m[2][2]);
        let w_bound = m[2][0].abs() * xmax + m[2][1].abs() * ymax + m[2][2].abs();
        let all_positive = w.iter().all(|w| *w > W_EPSILON * w_bound);
        let all_negative = w.iter().all(|w| *w < -W_EPSILON * w_bound);
        if !(all_positive || all_negative) {
            return Err(WarpError::UnboundedCanvas(format!(
                "corner scales {w:?} do not share a sign"
            )));
        }

        let mut projected = [[0.0; 2]; 4];
        for (p, c) in projected.iter_mut().zip(corners) {
            *p = h.project(c).ok_or_else(|| {
                WarpError::UnboundedCanvas(format!("corner {c:?} is mapped to infinity"))
            })?;
        }
        Self::bounding(&projected)
    }

    /// The integer bounding box of a set of points.
    ///
    /// # Errors
    ///
    /// Fails with [`WarpError::UnboundedCanvas`] when a coordinate is not finite
    /// or the box does not fit in 32-bit pixel coordinates, and with
    /// [`WarpError::EmptyImage`] for an empty set.
    pub fn bounding(points: &[[f64; 2]]) -> Result<Self, WarpError> {
        if points.is_empty() {
            return Err(WarpError::EmptyImage);
        }
        let (mut lo, mut hi) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
        for p in points {
            for k in 0..2 {
                lo[k] = lo[k].min(p[k]);
                hi[k] = hi[k].max(p[k]);
            }
        }
        for k in 0..2 {
            let finite = lo[k].is_finite() && hi[k].is_finite();
            if !finite || lo[k].abs() > MAX_EXTENT || hi[k].abs() > MAX_EXTENT {
                return Err(WarpError::UnboundedCanvas(format!(
                    "bounding box [{lo:?}, {hi:?}] is too large"
                )));
            }
        }

        let (min_x, min_y) = (lo[0].floor() as i64, lo[1].floor() as i64);
        let (max_x, max_y) = (hi[0].ceil() as i64, hi[1].ceil() as i64);
        Ok(Self::new(
            min_x,
            min_y,
            (max_x - min_x + 1) as usize,
            (max_y - min_y + 1) as usize,
        ))
    }

    /// The size of an image covering the canvas.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Whether the canvas has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// x coordinate of the rightmost pixel column.
    pub fn max_x(&self) -> i64 {
        self.min_x + self.width as i64 - 1
    }

    /// y coordinate of the bottom pixel row.
    pub fn max_y(&self) -> i64 {
        self.min_y + self.height as i64 - 1
    }

    /// The smallest canvas covering both canvases.
    pub fn union(&self, other: &Canvas) -> Canvas {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let min_x = self.min_x.min(other.min_x);
        let min_y = self.min_y.min(other.min_y);
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());
        Canvas::new(
            min_x,
            min_y,
            (max_x - min_x + 1) as usize,
            (max_y - min_y + 1) as usize,
        )
    }

    /// Whether the point lies within the pixel extent of the canvas.
    pub fn contains(&self, p: [f64; 2]) -> bool {
        !self.is_empty()
            && p[0] >= self.min_x as f64
            && p[0] <= self.max_x() as f64
            && p[1] >= self.min_y as f64
            && p[1] <= self.max_y() as f64
    }

    /// Express a point of the warped plane in canvas pixel coordinates.
    pub fn to_canvas(&self, p: [f64; 2]) -> [f64; 2] {
        [p[0] - self.min_x as f64, p[1] - self.min_y as f64]
    }

    /// Express a canvas pixel position in the warped plane.
    pub fn from_canvas(&self, p: [f64; 2]) -> [f64; 2] {
        [p[0] + self.min_x as f64, p[1] + self.min_y as f64]
    }

    /// The translation taking the warped plane to canvas pixel coordinates.
    ///
    /// `canvas.translation().compose(&h)` maps source pixels straight onto the
    /// canvas, e.g. to overlay lines on a warped image.
    pub fn translation(&self) -> Homography {
        Homography::from_array([
            [1.0, 0.0, -(self.min_x as f64)],
            [0.0, 1.0, -(self.min_y as f64)],
            [0.0, 0.0, 1.0],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_canvas_identity() -> Result<(), WarpError> {
        let size = ImageSize {
            width: 640,
            height: 480,
        };
        let canvas = Canvas::for_image(size, &Homography::identity())?;
        assert_eq!(canvas, Canvas::new(0, 0, 640, 480));
        assert_eq!(canvas.size(), size);
        Ok(())
    }

    #[test]
    fn test_canvas_fractional_translation() -> Result<(), WarpError> {
        let h = Homography::from_array([[1.0, 0.0, 10.5], [0.0, 1.0, -3.0], [0.0, 0.0, 1.0]]);
        let canvas = Canvas::for_image([4, 1].into(), &h)?;
        assert_eq!(canvas, Canvas::new(10, -3, 5, 1));
        Ok(())
    }

    #[test]
    fn test_canvas_flip_and_rotation() -> Result<(), WarpError> {
        // 90 degree rotation about the origin sends x to -y
        let h = Homography::from_array([[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let canvas = Canvas::for_image([10, 4].into(), &h)?;
        assert_eq!(canvas, Canvas::new(-3, 0, 4, 10));

        // a negative overall scale describes the same mapping
        let neg = Homography::from_array([[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, -1.0]]);
        assert_eq!(Canvas::for_image([10, 4].into(), &neg)?, canvas);
        Ok(())
    }

    #[test]
    fn test_canvas_contains_transformed_corners() -> Result<(), WarpError> {
        let mut rng = StdRng::seed_from_u64(7);
        let size = ImageSize {
            width: 64,
            height: 48,
        };
        let (w, h) = (63.0, 47.0);
        for _ in 0..200 {
            let m = Homography::from_array([
                [
                    rng.random_range(0.5..2.0),
                    rng.random_range(-0.5..0.5),
                    rng.random_range(-100.0..100.0),
                ],
                [
                    rng.random_range(-0.5..0.5),
                    rng.random_range(0.5..2.0),
                    rng.random_range(-100.0..100.0),
                ],
                [
                    rng.random_range(-1e-3..1e-3),
                    rng.random_range(-1e-3..1e-3),
                    1.0,
                ],
            ]);
            let canvas = Canvas::for_image(size, &m)?;
            for c in [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]] {
                let p = m.project(c).ok_or(WarpError::EmptyImage)?;
                assert!(canvas.contains(p), "{p:?} not in {canvas:?}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_canvas_errors() {
        let size = ImageSize {
            width: 200,
            height: 10,
        };
        // the line x = 100 is sent to infinity
        let h = Homography::from_array([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-0.01, 0.0, 1.0]]);
        assert!(matches!(
            Canvas::for_image(size, &h),
            Err(WarpError::UnboundedCanvas(_))
        ));

        let singular = Homography::from_array([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(
            Canvas::for_image(size, &singular),
            Err(WarpError::DegenerateTransform(_))
        ));

        assert_eq!(
            Canvas::for_image([0, 10].into(), &Homography::identity()),
            Err(WarpError::EmptyImage)
        );
    }

    #[test]
    fn test_canvas_union_and_coordinates() {
        let a = Canvas::new(-10, 0, 20, 5);
        let b = Canvas::new(5, -4, 10, 3);
        let u = a.union(&b);
        assert_eq!(u, Canvas::new(-10, -4, 25, 9));
        assert_eq!(u.union(&Canvas::new(0, 0, 0, 0)), u);

        assert!(u.contains([14.0, 4.0]));
        assert!(!u.contains([14.5, 4.0]));

        assert_eq!(u.to_canvas([0.0, 0.0]), [10.0, 4.0]);
        assert_eq!(u.from_canvas(u.to_canvas([3.5, -1.0])), [3.5, -1.0]);
        assert_eq!(u.translation().project([0.0, 0.0]), Some([10.0, 4.0]));
    }
}
