use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::linalg::{cross3, dot3, norm3};

/// Below this magnitude a homogeneous scale is treated as zero.
pub const W_EPSILON: f64 = 1e-12;

/// A point of the projective plane in homogeneous coordinates `(x, y, w)`.
///
/// A finite point has `w != 0`; `w == 0` represents a point at infinity
/// (a direction).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// First homogeneous coordinate.
    pub x: f64,
    /// Second homogeneous coordinate.
    pub y: f64,
    /// Homogeneous scale.
    pub w: f64,
}

impl Point2D {
    /// Create a point from its three homogeneous coordinates.
    pub const fn new(x: f64, y: f64, w: f64) -> Self {
        Self { x, y, w }
    }

    /// Lift a pixel position to homogeneous coordinates with `w = 1`.
    pub const fn from_pixel(p: [f64; 2]) -> Self {
        Self::new(p[0], p[1], 1.0)
    }

    /// The coordinates as an array `[x, y, w]`.
    pub const fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.w]
    }

    /// Build a point from an array `[x, y, w]`.
    pub const fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    /// Whether the point lies on the line at infinity.
    pub fn is_at_infinity(&self) -> bool {
        self.w.abs() < W_EPSILON
    }

    /// Divide by `w`, yielding the representative with `w = 1`.
    ///
    /// # Errors
    ///
    /// Fails with [`GeometryError::DegenerateGeometry`] for points at infinity.
    pub fn normalized(&self) -> Result<Self, GeometryError> {
        if self.is_at_infinity() {
            return Err(GeometryError::DegenerateGeometry(format!(
                "cannot normalize point at infinity ({}, {}, {})",
                self.x, self.y, self.w
            )));
        }
        Ok(Self::new(self.x / self.w, self.y / self.w, 1.0))
    }

    /// The inhomogeneous pixel position `[x / w, y / w]`.
    pub fn to_pixel(&self) -> Result<[f64; 2], GeometryError> {
        let p = self.normalized()?;
        Ok([p.x, p.y])
    }
}

impl From<[f64; 2]> for Point2D {
    fn from(p: [f64; 2]) -> Self {
        Self::from_pixel(p)
    }
}

/// A line `a*x + b*y + c*w = 0` of the projective plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line2D {
    /// Coefficient of `x`.
    pub a: f64,
    /// Coefficient of `y`.
    pub b: f64,
    /// Coefficient of `w`.
    pub c: f64,
}

impl Line2D {
    /// Create a line from its coefficients.
    pub const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// The line at infinity `(0, 0, 1)`.
    pub const fn at_infinity() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// The coefficients as an array `[a, b, c]`.
    pub const fn to_array(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }

    /// Build a line from an array `[a, b, c]`.
    pub const fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    /// Scale the line so that `a^2 + b^2 = 1`.
    ///
    /// The residual `a*x + b*y + c` is then the signed Euclidean distance of a
    /// finite point to the line.
    pub fn normalized(&self) -> Result<Self, GeometryError> {
        let n = self.a.hypot(self.b);
        if n < W_EPSILON {
            return Err(GeometryError::DegenerateGeometry(
                "the line at infinity has no normal direction".to_string(),
            ));
        }
        Ok(Self::new(self.a / n, self.b / n, self.c / n))
    }

    /// Euclidean distance of a finite point to the line.
    pub fn distance_to(&self, p: &Point2D) -> Result<f64, GeometryError> {
        let l = self.normalized()?;
        let p = p.normalized()?;
        Ok(dot3(&l.to_array(), &p.to_array()).abs())
    }
}

/// The line through two points: `cross(p, q)`.
///
/// # Errors
///
/// Fails with [`GeometryError::DegenerateGeometry`] when the points coincide
/// (the cross product vanishes relative to their magnitudes).
pub fn line_through(p: &Point2D, q: &Point2D) -> Result<Line2D, GeometryError> {
    let (pa, qa) = (p.to_array(), q.to_array());
    let l = cross3(&pa, &qa);
    if norm3(&l) <= W_EPSILON * norm3(&pa) * norm3(&qa) {
        return Err(GeometryError::DegenerateGeometry(
            "line through coincident points".to_string(),
        ));
    }
    Ok(Line2D::from_array(l))
}

/// The intersection of two lines: `cross(l, m)`.
///
/// Parallel lines meet at a point at infinity (`w == 0`); that is a valid
/// result and callers decide how to treat it.
pub fn intersection(l: &Line2D, m: &Line2D) -> Point2D {
    Point2D::from_array(cross3(&l.to_array(), &m.to_array()))
}

/// The acute angle in radians, within `[0, pi/2]`, between the directions of two lines.
///
/// This is `acos(|cos|)` of the normalized dot product of the `(a, b)` normals,
/// evaluated as `atan2(|sin|, |cos|)` so that nearly parallel and nearly
/// orthogonal lines keep full precision.
///
/// # Errors
///
/// Fails with [`GeometryError::DegenerateGeometry`] if either line is the
/// line at infinity, which has no direction.
pub fn angle_between_lines(l: &Line2D, m: &Line2D) -> Result<f64, GeometryError> {
    let l = l.normalized()?;
    let m = m.normalized()?;
    let cos = (l.a * m.a + l.b * m.b).abs();
    let sin = (l.a * m.b - l.b * m.a).abs();
    Ok(sin.atan2(cos))
}

/// Divide a point by its homogeneous scale.
///
/// Free-function form of [`Point2D::normalized`].
pub fn normalize_point(p: &Point2D) -> Result<Point2D, GeometryError> {
    p.normalized()
}

/// Whether `p` lies on `l` up to a relative tolerance.
///
/// The test is `|p . l| <= tol * |p| * |l|`, which does not depend on the
/// scale of either representative.
pub fn is_incident(p: &Point2D, l: &Line2D, tol: f64) -> bool {
    let (pa, la) = (p.to_array(), l.to_array());
    dot3(&pa, &la).abs() <= tol * norm3(&pa) * norm3(&la)
}
