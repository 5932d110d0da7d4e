use crate::error::HomographyError;
use crate::homogeneous::Point2D;

/// An ordered set of point pairs `(src_i, dst_i)` in pixel coordinates.
///
/// Both sides always have the same length; pairs are matched by index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Correspondences {
    src: Vec<[f64; 2]>,
    dst: Vec<[f64; 2]>,
}

impl Correspondences {
    /// Pair two point lists.
    ///
    /// # Errors
    ///
    /// Fails with [`HomographyError::MismatchedLengths`] if the lists differ in length.
    pub fn new(src: Vec<[f64; 2]>, dst: Vec<[f64; 2]>) -> Result<Self, HomographyError> {
        if src.len() != dst.len() {
            return Err(HomographyError::MismatchedLengths {
                src: src.len(),
                dst: dst.len(),
            });
        }
        Ok(Self { src, dst })
    }

    /// Pair two lists of homogeneous points, normalizing each one.
    ///
    /// # Errors
    ///
    /// Fails when the lengths differ or a point lies at infinity.
    pub fn from_homogeneous(src: &[Point2D], dst: &[Point2D]) -> Result<Self, HomographyError> {
        if src.len() != dst.len() {
            return Err(HomographyError::MismatchedLengths {
                src: src.len(),
                dst: dst.len(),
            });
        }
        let src = src
            .iter()
            .map(Point2D::to_pixel)
            .collect::<Result<Vec<_>, _>>()?;
        let dst = dst
            .iter()
            .map(Point2D::to_pixel)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { src, dst })
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.src.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// The source points.
    pub fn src(&self) -> &[[f64; 2]] {
        &self.src
    }

    /// The target points.
    pub fn dst(&self) -> &[[f64; 2]] {
        &self.dst
    }

    /// Iterate over `(src, dst)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&[f64; 2], &[f64; 2])> {
        self.src.iter().zip(&self.dst)
    }

    /// Append a pair.
    pub fn push(&mut self, src: [f64; 2], dst: [f64; 2]) {
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Keep the pairs whose mask entry is `true`.
    ///
    /// # Errors
    ///
    /// Fails with [`HomographyError::MismatchedLengths`] when the mask length
    /// differs from the number of pairs.
    pub fn subset(&self, mask: &[bool]) -> Result<Self, HomographyError> {
        if mask.len() != self.len() {
            return Err(HomographyError::MismatchedLengths {
                src: self.len(),
                dst: mask.len(),
            });
        }
        let (src, dst) = self
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|((s, d), _)| (*s, *d))
            .unzip();
        Ok(Self { src, dst })
    }

    /// Swap the roles of source and target.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst.clone(),
            dst: self.src.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mismatched() {
        let res = Correspondences::new(vec![[0.0, 0.0]; 3], vec![[0.0, 0.0]; 2]);
        assert!(matches!(
            res,
            Err(HomographyError::MismatchedLengths { src: 3, dst: 2 })
        ));
    }

    #[test]
    fn test_from_homogeneous() -> Result<(), HomographyError> {
        let src = [Point2D::new(2.0, 4.0, 2.0), Point2D::new(3.0, 3.0, 1.0)];
        let dst = [Point2D::new(-1.0, -1.0, -1.0), Point2D::new(0.0, 9.0, 3.0)];
        let c = Correspondences::from_homogeneous(&src, &dst)?;
        assert_eq!(c.src(), &[[1.0, 2.0], [3.0, 3.0]]);
        assert_eq!(c.dst(), &[[1.0, 1.0], [0.0, 3.0]]);

        let at_inf = [Point2D::new(1.0, 0.0, 0.0), Point2D::new(3.0, 3.0, 1.0)];
        assert!(matches!(
            Correspondences::from_homogeneous(&at_inf, &dst),
            Err(HomographyError::Geometry(_))
        ));
        Ok(())
    }

    #[test]
    fn test_subset() -> Result<(), HomographyError> {
        let mut c = Correspondences::default();
        for i in 0..5 {
            c.push([i as f64, 0.0], [0.0, i as f64]);
        }
        let s = c.subset(&[true, false, true, false, true])?;
        assert_eq!(s.len(), 3);
        assert_eq!(s.src(), &[[0.0, 0.0], [2.0, 0.0], [4.0, 0.0]]);
        assert_eq!(s.reversed().src(), &[[0.0, 0.0], [0.0, 2.0], [0.0, 4.0]]);
        assert!(c.subset(&[true]).is_err());
        Ok(())
    }
}
