use planar_image::{ImageError, ImageSize};
use rayon::prelude::*;

/// A dense map from destination pixels to source coordinates.
///
/// `map_x` and `map_y` are stored row-major with one entry per destination
/// pixel. A non-finite entry marks a destination pixel without a source.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingGrid {
    size: ImageSize,
    map_x: Vec<f64>,
    map_y: Vec<f64>,
}

impl SamplingGrid {
    /// Create a grid from its two coordinate maps.
    ///
    /// # Errors
    ///
    /// Fails if either map does not hold exactly `width * height` entries.
    pub fn new(size: ImageSize, map_x: Vec<f64>, map_y: Vec<f64>) -> Result<Self, ImageError> {
        let expected = size.num_pixels();
        for map in [&map_x, &map_y] {
            if map.len() != expected {
                return Err(ImageError::InvalidChannelShape(map.len(), expected));
            }
        }
        Ok(Self { size, map_x, map_y })
    }

    /// The size of the destination the grid samples into.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The x coordinates of the source positions.
    pub fn map_x(&self) -> &[f64] {
        &self.map_x
    }

    /// The y coordinates of the source positions.
    pub fn map_y(&self) -> &[f64] {
        &self.map_y
    }

    /// The source position of the destination pixel `(x, y)`, if it has one.
    pub fn get(&self, x: usize, y: usize) -> Option<[f64; 2]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let i = y * self.size.width + x;
        let p = [self.map_x[i], self.map_y[i]];
        (p[0].is_finite() && p[1].is_finite()).then_some(p)
    }
}

/// Create a meshgrid by evaluating `f(x, y)` at every destination pixel.
///
/// The rows are evaluated in parallel.
///
/// # Arguments
///
/// * `cols` - The number of columns indicating the width of the grid
/// * `rows` - The number of rows indicating the height of the grid
/// * `f` - Maps a destination pixel to its source coordinates.
pub fn meshgrid_from_fn(
    cols: usize,
    rows: usize,
    f: impl Fn(usize, usize) -> (f64, f64) + Send + Sync,
) -> SamplingGrid {
    let size = ImageSize {
        width: cols,
        height: rows,
    };
    let mut map_x = vec![0.0; size.num_pixels()];
    let mut map_y = vec![0.0; size.num_pixels()];

    if cols > 0 {
        map_x
            .par_chunks_exact_mut(cols)
            .zip(map_y.par_chunks_exact_mut(cols))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| {
                for (x, (mx, my)) in row_x.iter_mut().zip(row_y.iter_mut()).enumerate() {
                    (*mx, *my) = f(x, y);
                }
            });
    }

    SamplingGrid { size, map_x, map_y }
}
