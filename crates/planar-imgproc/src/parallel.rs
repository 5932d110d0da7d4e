use rayon::prelude::*;

use planar_image::Image;

/// Apply a function to each sample of `src` and the matching sample of `dst`,
/// processing rows in parallel.
///
/// Both images must have the same size; extra rows or columns of the larger
/// one are left untouched.
pub fn par_iter_rows_val<T1, T2, const C: usize>(
    src: &Image<T1, C>,
    dst: &mut Image<T2, C>,
    f: impl Fn(&T1, &mut T2) + Send + Sync,
) where
    T1: Send + Sync,
    T2: Send + Sync,
{
    let row_len = C * src.cols();
    if row_len == 0 {
        return;
    }
    src.as_slice()
        .par_chunks_exact(row_len)
        .zip(dst.as_slice_mut().par_chunks_exact_mut(row_len))
        .for_each(|(src_chunk, dst_chunk)| {
            src_chunk
                .iter()
                .zip(dst_chunk.iter_mut())
                .for_each(|(src_pixel, dst_pixel)| {
                    f(src_pixel, dst_pixel);
                });
        });
}

/// Apply a function to each pixel for grid sampling in parallel.
///
/// `map_x` and `map_y` hold one source coordinate per destination pixel in
/// row-major order.
pub fn par_iter_rows_resample<T: Send, const C: usize>(
    dst: &mut Image<T, C>,
    map_x: &[f64],
    map_y: &[f64],
    f: impl Fn(f64, f64, &mut [T]) + Send + Sync,
) {
    let cols = dst.cols();
    if cols == 0 || C == 0 {
        return;
    }
    let dst_slice = dst.as_slice_mut();

    dst_slice
        .par_chunks_exact_mut(C * cols)
        .zip(map_x.par_chunks_exact(cols))
        .zip(map_y.par_chunks_exact(cols))
        .for_each(|((dst_chunk, map_x_chunk), map_y_chunk)| {
            dst_chunk
                .chunks_exact_mut(C)
                .zip(map_x_chunk.iter().zip(map_y_chunk.iter()))
                .for_each(|(dst_pixel, (x, y))| {
                    f(*x, *y, dst_pixel);
                });
        });
}
