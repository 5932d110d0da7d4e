use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use planar_geometry::Homography;
use planar_image::Image;
use planar_imgproc::{
    interpolation::InterpolationMode,
    mosaic::mosaic,
    warp::{apply_homography, warp_perspective, WarpParams},
};

fn perspective_homography(width: usize, height: usize) -> Homography {
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    Homography::from_array([
        [0.9, 0.15, -0.1 * cx],
        [-0.05, 1.05, 0.05 * cy],
        [1e-4, -5e-5, 1.0],
    ])
}

fn bench_warp_perspective(c: &mut Criterion) {
    let mut group = c.benchmark_group("WarpPerspective");

    for (width, height) in [(256, 224), (512, 448), (1024, 896)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let image_size = [*width, *height].into();
        let image = Image::<f32, 3>::from_fn(image_size, |x, y, c| (x + y + c) as f32);
        let output = Image::<f32, 3>::from_size_val(image_size, 0.0).unwrap();
        let h = perspective_homography(*width, *height);

        for mode in [InterpolationMode::Bilinear, InterpolationMode::Nearest] {
            group.bench_with_input(
                BenchmarkId::new(format!("{mode:?}"), &parameter_string),
                &(&image, &output, h),
                |b, i| {
                    let (src, mut dst, h) = (i.0, i.1.clone(), i.2);
                    b.iter(|| {
                        warp_perspective(
                            std::hint::black_box(src),
                            std::hint::black_box(&mut dst),
                            std::hint::black_box(&h),
                            std::hint::black_box(mode),
                        )
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_apply_homography(c: &mut Criterion) {
    let mut group = c.benchmark_group("ApplyHomography");

    for (width, height) in [(256, 224), (512, 448), (1024, 896)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let image = Image::<u8, 3>::from_fn([*width, *height].into(), |x, y, _| (x ^ y) as u8);
        let h = perspective_homography(*width, *height);
        let params = WarpParams::default();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &(&image, h),
            |b, i| {
                b.iter(|| {
                    let _ = std::hint::black_box(apply_homography(i.0, &i.1, &params));
                })
            },
        );
    }
    group.finish();
}

fn bench_mosaic(c: &mut Criterion) {
    let image = Image::<u8, 3>::from_fn([512, 448].into(), |x, y, _| (x ^ y) as u8);
    let h = Homography::from_array([[1.0, 0.02, 300.0], [-0.02, 1.0, 40.0], [0.0, 0.0, 1.0]]);
    let params = WarpParams::default();

    c.bench_function("Mosaic/512x448x2", |b| {
        b.iter(|| {
            let _ = std::hint::black_box(mosaic(
                &[(&image, Homography::identity()), (&image, h)],
                &params,
            ));
        })
    });
}

criterion_group!(
    benches,
    bench_warp_perspective,
    bench_apply_homography,
    bench_mosaic
);
criterion_main!(benches);
