use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use kmeans_palette_wasm::layout::{Axis, LEVELS, pack_rgba};
use kmeans_palette_wasm::{
    AssignMode, Backend, ColorSet, CpuBackend, Cube, Params, Quantization, QuantizeError,
    SourceImage, quantize_bytes,
};
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn image(width: u32, height: u32, pixels: &[[u8; 4]]) -> SourceImage {
    let raw: Vec<u8> = pixels.iter().flatten().copied().collect();
    SourceImage::from_rgba8(width, height, &raw).unwrap()
}

fn random_image(seed: u64, width: u32, height: u32) -> SourceImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let pixels: Vec<[u8; 4]> = (0..width * height)
        .map(|_| [rng.r#gen(), rng.r#gen(), rng.r#gen(), 255])
        .collect();
    image(width, height, &pixels)
}

/// A few tight color blobs, closer to a real photo than uniform noise.
fn blob_image(seed: u64, width: u32, height: u32) -> SourceImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let centers: Vec<[i32; 3]> = (0..5)
        .map(|_| [rng.gen_range(20..236), rng.gen_range(20..236), rng.gen_range(20..236)])
        .collect();
    let pixels: Vec<[u8; 4]> = (0..width * height)
        .map(|_| {
            let c = centers[rng.gen_range(0..centers.len())];
            let jitter = |v: i32, rng: &mut ChaCha8Rng| (v + rng.gen_range(-12..=12)).clamp(0, 255) as u8;
            [jitter(c[0], &mut rng), jitter(c[1], &mut rng), jitter(c[2], &mut rng), 255]
        })
        .collect();
    image(width, height, &pixels)
}

fn pixels_of(img: &SourceImage) -> ColorSet {
    ColorSet::new(img, AssignMode::Pixels).unwrap()
}

fn quantize(colors: &ColorSet, params: &Params) -> Result<Quantization, QuantizeError> {
    CpuBackend.quantize(colors, params)
}

#[test]
fn two_reds_and_two_primaries() {
    let img = image(
        2,
        2,
        &[[255, 0, 0, 255], [254, 1, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]],
    );
    let colors = pixels_of(&img);
    let q = quantize(&colors, &Params::new().with_k(2).with_iterations(1)).unwrap();

    assert_eq!(
        q.cubes,
        vec![Cube::FULL.with_max(Axis::R, 1), Cube::FULL.with_min(Axis::R, 1)]
    );
    assert_eq!(q.initial_centroids, vec![[3.5, 127.5, 127.5], [251.5, 3.5, 3.5]]);
    assert_eq!(q.assignments, vec![1, 1, 0, 0]);
    assert_eq!(q.centroids, vec![[0.0, 127.5, 127.5], [254.5, 0.5, 0.0]]);
    assert_eq!(q.cluster_sizes(&colors), vec![2, 2]);
}

#[test]
fn well_separated_colors_reach_zero_error() {
    let palette = [[10, 10, 10, 255], [240, 20, 20, 255], [20, 240, 20, 255], [20, 20, 240, 255]];
    let pixels: Vec<[u8; 4]> = (0..24).map(|i| palette[i % 4]).collect();
    let img = image(6, 4, &pixels);
    let colors = pixels_of(&img);
    let q = quantize(&colors, &Params::new().with_k(4).with_iterations(3)).unwrap();

    assert_eq!(q.within_cluster_variance(&colors), 0.0);
    assert_eq!(q.cluster_sizes(&colors), vec![6, 6, 6, 6]);
    let mut found: Vec<[f32; 3]> = q.centroids.clone();
    found.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(
        found,
        vec![
            [10.0, 10.0, 10.0],
            [20.0, 20.0, 240.0],
            [20.0, 240.0, 20.0],
            [240.0, 20.0, 20.0],
        ]
    );
}

#[test]
fn final_cubes_partition_the_grid() {
    let img = random_image(7, 24, 24);
    let colors = pixels_of(&img);
    for k in [1, 2, 5, 16, 64] {
        let q = quantize(&colors, &Params::new().with_k(k).with_iterations(0)).unwrap();
        assert_eq!(q.cubes.len(), k as usize);
        for r in 0..LEVELS as u32 {
            for g in 0..LEVELS as u32 {
                for b in 0..LEVELS as u32 {
                    let owners = q.cubes.iter().filter(|c| c.contains_levels(r, g, b)).count();
                    assert_eq!(owners, 1, "k={k} level ({r},{g},{b})");
                }
            }
        }
    }
}

#[test]
fn refinement_never_increases_error() {
    let img = blob_image(11, 32, 20);
    let colors = pixels_of(&img);
    let mut previous = f64::INFINITY;
    for iterations in 0..6 {
        let params = Params::new().with_k(6).with_iterations(iterations);
        let error = quantize(&colors, &params)
            .unwrap()
            .within_cluster_variance(&colors);
        assert!(
            error <= previous * (1.0 + 1e-6) + 1e-3,
            "iterations={iterations}: {error} > {previous}"
        );
        previous = error;
    }
}

#[test]
fn cluster_sizes_cover_every_pixel() {
    let img = random_image(3, 17, 9);
    let colors = pixels_of(&img);
    let q = quantize(&colors, &Params::new().with_k(12).with_iterations(4)).unwrap();
    assert_eq!(q.cluster_sizes(&colors).iter().sum::<u64>(), 17 * 9);
    assert!(q.assignments.iter().all(|&c| c < 12));
}

#[test]
fn running_twice_gives_identical_results() {
    let img = blob_image(5, 16, 16);
    let colors = pixels_of(&img);
    let params = Params::new().with_k(8).with_iterations(5);
    let first = quantize(&colors, &params).unwrap();
    let second = quantize(&colors, &params).unwrap();
    assert_eq!(first, second);
}

#[test]
fn workgroup_size_does_not_change_the_result() {
    let img = random_image(21, 30, 7);
    let colors = pixels_of(&img);
    let base = Params::new().with_k(5).with_iterations(3);
    let a = quantize(&colors, &base.clone().with_workgroup_size([8, 8])).unwrap();
    let b = quantize(&colors, &base.with_workgroup_size([16, 1])).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unique_colors_match_pixel_mode() {
    // Heavy repetition so the unique set is much smaller than the image.
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let swatches: Vec<[u8; 4]> = (0..20)
        .map(|_| [rng.r#gen(), rng.r#gen(), rng.r#gen(), 255])
        .collect();
    let pixels: Vec<[u8; 4]> = (0..400).map(|_| swatches[rng.gen_range(0..20)]).collect();
    let img = image(20, 20, &pixels);

    let pixel_set = ColorSet::new(&img, AssignMode::Pixels).unwrap();
    let unique_set = ColorSet::new(&img, AssignMode::UniqueColors).unwrap();
    assert!(unique_set.len() <= 20);

    let params = Params::new().with_k(6).with_iterations(4);
    let by_pixel = quantize(&pixel_set, &params).unwrap();
    let by_color = quantize(&unique_set, &params.with_mode(AssignMode::UniqueColors)).unwrap();

    assert_eq!(by_pixel.centroids, by_color.centroids);
    assert_eq!(by_pixel.initial_centroids, by_color.initial_centroids);
    assert_eq!(by_pixel.cubes, by_color.cubes);
    assert_eq!(by_pixel.pixel_clusters(&pixel_set), by_color.pixel_clusters(&unique_set));
    assert_eq!(by_pixel.cluster_sizes(&pixel_set), by_color.cluster_sizes(&unique_set));
}

#[test]
fn more_clusters_than_colors_stay_finite() {
    let pixels = [[0, 0, 0, 255], [255, 255, 255, 255], [128, 0, 0, 255], [0, 0, 0, 255]];
    let img = image(2, 2, &pixels);
    let colors = pixels_of(&img);
    let q = quantize(&colors, &Params::new().with_k(16).with_iterations(5)).unwrap();

    assert_eq!(q.centroids.len(), 16);
    assert_eq!(q.cubes.len(), 16);
    assert!(q.centroids.iter().flatten().all(|v| v.is_finite()));
    assert!(q.initial_centroids.iter().flatten().all(|v| v.is_finite()));
    assert_eq!(q.cluster_sizes(&colors).iter().sum::<u64>(), 4);
}

#[test]
fn single_pixel_image() {
    let img = image(1, 1, &[[77, 88, 99, 255]]);
    let colors = pixels_of(&img);
    let q = quantize(&colors, &Params::new().with_k(3).with_iterations(2)).unwrap();
    assert_eq!(q.assignments.len(), 1);
    assert_eq!(q.centroids[q.assignments[0] as usize], [77.0, 88.0, 99.0]);
}

#[test]
fn invalid_inputs_are_rejected() {
    let img = image(1, 1, &[[0, 0, 0, 255]]);
    let colors = pixels_of(&img);

    assert!(matches!(
        quantize(&colors, &Params::new().with_k(300)),
        Err(QuantizeError::InvalidClusterCount { k: 300, max: 256 })
    ));
    assert!(matches!(
        quantize(&colors, &Params::new().with_workgroup_size([64, 8])),
        Err(QuantizeError::InvalidWorkgroupSize([64, 8]))
    ));
    assert!(matches!(
        SourceImage::from_rgba8(3, 0, &[]),
        Err(QuantizeError::ZeroDimension)
    ));
}

#[test]
fn photo_sized_image_is_shrunk_to_fit_the_moment_bins() {
    let img = RgbaImage::from_pixel(1920, 1080, Rgba([230, 230, 230, 255]));
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let out = quantize_bytes(&mut CpuBackend, &png, &Params::new()).unwrap();

    let decoded = image::load_from_memory(&out.png).unwrap().to_rgba8();
    assert!(decoded.width() < 1920);
    assert_eq!(decoded.get_pixel(0, 0), &Rgba([230, 230, 230, 255]));
    assert_eq!(out.palette[0].hex, "E6E6E6");
    assert!((out.palette[0].percentage - 100.0).abs() < 1e-3);
    assert_eq!(out.quantization.k(), 8);
}

#[test]
fn packed_layout_is_little_endian_rgba() {
    assert_eq!(pack_rgba(1, 2, 3, 4), 0x0403_0201);
}
