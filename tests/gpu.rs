//! The wgpu session against the CPU kernels. Skipped when the machine has
//! no usable adapter.

use kmeans_palette_wasm::layout::{Axis, LEVELS};
use kmeans_palette_wasm::{AssignMode, Backend, ColorSet, CpuBackend, Cube, GpuContext, Params, SourceImage};
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn gpu() -> Option<GpuContext> {
    match GpuContext::new_blocking() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn image(width: u32, height: u32, pixels: &[[u8; 4]]) -> SourceImage {
    let raw: Vec<u8> = pixels.iter().flatten().copied().collect();
    SourceImage::from_rgba8(width, height, &raw).unwrap()
}

/// Tight blobs around well separated centers.
fn blob_image(seed: u64, width: u32, height: u32) -> SourceImage {
    let centers = [[30, 30, 30], [220, 40, 40], [40, 200, 60], [50, 60, 210], [230, 230, 120]];
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let pixels: Vec<[u8; 4]> = (0..width * height)
        .map(|_| {
            let c: [i32; 3] = centers[rng.gen_range(0..centers.len())];
            let mut jitter = |v: i32| (v + rng.gen_range(-6..=6)).clamp(0, 255) as u8;
            [jitter(c[0]), jitter(c[1]), jitter(c[2]), 255]
        })
        .collect();
    image(width, height, &pixels)
}

fn close(a: &[[f32; 3]], b: &[[f32; 3]], tolerance: f32) -> bool {
    a.len() == b.len()
        && a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .all(|(x, y)| (x - y).abs() <= tolerance)
}

#[test]
fn two_reds_and_two_primaries_on_the_gpu() {
    let Some(mut ctx) = gpu() else { return };
    let img = image(
        2,
        2,
        &[[255, 0, 0, 255], [254, 1, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]],
    );
    let colors = ColorSet::new(&img, AssignMode::Pixels).unwrap();
    let q = ctx
        .quantize(&colors, &Params::new().with_k(2).with_iterations(1))
        .unwrap();

    assert_eq!(
        q.cubes,
        vec![Cube::FULL.with_max(Axis::R, 1), Cube::FULL.with_min(Axis::R, 1)]
    );
    assert_eq!(q.initial_centroids, vec![[3.5, 127.5, 127.5], [251.5, 3.5, 3.5]]);
    assert_eq!(q.assignments, vec![1, 1, 0, 0]);
    assert_eq!(q.centroids, vec![[0.0, 127.5, 127.5], [254.5, 0.5, 0.0]]);
}

#[test]
fn gpu_matches_the_cpu_kernels() {
    let Some(mut ctx) = gpu() else { return };
    let img = blob_image(9, 48, 32);
    let colors = ColorSet::new(&img, AssignMode::Pixels).unwrap();
    let params = Params::new().with_k(5).with_iterations(6);

    let on_gpu = ctx.quantize(&colors, &params).unwrap();
    let on_cpu = CpuBackend.quantize(&colors, &params).unwrap();

    assert_eq!(on_gpu.cubes, on_cpu.cubes);
    assert!(close(&on_gpu.initial_centroids, &on_cpu.initial_centroids, 1e-3));
    assert!(close(&on_gpu.centroids, &on_cpu.centroids, 1e-2));
    assert_eq!(on_gpu.cluster_sizes(&colors), on_cpu.cluster_sizes(&colors));
}

#[test]
fn gpu_cubes_partition_the_grid() {
    let Some(mut ctx) = gpu() else { return };
    let img = blob_image(3, 20, 20);
    let colors = ColorSet::new(&img, AssignMode::Pixels).unwrap();
    for k in [1, 7, 32] {
        let q = ctx
            .quantize(&colors, &Params::new().with_k(k).with_iterations(0))
            .unwrap();
        assert_eq!(q.cubes.len(), k as usize);
        assert_eq!(q.centroids, q.initial_centroids);
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
fn gpu_unique_colors_match_pixel_mode() {
    let Some(mut ctx) = gpu() else { return };
    let img = blob_image(17, 30, 30);
    let pixel_set = ColorSet::new(&img, AssignMode::Pixels).unwrap();
    let unique_set = ColorSet::new(&img, AssignMode::UniqueColors).unwrap();
    let params = Params::new().with_k(6).with_iterations(4).with_workgroup_size([16, 2]);

    let by_pixel = ctx.quantize(&pixel_set, &params).unwrap();
    let by_color = ctx
        .quantize(&unique_set, &params.with_mode(AssignMode::UniqueColors))
        .unwrap();

    assert_eq!(by_pixel.cubes, by_color.cubes);
    assert!(close(&by_pixel.centroids, &by_color.centroids, 1e-2));
    assert_eq!(by_pixel.cluster_sizes(&pixel_set), by_color.cluster_sizes(&unique_set));
}
