//! One quantization session on the GPU: buffer setup, the ordered pass
//! sequence in a single command buffer, and readback of the results.

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::backend::{Backend, Quantization};
use crate::error::QuantizeError;
use crate::gpu::{CUT_WORKGROUP, GpuContext, LINEAR_WORKGROUP, dispatch, linear_dispatch, read_back};
use crate::layout::{AssignExtent, BestCut, Centroid, Cube, MomentBin, SIDE_LENGTH, TOTAL_SIZE};
use crate::params::Params;
use crate::source::ColorSet;

const WORD: u64 = 4;

fn size_of<T>(count: u64) -> u64 {
    count * std::mem::size_of::<T>() as u64
}

/// Every device buffer of one session, with the usages its passes need.
struct SessionBuffers {
    colors: wgpu::Buffer,
    weights: wgpu::Buffer,
    moments: wgpu::Buffer,
    cubes: wgpu::Buffer,
    parents: wgpu::Buffer,
    variances: wgpu::Buffer,
    counter: wgpu::Buffer,
    total_cubes: wgpu::Buffer,
    cut_r: wgpu::Buffer,
    cut_g: wgpu::Buffer,
    cut_b: wgpu::Buffer,
    best_cut: wgpu::Buffer,
    centroids: wgpu::Buffer,
    assignments: wgpu::Buffer,
    extent: wgpu::Buffer,
    initial_readback: wgpu::Buffer,
    cubes_readback: wgpu::Buffer,
    render_centroids: wgpu::Buffer,
    render_assignments: wgpu::Buffer,
}

impl SessionBuffers {
    fn create(device: &wgpu::Device, colors: &ColorSet, k: u32, extent: &AssignExtent) -> Self {
        use wgpu::BufferUsages as U;

        let empty = |label: &str, size: u64, usage: U| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };
        let init = |label: &str, contents: &[u8], usage: U| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
        };

        let entries = colors.len() as u64;
        let slots = u64::from(k);
        let mut cubes = vec![Cube::default(); k as usize];
        cubes[0] = Cube::FULL;
        let parents = vec![Cube::FULL; k as usize];
        let cut_bytes = SIDE_LENGTH as u64 * WORD;
        let readback = U::COPY_DST | U::MAP_READ;

        Self {
            colors: init("colors", bytemuck::cast_slice(colors.colors()), U::STORAGE | U::COPY_DST),
            weights: init("weights", bytemuck::cast_slice(colors.weights()), U::STORAGE | U::COPY_DST),
            moments: empty("moments", size_of::<MomentBin>(TOTAL_SIZE as u64), U::STORAGE | U::COPY_DST),
            cubes: init(
                "cubes",
                bytemuck::cast_slice(&cubes),
                U::STORAGE | U::COPY_DST | U::COPY_SRC,
            ),
            parents: init("parents", bytemuck::cast_slice(&parents), U::STORAGE | U::COPY_DST),
            variances: empty("variances", slots * WORD, U::STORAGE),
            counter: init("cube_counter", bytemuck::bytes_of(&0u32), U::STORAGE | U::COPY_DST),
            total_cubes: init("total_cubes", bytemuck::bytes_of(&k), U::UNIFORM | U::COPY_DST),
            cut_r: empty("cut_variances_r", cut_bytes, U::STORAGE),
            cut_g: empty("cut_variances_g", cut_bytes, U::STORAGE),
            cut_b: empty("cut_variances_b", cut_bytes, U::STORAGE),
            best_cut: empty("best_cut", size_of::<BestCut>(1), U::STORAGE),
            centroids: empty("centroids", size_of::<Centroid>(slots), U::STORAGE | U::COPY_SRC),
            assignments: empty("assignments", entries * WORD, U::STORAGE | U::COPY_SRC),
            extent: init("assign_extent", bytemuck::bytes_of(extent), U::UNIFORM | U::COPY_DST),
            initial_readback: empty("initial_centroids", size_of::<Centroid>(slots), readback),
            cubes_readback: empty("final_cubes", size_of::<Cube>(slots), readback),
            render_centroids: empty("render_centroids", size_of::<Centroid>(slots), readback),
            render_assignments: empty("render_assignments", entries * WORD, readback),
        }
    }
}

/// Grid and workgroup shape of the assign kernel for one color set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AssignLayout {
    workgroup_size: [u32; 2],
    extent: AssignExtent,
    workgroups: [u32; 3],
}

impl AssignLayout {
    /// Pixels use the image plane with the configured workgroup; unique
    /// colors, and planes too large to dispatch, use one folded line of
    /// `x*y` invocations per group.
    fn new(colors: &ColorSet, params: &Params, max_workgroups: u32) -> Self {
        let [width, height, _] = colors.extent();
        let [x, y] = params.workgroup_size;
        let count = colors.len() as u32;
        let plane = [width.div_ceil(x), height.div_ceil(y), 1];
        if height > 1 && plane[0] <= max_workgroups && plane[1] <= max_workgroups {
            return Self {
                workgroup_size: [x, y],
                extent: AssignExtent { width, height, count, linear: 0 },
                workgroups: plane,
            };
        }
        let invocations = params.invocations();
        Self {
            workgroup_size: [invocations, 1],
            extent: AssignExtent { width, height, count, linear: 1 },
            workgroups: linear_dispatch(count, invocations, max_workgroups),
        }
    }
}

/// Borrows the context for the duration of one image.
pub struct Session<'a> {
    ctx: &'a mut GpuContext,
    colors: &'a ColorSet,
    params: Params,
    assign: AssignLayout,
}

impl<'a> Session<'a> {
    pub fn new(ctx: &'a mut GpuContext, colors: &'a ColorSet, params: &Params) -> Result<Self, QuantizeError> {
        params.validate()?;
        if colors.is_empty() {
            return Err(QuantizeError::ZeroDimension);
        }
        let assign = AssignLayout::new(colors, params, ctx.max_workgroups());
        Ok(Self {
            ctx,
            colors,
            params: params.clone(),
            assign,
        })
    }

    /// Records every pass for the image, submits them as one command buffer
    /// and reads the render-visible copies back. The buffers are dropped
    /// with the session.
    pub async fn run(self) -> Result<Quantization, QuantizeError> {
        let Session { ctx, colors, params, assign } = self;
        let max_workgroups = ctx.max_workgroups();

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let assign_kernel = ctx.assign.get_or_compile(&ctx.device, assign.workgroup_size);
        let device = &ctx.device;
        let kernels = &ctx.kernels;
        let b = SessionBuffers::create(device, colors, params.k, &assign.extent);
        debug!(
            entries = colors.len(),
            k = params.k,
            mode = ?colors.mode(),
            workgroups = ?assign.workgroups,
            "session buffers ready"
        );

        let accumulate = kernels.accumulate.bind(device, "accumulate", &[&b.colors, &b.weights, &b.moments]);
        let prefix_b = kernels.prefix_b.bind(device, "prefix_b", &[&b.moments]);
        let prefix_g = kernels.prefix_g.bind(device, "prefix_g", &[&b.moments]);
        let prefix_r = kernels.prefix_r.bind(device, "prefix_r", &[&b.moments]);
        let cube_variance = kernels.cube_variance.bind(
            device,
            "cube_variance",
            &[&b.moments, &b.cubes, &b.counter, &b.total_cubes, &b.variances],
        );
        let cut_variance = kernels.cut_variance.bind(
            device,
            "cut_variance",
            &[&b.moments, &b.cubes, &b.variances, &b.cut_r, &b.cut_g, &b.cut_b],
        );
        let best_cut = kernels
            .best_cut
            .bind(device, "best_cut", &[&b.cut_r, &b.cut_g, &b.cut_b, &b.best_cut]);
        let split = kernels.split.bind(
            device,
            "split",
            &[&b.variances, &b.best_cut, &b.total_cubes, &b.cubes, &b.parents, &b.counter],
        );
        let centroid_init = kernels.centroid_init.bind(
            device,
            "centroid_init",
            &[&b.moments, &b.cubes, &b.parents, &b.centroids],
        );
        let assign_group = assign_kernel.bind(
            device,
            "assign",
            &[&b.colors, &b.centroids, &b.extent, &b.assignments],
        );
        let update = kernels
            .update
            .bind(device, "update", &[&b.colors, &b.weights, &b.assignments, &b.centroids]);

        let k = params.k;
        let entries = colors.len() as u32;
        let slots = linear_dispatch(k, LINEAR_WORKGROUP, max_workgroups);
        let lines = linear_dispatch((SIDE_LENGTH * SIDE_LENGTH) as u32, LINEAR_WORKGROUP, max_workgroups);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("quantize"),
        });

        // ------------------------------------------------------------
        // Histogram
        // ------------------------------------------------------------
        dispatch(
            &mut encoder,
            "accumulate",
            &kernels.accumulate,
            &accumulate,
            linear_dispatch(entries, LINEAR_WORKGROUP, max_workgroups),
        );
        dispatch(&mut encoder, "prefix_b", &kernels.prefix_b, &prefix_b, lines);
        dispatch(&mut encoder, "prefix_g", &kernels.prefix_g, &prefix_g, lines);
        dispatch(&mut encoder, "prefix_r", &kernels.prefix_r, &prefix_r, lines);

        // ------------------------------------------------------------
        // Box split
        // ------------------------------------------------------------
        let cuts = [SIDE_LENGTH as u32 / CUT_WORKGROUP, 3, 1];
        for _ in 1..k {
            dispatch(&mut encoder, "cube_variance", &kernels.cube_variance, &cube_variance, slots);
            dispatch(&mut encoder, "cut_variance", &kernels.cut_variance, &cut_variance, cuts);
            dispatch(&mut encoder, "best_cut", &kernels.best_cut, &best_cut, [1, 1, 1]);
            dispatch(&mut encoder, "split", &kernels.split, &split, [1, 1, 1]);
        }
        dispatch(&mut encoder, "centroid_init", &kernels.centroid_init, &centroid_init, slots);
        encoder.copy_buffer_to_buffer(&b.centroids, 0, &b.initial_readback, 0, size_of::<Centroid>(k.into()));
        encoder.copy_buffer_to_buffer(&b.cubes, 0, &b.cubes_readback, 0, size_of::<Cube>(k.into()));

        // ------------------------------------------------------------
        // Refinement
        // ------------------------------------------------------------
        let rounds = params.iterations.max(1);
        for _ in 0..rounds {
            dispatch(&mut encoder, "assign", assign_kernel, &assign_group, assign.workgroups);
            if params.iterations > 0 {
                dispatch(&mut encoder, "update", &kernels.update, &update, [k, 1, 1]);
            }
        }
        encoder.copy_buffer_to_buffer(&b.assignments, 0, &b.render_assignments, 0, u64::from(entries) * WORD);
        encoder.copy_buffer_to_buffer(&b.centroids, 0, &b.render_centroids, 0, size_of::<Centroid>(k.into()));

        ctx.queue.submit(Some(encoder.finish()));

        if let Some(error) = device.pop_error_scope().await {
            return Err(QuantizeError::Gpu(error.to_string()));
        }
        if let Some(error) = device.pop_error_scope().await {
            return Err(QuantizeError::Gpu(error.to_string()));
        }

        let quantization = Quantization {
            centroids: read_back(device, &b.render_centroids).await?,
            assignments: read_back(device, &b.render_assignments).await?,
            initial_centroids: read_back(device, &b.initial_readback).await?,
            cubes: read_back(device, &b.cubes_readback).await?,
        };
        info!(
            backend = "gpu",
            k,
            iterations = params.iterations,
            entries,
            adapter = %ctx.adapter_name(),
            "quantization finished"
        );
        Ok(quantization)
    }
}

impl GpuContext {
    /// Runs a full session for `colors`.
    pub async fn quantize_async(&mut self, colors: &ColorSet, params: &Params) -> Result<Quantization, QuantizeError> {
        Session::new(self, colors, params)?.run().await
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Backend for GpuContext {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn quantize(&mut self, colors: &ColorSet, params: &Params) -> Result<Quantization, QuantizeError> {
        pollster::block_on(self.quantize_async(colors, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::AssignMode;
    use crate::source::SourceImage;

    fn colors(width: u32, height: u32, mode: AssignMode) -> ColorSet {
        let raw: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i * 7) as u8, (i * 3) as u8, 40, 255])
            .collect();
        let img = SourceImage::from_rgba8(width, height, &raw).unwrap();
        ColorSet::new(&img, mode).unwrap()
    }

    #[test]
    fn test_pixels_use_the_image_plane() {
        let set = colors(20, 10, AssignMode::Pixels);
        let layout = AssignLayout::new(&set, &Params::new().with_workgroup_size([8, 4]), 65_535);
        assert_eq!(layout.workgroup_size, [8, 4]);
        assert_eq!(layout.workgroups, [3, 3, 1]);
        assert_eq!(layout.extent.linear, 0);
        assert_eq!(layout.extent.count, 200);
    }

    #[test]
    fn test_unique_colors_use_a_folded_line() {
        let set = colors(20, 10, AssignMode::UniqueColors);
        let params = Params::new().with_workgroup_size([4, 4]);
        let layout = AssignLayout::new(&set, &params, 65_535);
        assert_eq!(layout.workgroup_size, [params.invocations(), 1]);
        assert_eq!(layout.extent.linear, 1);
        let [x, y, _] = layout.workgroups;
        assert!(u64::from(x * y) * 16 >= set.len() as u64);
    }

    #[test]
    fn test_oversized_plane_falls_back_to_a_line() {
        let set = colors(40, 2, AssignMode::Pixels);
        let layout = AssignLayout::new(&set, &Params::new().with_workgroup_size([1, 1]), 16);
        assert_eq!(layout.extent.linear, 1);
        assert_eq!(layout.workgroups, [16, 5, 1]);
    }
}
