//! wgpu device, queue and the compiled quantization kernels.
//!
//! Every kernel is a WGSL module assembled from the shared sources in
//! `src/shaders/` and bound through an explicit bind group layout whose
//! entries follow the buffer contracts of [`crate::session`].

use std::borrow::Cow;

use bytemuck::Pod;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::QuantizeError;

const COMMON: &str = include_str!("shaders/common.wgsl");
const MOMENTS: &str = include_str!("shaders/moments.wgsl");
const SELECT: &str = include_str!("shaders/select.wgsl");
const ACCUMULATE: &str = include_str!("shaders/accumulate.wgsl");
const PREFIX_SUM: &str = include_str!("shaders/prefix_sum.wgsl");
const CUBE_VARIANCE: &str = include_str!("shaders/cube_variance.wgsl");
const CUT_VARIANCE: &str = include_str!("shaders/cut_variance.wgsl");
const BEST_CUT: &str = include_str!("shaders/best_cut.wgsl");
const SPLIT: &str = include_str!("shaders/split.wgsl");
const CENTROID_INIT: &str = include_str!("shaders/centroid_init.wgsl");
const ASSIGN: &str = include_str!("shaders/assign.wgsl");
const UPDATE: &str = include_str!("shaders/update.wgsl");

/// Workgroup width of every one-dimensional kernel except update.
pub const LINEAR_WORKGROUP: u32 = 64;
/// Cut positions scored per axis by one workgroup.
pub const CUT_WORKGROUP: u32 = 33;

/// How a kernel sees one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
    Uniform,
}

/// A compute pipeline together with the layout its bind groups must use.
pub struct Kernel {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        label: &str,
        source: String,
        entry_point: &str,
        bindings: &[Access],
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });
        Self::with_module(device, label, &module, entry_point, bindings)
    }

    fn with_module(
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        entry_point: &str,
        bindings: &[Access],
    ) -> Self {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
            .iter()
            .enumerate()
            .map(|(binding, access)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match access {
                        Access::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Access::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                        Access::Uniform => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        Self { pipeline, layout }
    }

    /// Bind group with `buffers` at bindings `0..n`, in layout order.
    pub fn bind(&self, device: &wgpu::Device, label: &str, buffers: &[&wgpu::Buffer]) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &entries,
        })
    }
}

/// Fixed kernels, compiled once per context.
pub struct Kernels {
    pub accumulate: Kernel,
    pub prefix_b: Kernel,
    pub prefix_g: Kernel,
    pub prefix_r: Kernel,
    pub cube_variance: Kernel,
    pub cut_variance: Kernel,
    pub best_cut: Kernel,
    pub split: Kernel,
    pub centroid_init: Kernel,
    pub update: Kernel,
}

impl Kernels {
    fn new(device: &wgpu::Device) -> Self {
        use Access::{Read, ReadWrite, Uniform};

        let prefix = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prefix_sum"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned([COMMON, PREFIX_SUM].concat())),
        });
        Self {
            accumulate: Kernel::new(
                device,
                "accumulate",
                [COMMON, ACCUMULATE].concat(),
                "main",
                &[Read, Read, ReadWrite],
            ),
            prefix_b: Kernel::with_module(device, "prefix_b", &prefix, "along_b", &[ReadWrite]),
            prefix_g: Kernel::with_module(device, "prefix_g", &prefix, "along_g", &[ReadWrite]),
            prefix_r: Kernel::with_module(device, "prefix_r", &prefix, "along_r", &[ReadWrite]),
            cube_variance: Kernel::new(
                device,
                "cube_variance",
                [COMMON, MOMENTS, CUBE_VARIANCE].concat(),
                "main",
                &[Read, Read, Read, Uniform, ReadWrite],
            ),
            cut_variance: Kernel::new(
                device,
                "cut_variance",
                [COMMON, MOMENTS, SELECT, CUT_VARIANCE].concat(),
                "main",
                &[Read, Read, Read, ReadWrite, ReadWrite, ReadWrite],
            ),
            best_cut: Kernel::new(
                device,
                "best_cut",
                [COMMON, BEST_CUT].concat(),
                "main",
                &[Read, Read, Read, ReadWrite],
            ),
            split: Kernel::new(
                device,
                "split",
                [COMMON, SELECT, SPLIT].concat(),
                "main",
                &[Read, Read, Uniform, ReadWrite, ReadWrite, ReadWrite],
            ),
            centroid_init: Kernel::new(
                device,
                "centroid_init",
                [COMMON, MOMENTS, CENTROID_INIT].concat(),
                "main",
                &[Read, Read, Read, ReadWrite],
            ),
            update: Kernel::new(
                device,
                "update",
                [COMMON, UPDATE].concat(),
                "main",
                &[Read, Read, Read, ReadWrite],
            ),
        }
    }
}

/// Device, queue and kernels shared by every session.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub kernels: Kernels,
    pub assign: AssignKernels,
    max_workgroups: u32,
    adapter_name: String,
}

impl GpuContext {
    /// Opens the default adapter and compiles the fixed kernels.
    pub async fn new() -> Result<Self, QuantizeError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| QuantizeError::NoAdapter(e.to_string()))?;
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kmeans_palette"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(|e| QuantizeError::NoAdapter(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let kernels = Kernels::new(&device);
        if let Some(error) = device.pop_error_scope().await {
            return Err(QuantizeError::Gpu(error.to_string()));
        }

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "gpu context ready"
        );
        let max_workgroups = device.limits().max_compute_workgroups_per_dimension;
        Ok(Self {
            device,
            queue,
            kernels,
            assign: AssignKernels::default(),
            max_workgroups,
            adapter_name: adapter_info.name,
        })
    }

    /// Blocking [`GpuContext::new`] for native callers.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new_blocking() -> Result<Self, QuantizeError> {
        pollster::block_on(Self::new())
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn max_workgroups(&self) -> u32 {
        self.max_workgroups
    }
}

/// Assign kernels keyed by workgroup size, which is baked into the WGSL.
#[derive(Default)]
pub struct AssignKernels(FxHashMap<[u32; 2], Kernel>);

impl AssignKernels {
    /// Kernel for `workgroup_size`, compiled on first use.
    pub fn get_or_compile(&mut self, device: &wgpu::Device, workgroup_size: [u32; 2]) -> &Kernel {
        self.0.entry(workgroup_size).or_insert_with(|| {
            let [x, y] = workgroup_size;
            debug!(x, y, "compiling assign kernel");
            let source = format!("const WG_X: u32 = {x}u;\nconst WG_Y: u32 = {y}u;\n{COMMON}{ASSIGN}");
            Kernel::new(
                device,
                "assign",
                source,
                "main",
                &[Access::Read, Access::Read, Access::Uniform, Access::ReadWrite],
            )
        })
    }
}

/// Workgroup counts covering `count` invocations of `workgroup` width,
/// folded into y once x reaches the per-dimension limit.
pub fn linear_dispatch(count: u32, workgroup: u32, max_workgroups: u32) -> [u32; 3] {
    let groups = count.div_ceil(workgroup.max(1)).max(1);
    let x = groups.min(max_workgroups.max(1));
    [x, groups.div_ceil(x), 1]
}

/// Records one compute pass with a single dispatch.
pub fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    kernel: &Kernel,
    bind_group: &wgpu::BindGroup,
    workgroups: [u32; 3],
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(&kernel.pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
}

/// Maps a `MAP_READ` buffer and copies its contents out.
pub async fn read_back<T: Pod>(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<T>, QuantizeError> {
    let slice = buffer.slice(..);
    let (tx, rx) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| QuantizeError::Gpu(e.to_string()))?;
    rx.await.map_err(|_| QuantizeError::ReadbackCanceled)??;

    let values = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    buffer.unmap();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_dispatch_covers_count() {
        assert_eq!(linear_dispatch(1, 64, 65_535), [1, 1, 1]);
        assert_eq!(linear_dispatch(65, 64, 65_535), [2, 1, 1]);
        assert_eq!(linear_dispatch(4096 * 64, 64, 65_535), [4096, 1, 1]);
    }

    #[test]
    fn test_linear_dispatch_folds_past_the_limit() {
        let [x, y, z] = linear_dispatch(100_000 * 64, 64, 65_535);
        assert_eq!((x, z), (65_535, 1));
        assert!(u64::from(x) * u64::from(y) >= 100_000);
    }

    #[test]
    fn test_sentinel_matches_the_shader_literal() {
        assert!(COMMON.contains("const UNSPLITTABLE: f32 = -3.4e38;"));
        assert_eq!(crate::kernels::box_split::UNSPLITTABLE, -3.4e38_f32);
    }

    #[test]
    fn test_shaders_share_the_bin_layout() {
        assert!(COMMON.contains("const SIDE: u32 = 33u;"));
        assert!(ACCUMULATE.contains("* 5u"));
    }
}
