//! GPU resources for the sparse-radiance pipeline.
//!
//! The voxel G-buffer is buffer-backed: WGSL exposes atomics on storage
//! buffers but not on storage textures, so each channel is a `res^3` array
//! of packed u32 texels combined with `atomicMax`/`atomicAdd`. The radiance
//! volumes are Rgba16Float 3D textures with a full mip chain.

use crate::error::RenderResult;
use wgpu::*;

/// Dense voxel G-buffer: albedo (RGBA8 + coverage), packed normal, packed
/// emissive and an opacity hit counter. Rebuilt from scratch every frame.
pub struct VoxelGrid {
    pub albedo: Buffer,
    pub normal: Buffer,
    pub emissive: Buffer,
    pub opacity: Buffer,
    pub resolution: u32,
}

impl VoxelGrid {
    pub fn new(device: &Device, resolution: u32) -> Self {
        let size = (resolution as u64).pow(3) * 4;
        let make = |label: &str| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        Self {
            albedo: make("vxgi.grid.albedo"),
            normal: make("vxgi.grid.normal"),
            emissive: make("vxgi.grid.emissive"),
            opacity: make("vxgi.grid.opacity"),
            resolution,
        }
    }

    pub fn texel_count(&self) -> u64 {
        (self.resolution as u64).pow(3)
    }
}

/// HDR radiance volume with a full mip chain and per-mip storage views.
pub struct RadianceVolume {
    pub texture: Texture,
    /// View over the whole chain, for sampled mip selection.
    pub sampled_view: TextureView,
    /// One single-mip storage view per level.
    pub mip_views: Vec<TextureView>,
    pub resolution: u32,
    pub mip_level_count: u32,
}

impl RadianceVolume {
    pub fn new(device: &Device, label: &str, resolution: u32) -> Self {
        let mip_level_count = resolution.trailing_zeros() + 1;
        let texture = device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: resolution,
            },
            mip_level_count,
            sample_count: 1,
            dimension: TextureDimension::D3,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsages::STORAGE_BINDING
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let sampled_view = texture.create_view(&TextureViewDescriptor::default());
        let mip_views = (0..mip_level_count)
            .map(|mip| {
                texture.create_view(&TextureViewDescriptor {
                    label: Some(&format!("{}.mip{}", label, mip)),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        Self {
            texture,
            sampled_view,
            mip_views,
            resolution,
            mip_level_count,
        }
    }

    /// Edge length of the given mip level.
    pub fn mip_resolution(&self, mip: u32) -> u32 {
        (self.resolution >> mip).max(1)
    }
}

/// Full-screen HDR buffers: the raw trace target, the temporal ping-pong
/// pair and the bilateral output. The composed image goes to a
/// caller-provided target.
pub struct ScreenBuffers {
    pub trace: Texture,
    pub trace_view: TextureView,
    pub irradiance: [Texture; 2],
    pub irradiance_views: [TextureView; 2],
    pub bilateral: Texture,
    pub bilateral_view: TextureView,
    pub width: u32,
    pub height: u32,
}

impl ScreenBuffers {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let make = |label: &str| {
            let t = device.create_texture(&TextureDescriptor {
                label: Some(label),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Rgba16Float,
                usage: TextureUsages::STORAGE_BINDING
                    | TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let v = t.create_view(&TextureViewDescriptor::default());
            (t, v)
        };
        let (trace, trace_view) = make("vxgi.screen.trace");
        let (irr0, irr0_view) = make("vxgi.screen.irradiance.0");
        let (irr1, irr1_view) = make("vxgi.screen.irradiance.1");
        let (bilateral, bilateral_view) = make("vxgi.screen.bilateral");
        Self {
            trace,
            trace_view,
            irradiance: [irr0, irr1],
            irradiance_views: [irr0_view, irr1_view],
            bilateral,
            bilateral_view,
            width,
            height,
        }
    }
}

/// Zero-fill kernels; clears are explicit passes in the frame stream so the
/// read-after-write ordering stays visible to the device.
pub struct ClearKit {
    grid_pipeline: ComputePipeline,
    grid_layout: BindGroupLayout,
    volume_pipeline: ComputePipeline,
    volume_layout: BindGroupLayout,
    screen_pipeline: ComputePipeline,
    screen_layout: BindGroupLayout,
}

impl ClearKit {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.clear"),
            source: ShaderSource::Wgsl(include_str!("shaders/clear.wgsl").into()),
        });

        let storage_buffer = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let grid_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.clear.grid.bgl"),
            entries: &[
                storage_buffer(0),
                storage_buffer(1),
                storage_buffer(2),
                storage_buffer(3),
            ],
        });
        let volume_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.clear.volume.bgl"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: TextureFormat::Rgba16Float,
                    view_dimension: TextureViewDimension::D3,
                },
                count: None,
            }],
        });
        let screen_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.clear.screen.bgl"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: TextureFormat::Rgba16Float,
                    view_dimension: TextureViewDimension::D2,
                },
                count: None,
            }],
        });

        let make_pipeline = |layout: &BindGroupLayout, entry: &str, label: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(
                    &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                        label: Some(label),
                        bind_group_layouts: &[layout],
                        push_constant_ranges: &[],
                    }),
                ),
                module: &shader,
                entry_point: entry,
            })
        };

        Ok(Self {
            grid_pipeline: make_pipeline(&grid_layout, "cs_clear_grid", "vxgi.clear.grid"),
            volume_pipeline: make_pipeline(&volume_layout, "cs_clear_volume", "vxgi.clear.volume"),
            screen_pipeline: make_pipeline(&screen_layout, "cs_clear_screen", "vxgi.clear.screen"),
            grid_layout,
            volume_layout,
            screen_layout,
        })
    }

    /// Zero all four voxel G-buffer channels.
    pub fn clear_grid(&self, device: &Device, encoder: &mut CommandEncoder, grid: &VoxelGrid) {
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.clear.grid.bg"),
            layout: &self.grid_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: grid.albedo.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: grid.normal.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: grid.emissive.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: grid.opacity.as_entire_binding(),
                },
            ],
        });
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.clear.grid.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.grid_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let texels = grid.texel_count() as u32;
        pass.dispatch_workgroups((texels + 255) / 256, 1, 1);
    }

    /// Zero mip 0 of a radiance volume.
    pub fn clear_volume_mip0(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        volume: &RadianceVolume,
    ) {
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.clear.volume.bg"),
            layout: &self.volume_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&volume.mip_views[0]),
            }],
        });
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.clear.volume.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.volume_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups = (volume.resolution + 3) / 4;
        pass.dispatch_workgroups(groups, groups, groups);
    }

    /// Zero a full-screen buffer.
    pub fn clear_screen(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        view: &TextureView,
        width: u32,
        height: u32,
    ) {
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.clear.screen.bg"),
            layout: &self.screen_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(view),
            }],
        });
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.clear.screen.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.screen_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
    }
}
