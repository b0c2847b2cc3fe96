//! Final composition and diagnostic views.
//!
//! Normal path adds the resolved indirect term onto the host's direct
//! lighting. Debug path replaces the output entirely: voxel channels and
//! radiance volumes are ray-marched from the camera, screen intermediates
//! pass through untouched.

use crate::camera::CameraRig;
use crate::config::{DebugView, GiConfig};
use crate::error::RenderResult;
use crate::frame::CameraFrame;
use crate::passes::trace::screen_vec;
use crate::volume::{RadianceVolume, VoxelGrid};
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositeParamsStd140 {
    screen: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DebugParamsStd140 {
    inv_view_proj: [[f32; 4]; 4],
    world_to_voxel: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    screen: [f32; 4],
    mode: [u32; 4],
    march: [f32; 4],
}

pub struct CompositePass {
    combine_pipeline: ComputePipeline,
    combine_layout: BindGroupLayout,
    combine_params: Buffer,
    debug_pipeline: ComputePipeline,
    debug_layout: BindGroupLayout,
    debug_params: Buffer,
    debug_sampler: Sampler,
}

impl CompositePass {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let combine_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.composite"),
            source: ShaderSource::Wgsl(include_str!("../shaders/composite.wgsl").into()),
        });
        let debug_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.debug"),
            source: ShaderSource::Wgsl(include_str!("../shaders/debug.wgsl").into()),
        });

        let uniform_entry = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_2d = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let texture_3d = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D3,
                multisampled: false,
            },
            count: None,
        };
        let storage_buffer = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let storage_2d = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::StorageTexture {
                access: StorageTextureAccess::WriteOnly,
                format: TextureFormat::Rgba16Float,
                view_dimension: TextureViewDimension::D2,
            },
            count: None,
        };

        let combine_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.composite.bgl"),
            entries: &[uniform_entry(0), texture_2d(1), texture_2d(2), storage_2d(3)],
        });
        let debug_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.debug.bgl"),
            entries: &[
                uniform_entry(0),
                storage_buffer(1),
                storage_buffer(2),
                storage_buffer(3),
                storage_buffer(4),
                texture_3d(5),
                texture_3d(6),
                BindGroupLayoutEntry {
                    binding: 7,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                texture_2d(8),
                storage_2d(9),
            ],
        });

        let make_pipeline =
            |layout: &BindGroupLayout, shader: &ShaderModule, entry: &str, label: &str| {
                device.create_compute_pipeline(&ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(
                        &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                            label: Some(label),
                            bind_group_layouts: &[layout],
                            push_constant_ranges: &[],
                        }),
                    ),
                    module: shader,
                    entry_point: entry,
                })
            };

        let combine_params = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.composite.params"),
            size: std::mem::size_of::<CompositeParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let debug_params = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.debug.params"),
            size: std::mem::size_of::<DebugParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let debug_sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("vxgi.debug.sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            ..Default::default()
        });

        Ok(Self {
            combine_pipeline: make_pipeline(
                &combine_layout,
                &combine_shader,
                "cs_combine",
                "vxgi.composite.pipeline",
            ),
            combine_layout,
            combine_params,
            debug_pipeline: make_pipeline(
                &debug_layout,
                &debug_shader,
                "cs_gi_debug",
                "vxgi.debug.pipeline",
            ),
            debug_layout,
            debug_params,
            debug_sampler,
        })
    }

    /// `output = scene_direct + indirect`.
    #[allow(clippy::too_many_arguments)]
    pub fn combine(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        scene_direct: &TextureView,
        indirect: &TextureView,
        target: &TextureView,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let params = CompositeParamsStd140 {
            screen: screen_vec(width, height),
        };
        queue.write_buffer(&self.combine_params, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.composite.bg"),
            layout: &self.combine_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.combine_params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(scene_direct),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(indirect),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(target),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.composite.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.combine_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }

    /// Render the configured debug view into `target`, bypassing composition.
    /// `screen_source` must be the intermediate matching the screen-space
    /// modes; volume modes ignore it.
    #[allow(clippy::too_many_arguments)]
    pub fn debug_view(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        camera: &CameraFrame,
        rig: &CameraRig,
        config: &GiConfig,
        grid: &VoxelGrid,
        direct_volume: &RadianceVolume,
        indirect_volume: &RadianceVolume,
        screen_source: &TextureView,
        target: &TextureView,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let params = DebugParamsStd140 {
            inv_view_proj: camera.view_proj().inverse().to_cols_array_2d(),
            world_to_voxel: rig.world_to_voxel.to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            screen: screen_vec(width, height),
            mode: [
                config.debug.view as u32,
                config
                    .debug
                    .direct_mip_level
                    .min(direct_volume.mip_level_count - 1),
                config
                    .debug
                    .indirect_mip_level
                    .min(indirect_volume.mip_level_count - 1),
                grid.resolution,
            ],
            march: [
                config.debug.ray_step_size,
                config.voxelization.voxel_size,
                config.direct.emissive_multiplier,
                0.0,
            ],
        };
        queue.write_buffer(&self.debug_params, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.debug.bg"),
            layout: &self.debug_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.debug_params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: grid.albedo.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: grid.normal.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: grid.emissive.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: grid.opacity.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::TextureView(&direct_volume.sampled_view),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: BindingResource::TextureView(&indirect_volume.sampled_view),
                },
                BindGroupEntry {
                    binding: 7,
                    resource: BindingResource::Sampler(&self.debug_sampler),
                },
                BindGroupEntry {
                    binding: 8,
                    resource: BindingResource::TextureView(screen_source),
                },
                BindGroupEntry {
                    binding: 9,
                    resource: BindingResource::TextureView(target),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.debug.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.debug_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }

    /// Which screen intermediate a screen-space debug mode shows.
    pub fn debug_screen_source(view: DebugView) -> Option<DebugScreenSource> {
        match view {
            DebugView::ConeTrace => Some(DebugScreenSource::Trace),
            DebugView::TemporalFilter => Some(DebugScreenSource::Temporal),
            DebugView::BilateralFilter => Some(DebugScreenSource::Bilateral),
            _ => None,
        }
    }
}

/// Screen intermediate selected by a debug mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugScreenSource {
    Trace,
    Temporal,
    Bilateral,
}
