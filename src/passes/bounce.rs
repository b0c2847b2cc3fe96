//! Second-bounce injection.
//!
//! For every occupied voxel, gathers one bounce of light by firing a short
//! hemisphere of voxel cones through the already-lit primary volume, and
//! writes `direct + bounce` style radiance into mip 0 of the indirect
//! volume. Optional; when disabled the screen trace samples the primary
//! volume directly.

use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::volume::{RadianceVolume, VoxelGrid};
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct IndirectParamsStd140 {
    steps: [u32; 4],
    march: [f32; 4],
    cone: [f32; 4],
}

pub struct IndirectLightingPass {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params_buffer: Buffer,
    sampler: Sampler,
}

impl IndirectLightingPass {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.bounce"),
            source: ShaderSource::Wgsl(include_str!("../shaders/indirect_lighting.wgsl").into()),
        });

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

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.bounce.bgl"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_buffer(1),
                storage_buffer(2),
                storage_buffer(3),
                BindGroupLayoutEntry {
                    binding: 4,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 6,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::WriteOnly,
                        format: TextureFormat::Rgba16Float,
                        view_dimension: TextureViewDimension::D3,
                    },
                    count: None,
                },
            ],
        });

        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("vxgi.bounce.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.bounce.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &shader,
            entry_point: "cs_indirect_lighting",
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.bounce.params"),
            size: std::mem::size_of::<IndirectParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("vxgi.bounce.sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            params_buffer,
            sampler,
        })
    }

    pub fn execute(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        config: &GiConfig,
        grid: &VoxelGrid,
        lit_volume: &RadianceVolume,
        target: &RadianceVolume,
    ) -> RenderResult<()> {
        let half_angle = 0.5 * config.indirect.cone_angle.to_radians();
        let params = IndirectParamsStd140 {
            steps: [
                config.indirect.max_steps,
                config.indirect.min_mip_level,
                lit_volume.mip_level_count,
                grid.resolution,
            ],
            march: [
                config.indirect.alpha_attenuation,
                config.indirect.scale,
                config.indirect.first_step,
                config.indirect.step_scale,
            ],
            cone: [half_angle.tan(), config.voxelization.voxel_size, 0.0, 0.0],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.bounce.bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
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
                    resource: grid.opacity.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: BindingResource::TextureView(&lit_volume.sampled_view),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: BindingResource::TextureView(&target.mip_views[0]),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.bounce.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups = (grid.resolution + 3) / 4;
        pass.dispatch_workgroups(groups, groups, groups);
        Ok(())
    }
}
