//! Direct radiance injection.
//!
//! Converts the voxel G-buffer into lit radiance at mip 0 of the primary
//! volume: sun NdotL with a shadow-map visibility test, plus unattenuated
//! emissive. Runs over the whole grid each frame after voxelization.

use crate::camera::CameraRig;
use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::volume::{RadianceVolume, VoxelGrid};
use glam::{Mat4, Vec3};
use wgpu::*;

#[derive(Debug, Clone, Copy)]
pub struct DirectParams {
    pub voxel_to_world: Mat4,
    pub world_to_shadow: Mat4,
    pub sun_direction: Vec3,
    pub sun_color: Vec3,
    pub sun_intensity: f32,
    pub intensity_multiplier: f32,
    pub emissive_multiplier: f32,
    pub voxel_size: f32,
    pub sun_bias: f32,
    pub normal_bias: f32,
    pub resolution: u32,
    pub shadow_resolution: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DirectParamsStd140 {
    voxel_to_world: [[f32; 4]; 4],
    world_to_shadow: [[f32; 4]; 4],
    sun_direction: [f32; 4],
    sun_color: [f32; 4],
    intensity: [f32; 4],
    bias: [f32; 4],
    resolution: u32,
    shadow_resolution: u32,
    _pad0: u32,
    _pad1: u32,
}

impl From<DirectParams> for DirectParamsStd140 {
    fn from(p: DirectParams) -> Self {
        Self {
            voxel_to_world: p.voxel_to_world.to_cols_array_2d(),
            world_to_shadow: p.world_to_shadow.to_cols_array_2d(),
            sun_direction: p.sun_direction.normalize_or_zero().extend(0.0).to_array(),
            sun_color: p.sun_color.extend(1.0).to_array(),
            intensity: [
                p.sun_intensity,
                p.intensity_multiplier,
                p.emissive_multiplier,
                p.voxel_size,
            ],
            bias: [p.sun_bias, p.normal_bias, 0.0, 0.0],
            resolution: p.resolution,
            shadow_resolution: p.shadow_resolution,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

pub struct DirectLightingPass {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params_buffer: Buffer,
}

impl DirectLightingPass {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.direct"),
            source: ShaderSource::Wgsl(include_str!("../shaders/direct_lighting.wgsl").into()),
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
            label: Some("vxgi.direct.bgl"),
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
                storage_buffer(4),
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
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
            label: Some("vxgi.direct.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.direct.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &shader,
            entry_point: "cs_direct_lighting",
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.direct.params"),
            size: std::mem::size_of::<DirectParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            params_buffer,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        rig: &CameraRig,
        config: &GiConfig,
        grid: &VoxelGrid,
        shadow_map: &TextureView,
        target: &RadianceVolume,
    ) -> RenderResult<()> {
        let params = DirectParams {
            voxel_to_world: rig.voxel_to_world,
            world_to_shadow: rig.shadow_view_proj,
            sun_direction: config.direct.sun.direction,
            sun_color: config.direct.sun.color,
            sun_intensity: config.direct.sun.intensity,
            intensity_multiplier: config.direct.light_intensity_multiplier,
            emissive_multiplier: config.direct.emissive_multiplier,
            voxel_size: config.voxelization.voxel_size,
            sun_bias: config.direct.shadow_sun_bias,
            normal_bias: config.direct.shadow_normal_bias,
            resolution: grid.resolution,
            shadow_resolution: config.voxelization.shadow_map_resolution,
        };
        queue.write_buffer(
            &self.params_buffer,
            0,
            bytemuck::bytes_of(&DirectParamsStd140::from(params)),
        );

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.direct.bg"),
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
                    resource: grid.emissive.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: grid.opacity.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::TextureView(shadow_map),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: BindingResource::TextureView(&target.mip_views[0]),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.direct.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups = (grid.resolution + 3) / 4;
        pass.dispatch_workgroups(groups, groups, groups);
        Ok(())
    }
}

/// CPU reference for the shadow map texel lookup. `uv` in [0, 1] maps to
/// texel indices [0, resolution - 1]; the closed upper edge lands on the
/// last texel instead of one past it.
pub fn shadow_texel(uv: f32, resolution: u32) -> u32 {
    ((uv * resolution as f32) as u32).min(resolution - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_texel_covers_the_closed_uv_range() {
        assert_eq!(shadow_texel(0.0, 128), 0);
        assert_eq!(shadow_texel(0.5, 128), 64);
        assert_eq!(shadow_texel(1.0, 128), 127);
    }

    #[test]
    fn shadow_texel_stays_in_bounds_near_the_edge() {
        let res = 256;
        for uv in [0.999, 0.9999, 1.0] {
            assert!(shadow_texel(uv, res) < res);
        }
    }
}
