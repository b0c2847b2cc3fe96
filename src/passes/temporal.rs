//! Temporal irradiance filter.
//!
//! Blends the current noisy trace with reprojected history, clamped to the
//! scaled AABB of the current 3x3 neighborhood so stale history bleeds away
//! instead of ghosting.

use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::frame::CameraFrame;
use crate::passes::trace::screen_vec;
use glam::Mat4;
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TemporalParamsStd140 {
    inv_view_proj: [[f32; 4]; 4],
    prev_view_proj: [[f32; 4]; 4],
    screen: [f32; 4],
    blend: [f32; 4],
}

pub struct TemporalFilterPass {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params_buffer: Buffer,
    sampler: Sampler,
}

impl TemporalFilterPass {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.temporal"),
            source: ShaderSource::Wgsl(include_str!("../shaders/temporal.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.temporal.bgl"),
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
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 4,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::WriteOnly,
                        format: TextureFormat::Rgba16Float,
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("vxgi.temporal.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.temporal.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &shader,
            entry_point: "cs_temporal_filter",
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.temporal.params"),
            size: std::mem::size_of::<TemporalParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("vxgi.temporal.sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            params_buffer,
            sampler,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        camera: &CameraFrame,
        prev_view_proj: Mat4,
        config: &GiConfig,
        current: &TextureView,
        history: &TextureView,
        scene_depth: &TextureView,
        target: &TextureView,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let params = TemporalParamsStd140 {
            inv_view_proj: camera.view_proj().inverse().to_cols_array_2d(),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
            screen: screen_vec(width, height),
            blend: [
                config.temporal.blend_alpha,
                config.temporal.clamp_aabb_scale,
                0.0,
                0.0,
            ],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.temporal.bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(current),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(history),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(scene_depth),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::TextureView(target),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.temporal.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }
}

/// CPU reference for the history clamp box. The neighborhood AABB `[lo, hi]`
/// is scaled about a center that slides from the AABB midpoint toward the
/// current sample as `scale` drops below one, so the current sample is
/// always inside the box.
pub fn clamp_bounds(lo: f32, hi: f32, current: f32, scale: f32) -> (f32, f32) {
    let scale = scale.max(0.0);
    let t = scale.min(1.0);
    let center = current + (((lo + hi) * 0.5) - current) * t;
    let extent = (hi - lo) * 0.5 * scale;
    (center - extent, center + extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scale_reproduces_the_neighborhood_box() {
        let (lo, hi) = clamp_bounds(0.2, 0.8, 0.5, 1.0);
        assert!((lo - 0.2).abs() < 1e-6);
        assert!((hi - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_scale_collapses_onto_the_current_sample() {
        // The current sample sits off-center in the neighborhood box.
        let (lo, hi) = clamp_bounds(0.0, 1.0, 0.9, 0.0);
        assert!((lo - 0.9).abs() < 1e-6);
        assert!((hi - 0.9).abs() < 1e-6);
    }

    #[test]
    fn current_sample_is_never_clamped_out() {
        let current = 0.05;
        for scale in [0.0, 0.1, 0.25, 0.5, 0.75, 1.0, 1.2, 2.0] {
            let (lo, hi) = clamp_bounds(0.0, 1.0, current, scale);
            assert!(
                lo <= current + 1e-6 && current <= hi + 1e-6,
                "scale {} excludes the current sample: [{}, {}]",
                scale,
                lo,
                hi
            );
        }
    }

    #[test]
    fn larger_scale_widens_the_box() {
        let (lo_a, hi_a) = clamp_bounds(0.2, 0.8, 0.5, 1.0);
        let (lo_b, hi_b) = clamp_bounds(0.2, 0.8, 0.5, 1.2);
        assert!(lo_b < lo_a);
        assert!(hi_b > hi_a);
    }
}
