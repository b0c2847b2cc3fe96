//! Depth/normal-aware spatial denoise.
//!
//! Averages the temporally filtered irradiance over a square neighborhood,
//! weighting each sample by hard depth and normal edge-stops so light never
//! bleeds across geometric discontinuities. `depth_weight` and
//! `normal_weight` are the CPU reference for the kernel in
//! shaders/bilateral.wgsl; keep the two in sync.

use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::passes::trace::screen_vec;
use wgpu::*;

/// 1 inside the lower threshold, 0 beyond the upper. The depth difference
/// is normalized by the clip range so thresholds are scene independent.
pub fn depth_weight(center: f32, neighbor: f32, near: f32, far: f32, lower: f32, upper: f32) -> f32 {
    let diff = (center - neighbor).abs() * (far - near) / far;
    1.0 - smoothstep(lower, upper, diff)
}

/// Cosine-based normal agreement; drops to 0 once the surfaces diverge past
/// the lower threshold.
pub fn normal_weight(center: [f32; 3], neighbor: [f32; 3], lower: f32, upper: f32) -> f32 {
    let d = center[0] * neighbor[0] + center[1] * neighbor[1] + center[2] * neighbor[2];
    smoothstep(lower, upper, d)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BilateralParamsStd140 {
    screen: [f32; 4],
    filter: [f32; 4],
    thresholds: [f32; 4],
}

pub struct BilateralFilterPass {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params_buffer: Buffer,
}

impl BilateralFilterPass {
    pub fn new(device: &Device) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.bilateral"),
            source: ShaderSource::Wgsl(include_str!("../shaders/bilateral.wgsl").into()),
        });

        let texture_2d = |binding: u32, sample_type: TextureSampleType| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type,
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.bilateral.bgl"),
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
                texture_2d(1, TextureSampleType::Float { filterable: true }),
                texture_2d(2, TextureSampleType::Depth),
                texture_2d(3, TextureSampleType::Float { filterable: true }),
                BindGroupLayoutEntry {
                    binding: 4,
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
            label: Some("vxgi.bilateral.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.bilateral.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &shader,
            entry_point: "cs_bilateral_filter",
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.bilateral.params"),
            size: std::mem::size_of::<BilateralParamsStd140>() as u64,
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
        config: &GiConfig,
        near: f32,
        far: f32,
        indirect: &TextureView,
        scene_depth: &TextureView,
        scene_normal: &TextureView,
        target: &TextureView,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let params = BilateralParamsStd140 {
            screen: screen_vec(width, height),
            filter: [config.bilateral.sample_radius, near, far, 0.0],
            thresholds: [
                config.bilateral.depth_threshold_lower,
                config.bilateral.depth_threshold_upper,
                config.bilateral.normal_threshold_lower,
                config.bilateral.normal_threshold_upper,
            ],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.bilateral.bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(indirect),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(scene_depth),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(scene_normal),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: BindingResource::TextureView(target),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.bilateral.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEAR: f32 = 0.1;
    const FAR: f32 = 100.0;

    #[test]
    fn equal_depths_get_full_weight() {
        let w = depth_weight(0.42, 0.42, NEAR, FAR, 0.1, 0.2);
        assert_eq!(w, 1.0);
    }

    #[test]
    fn depth_weight_is_hard_edge_stop() {
        // Normalized diff below the lower threshold keeps the sample.
        let inside = depth_weight(0.50, 0.55, NEAR, FAR, 0.1, 0.2);
        assert_eq!(inside, 1.0);
        // Beyond the upper threshold the sample is fully rejected.
        let outside = depth_weight(0.1, 0.9, NEAR, FAR, 0.1, 0.2);
        assert_eq!(outside, 0.0);
        // Between the thresholds the weight falls monotonically.
        let mid = depth_weight(0.5, 0.65, NEAR, FAR, 0.1, 0.2);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn aligned_normals_get_full_weight() {
        let n = [0.0, 1.0, 0.0];
        assert_eq!(normal_weight(n, n, 0.7, 1.0), 1.0);
    }

    #[test]
    fn perpendicular_normals_are_rejected() {
        let w = normal_weight([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], 0.7, 1.0);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn normal_weight_ramps_between_thresholds() {
        // dot = cos(30 degrees) ~ 0.866, inside (0.7, 1.0).
        let tilted = [0.5, 0.866_025_4, 0.0];
        let w = normal_weight([0.0, 1.0, 0.0], tilted, 0.7, 1.0);
        assert!(w > 0.0 && w < 1.0);
    }
}
