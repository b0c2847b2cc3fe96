//! Per-pixel screen-space diffuse cone trace.
//!
//! One cone per pixel through the resolved radiance volume, launched from
//! the reconstructed surface point and tilted per pixel and per frame by
//! blue noise plus a halton offset. Deliberately noisy; the temporal filter
//! integrates the estimate over frames.

use crate::camera::CameraRig;
use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::frame::CameraFrame;
use crate::volume::RadianceVolume;
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TraceParamsStd140 {
    inv_view_proj: [[f32; 4]; 4],
    world_to_voxel: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    screen: [f32; 4],
    noise: [f32; 4],
    noise_scale: [f32; 4],
    steps: [u32; 4],
    march: [f32; 4],
    cone: [f32; 4],
}

/// External blue-noise texture plus its tile size in texels.
pub struct BlueNoise<'a> {
    pub view: &'a TextureView,
    pub size: [u32; 2],
}

const FALLBACK_NOISE_SIZE: u32 = 64;

pub struct ScreenTracePass {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    params_buffer: Buffer,
    sampler: Sampler,
    fallback_noise: TextureView,
}

impl ScreenTracePass {
    pub fn new(device: &Device, queue: &Queue) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.trace"),
            source: ShaderSource::Wgsl(include_str!("../shaders/cone_trace.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.trace.bgl"),
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
                        sample_type: TextureSampleType::Depth,
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
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D3,
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
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
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
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("vxgi.trace.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.trace.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &shader,
            entry_point: "cs_cone_trace",
        });

        let params_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.trace.params"),
            size: std::mem::size_of::<TraceParamsStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("vxgi.trace.sampler"),
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
            fallback_noise: fallback_noise_texture(device, queue),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        camera: &CameraFrame,
        rig: &CameraRig,
        config: &GiConfig,
        halton_offset: [f32; 2],
        jitter_enabled: bool,
        scene_depth: &TextureView,
        scene_normal: &TextureView,
        radiance: &RadianceVolume,
        blue_noise: Option<BlueNoise<'_>>,
        target: &TextureView,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let inv_view_proj = camera.view_proj().inverse();
        let (noise_view, noise_size) = match &blue_noise {
            Some(noise) => (noise.view, noise.size),
            None => (&self.fallback_noise, [FALLBACK_NOISE_SIZE; 2]),
        };

        let half_angle = 0.5 * config.cone_trace.cone_angle.to_radians();
        let params = TraceParamsStd140 {
            inv_view_proj: inv_view_proj.to_cols_array_2d(),
            world_to_voxel: rig.world_to_voxel.to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            screen: screen_vec(width, height),
            noise: [
                noise_size[0] as f32,
                noise_size[1] as f32,
                halton_offset[0],
                halton_offset[1],
            ],
            noise_scale: [
                config.temporal.blue_noise_scale[0],
                config.temporal.blue_noise_scale[1],
                if jitter_enabled { 1.0 } else { 0.0 },
                config.voxelization.voxel_size,
            ],
            steps: [
                config.cone_trace.max_steps,
                radiance.mip_level_count,
                radiance.resolution,
                0,
            ],
            march: [
                config.cone_trace.alpha_attenuation,
                config.cone_trace.scale,
                config.cone_trace.first_step,
                config.cone_trace.step_scale,
            ],
            cone: [half_angle.tan(), 0.0, 0.0, 0.0],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.trace.bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(scene_depth),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(scene_normal),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(&radiance.sampled_view),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::TextureView(noise_view),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: BindingResource::TextureView(target),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("vxgi.trace.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }
}

pub(crate) fn screen_vec(width: u32, height: u32) -> [f32; 4] {
    [
        width as f32,
        height as f32,
        1.0 / width as f32,
        1.0 / height as f32,
    ]
}

/// Hash-based stand-in used when the caller supplies no blue-noise texture.
/// Worse spectral properties than real blue noise, still decorrelates
/// neighboring pixels.
fn fallback_noise_texture(device: &Device, queue: &Queue) -> TextureView {
    let size = FALLBACK_NOISE_SIZE;
    let mut pixels = vec![0u8; (size * size * 4) as usize];
    for y in 0..size {
        for x in 0..size {
            let mut h = x.wrapping_mul(0x9E3779B9) ^ y.wrapping_mul(0x85EBCA6B);
            h ^= h >> 16;
            h = h.wrapping_mul(0x7FEB352D);
            h ^= h >> 15;
            let i = ((y * size + x) * 4) as usize;
            pixels[i] = (h & 0xFF) as u8;
            pixels[i + 1] = ((h >> 8) & 0xFF) as u8;
            pixels[i + 2] = ((h >> 16) & 0xFF) as u8;
            pixels[i + 3] = 255;
        }
    }

    let texture = device.create_texture(&TextureDescriptor {
        label: Some("vxgi.trace.fallback_noise"),
        size: Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        &pixels,
        ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(size * 4),
            rows_per_image: Some(size),
        },
        Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&TextureViewDescriptor::default())
}
