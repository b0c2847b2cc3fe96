//! Triple-axis voxelization pass.
//!
//! Every GI-contributing renderable is drawn once with three instances, one
//! per axis-aligned orthographic camera; the fragment stage scatters packed
//! texels into the voxel G-buffer through atomics, so draw order across
//! objects and axes never matters. The color target is a throwaway R8
//! attachment (raster passes need one), all real output goes through the
//! storage buffers.

use crate::camera::CameraRig;
use crate::config::GiConfig;
use crate::error::RenderResult;
use crate::scene::Renderable;
use crate::volume::VoxelGrid;
use wgpu::util::DeviceExt;
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct VoxelizeFrameStd140 {
    forward_view_proj: [[f32; 4]; 4],
    right_view_proj: [[f32; 4]; 4],
    up_view_proj: [[f32; 4]; 4],
    world_to_voxel: [[f32; 4]; 4],
    resolution: u32,
    conservative: u32,
    half_pixel: f32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct VoxelizeObjectStd140 {
    model: [[f32; 4]; 4],
    is_blocker: u32,
    _pad: [u32; 3],
}

pub struct VoxelizePass {
    pipeline: RenderPipeline,
    frame_layout: BindGroupLayout,
    object_layout: BindGroupLayout,
    frame_buffer: Buffer,
    dummy_target: TextureView,
    default_albedo: TextureView,
    default_emissive: TextureView,
    sampler: Sampler,
    resolution: u32,
}

impl VoxelizePass {
    pub fn new(device: &Device, queue: &Queue, resolution: u32) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.voxelize"),
            source: ShaderSource::Wgsl(include_str!("../shaders/voxelize.wgsl").into()),
        });

        let storage_entry = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let frame_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.voxelize.frame.bgl"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1),
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
            ],
        });

        let object_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.voxelize.object.bgl"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                // Mesh data pulled from storage; the dilation needs all
                // three corners of the triangle.
                BindGroupLayoutEntry {
                    binding: 4,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("vxgi.voxelize.layout"),
            bind_group_layouts: &[&frame_layout, &object_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("vxgi.voxelize.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_voxelize",
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_voxelize",
                targets: &[Some(ColorTargetState {
                    format: TextureFormat::R8Unorm,
                    blend: None,
                    write_mask: ColorWrites::empty(),
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                // Thin geometry must voxelize from both sides.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });

        let frame_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("vxgi.voxelize.frame"),
            size: std::mem::size_of::<VoxelizeFrameStd140>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let dummy_target = device
            .create_texture(&TextureDescriptor {
                label: Some("vxgi.voxelize.dummy"),
                size: Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::R8Unorm,
                usage: TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&TextureViewDescriptor::default());

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("vxgi.voxelize.sampler"),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            frame_layout,
            object_layout,
            frame_buffer,
            dummy_target,
            default_albedo: solid_texture(device, queue, "vxgi.voxelize.white", [255, 255, 255, 255]),
            default_emissive: solid_texture(device, queue, "vxgi.voxelize.black", [0, 0, 0, 255]),
            sampler,
            resolution,
        })
    }

    pub fn execute(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        rig: &CameraRig,
        config: &GiConfig,
        grid: &VoxelGrid,
        renderables: &[Renderable],
    ) -> RenderResult<()> {
        let frame = VoxelizeFrameStd140 {
            forward_view_proj: rig.forward_view_proj.to_cols_array_2d(),
            right_view_proj: rig.right_view_proj.to_cols_array_2d(),
            up_view_proj: rig.up_view_proj.to_cols_array_2d(),
            world_to_voxel: rig.world_to_voxel.to_cols_array_2d(),
            resolution: self.resolution,
            conservative: u32::from(config.voxelization.conservative_rasterization),
            half_pixel: config.voxelization.conservative_raster_scale / self.resolution as f32,
            _pad: 0,
        };
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&frame));

        let frame_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.voxelize.frame.bg"),
            layout: &self.frame_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.frame_buffer.as_entire_binding(),
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
            ],
        });

        // Per-object bind groups are created up front; the render pass
        // borrows them for its whole lifetime.
        let object_bind_groups: Vec<BindGroup> = renderables
            .iter()
            .map(|r| {
                let object = VoxelizeObjectStd140 {
                    model: r.world.to_cols_array_2d(),
                    is_blocker: u32::from(r.is_blocker),
                    _pad: [0; 3],
                };
                let buffer = device.create_buffer_init(&util::BufferInitDescriptor {
                    label: Some("vxgi.voxelize.object"),
                    contents: bytemuck::bytes_of(&object),
                    usage: BufferUsages::UNIFORM,
                });
                let albedo = r
                    .albedo
                    .as_deref()
                    .unwrap_or(&self.default_albedo);
                let emissive = r
                    .emissive
                    .as_deref()
                    .unwrap_or(&self.default_emissive);
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some("vxgi.voxelize.object.bg"),
                    layout: &self.object_layout,
                    entries: &[
                        BindGroupEntry {
                            binding: 0,
                            resource: buffer.as_entire_binding(),
                        },
                        BindGroupEntry {
                            binding: 1,
                            resource: BindingResource::TextureView(albedo),
                        },
                        BindGroupEntry {
                            binding: 2,
                            resource: BindingResource::TextureView(emissive),
                        },
                        BindGroupEntry {
                            binding: 3,
                            resource: BindingResource::Sampler(&self.sampler),
                        },
                        BindGroupEntry {
                            binding: 4,
                            resource: r.mesh.vertex_buffer.as_entire_binding(),
                        },
                        BindGroupEntry {
                            binding: 5,
                            resource: r.mesh.index_buffer.as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("vxgi.voxelize.pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &self.dummy_target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::BLACK),
                    store: StoreOp::Discard,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &frame_bind_group, &[]);
        for (renderable, bind_group) in renderables.iter().zip(&object_bind_groups) {
            pass.set_bind_group(1, bind_group, &[]);
            // Three instances, one per orthographic axis; vertices come
            // from the storage bindings, not a vertex buffer.
            pass.draw(0..renderable.mesh.index_count, 0..3);
        }
        drop(pass);
        Ok(())
    }
}

/// CPU reference for the shader's conservative dilation: push each corner
/// of an NDC triangle away from the triangle centroid by `offset`. Mirrors
/// `vs_voxelize` in shaders/voxelize.wgsl; keep the two in sync.
pub fn dilate_triangle(corners: [[f32; 2]; 3], offset: f32) -> [[f32; 2]; 3] {
    let center = [
        (corners[0][0] + corners[1][0] + corners[2][0]) / 3.0,
        (corners[0][1] + corners[1][1] + corners[2][1]) / 3.0,
    ];
    let mut out = corners;
    for (dst, src) in out.iter_mut().zip(&corners) {
        let away = [src[0] - center[0], src[1] - center[1]];
        let len = (away[0] * away[0] + away[1] * away[1]).sqrt();
        if len > 1e-6 {
            dst[0] = src[0] + away[0] / len * offset;
            dst[1] = src[1] + away[1] / len * offset;
        }
    }
    out
}

/// 1x1 fallback for renderables without material textures.
fn solid_texture(device: &Device, queue: &Queue, label: &str, rgba: [u8; 4]) -> TextureView {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: 1,
            height: 1,
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
        &rgba,
        ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(a: [f32; 2], b: [f32; 2]) -> f32 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    #[test]
    fn dilation_pushes_each_corner_outward_by_offset() {
        let corners = [[-0.4, -0.2], [0.5, -0.1], [0.0, 0.6]];
        let center = [
            (corners[0][0] + corners[1][0] + corners[2][0]) / 3.0,
            (corners[0][1] + corners[1][1] + corners[2][1]) / 3.0,
        ];
        let offset = 0.05;
        let dilated = dilate_triangle(corners, offset);
        for (before, after) in corners.iter().zip(&dilated) {
            let grown = dist(*after, center) - dist(*before, center);
            assert!((grown - offset).abs() < 1e-5);
        }
    }

    #[test]
    fn thin_triangle_covers_a_texel_after_dilation() {
        // A face of a thin wall, projected edge-on-ish: far thinner than
        // one texel at a 64 grid (texel = 2/64 NDC).
        let texel = 2.0 / 64.0;
        let corners = [[-0.5, 0.0], [0.5, 0.0], [0.0, 4e-4]];
        let height = |c: [[f32; 2]; 3]| {
            let ys = [c[0][1], c[1][1], c[2][1]];
            ys.iter().cloned().fold(f32::MIN, f32::max)
                - ys.iter().cloned().fold(f32::MAX, f32::min)
        };
        assert!(height(corners) < 1e-3);

        // offset = half_pixel * 2 with the default conservative scale.
        let offset = 1.5 / 64.0 * 2.0;
        let dilated = dilate_triangle(corners, offset);
        assert!(height(dilated) > texel);
    }

    #[test]
    fn shared_flat_normal_still_enlarges_the_triangle() {
        // All three corners of a flat-shaded face move apart, not together:
        // pairwise distances strictly grow.
        let corners = [[0.1, 0.1], [0.3, 0.1], [0.2, 0.25]];
        let dilated = dilate_triangle(corners, 0.02);
        for i in 0..3 {
            let j = (i + 1) % 3;
            assert!(dist(dilated[i], dilated[j]) > dist(corners[i], corners[j]));
        }
    }
}
