//! Sun shadow map rasterization.
//!
//! The lighting stage only consumes a depth map plus the light's
//! view-projection, so the rasterizer sits behind a trait; the built-in
//! implementation renders a depth-only pass over every shadow-casting
//! renderable.

use crate::error::RenderResult;
use crate::scene::{Renderable, Vertex};
use glam::Mat4;
use wgpu::util::DeviceExt;
use wgpu::*;

/// Anything that can produce a sun depth map for the shadow injection.
pub trait ShadowRasterizer {
    fn render_depth(
        &mut self,
        device: &Device,
        encoder: &mut CommandEncoder,
        light_view_proj: Mat4,
        renderables: &[Renderable],
    ) -> RenderResult<()>;

    fn depth_view(&self) -> &TextureView;
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowParamsStd140 {
    light_view_proj: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
}

/// Depth-only orthographic shadow pass.
pub struct DepthPassRasterizer {
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    depth_view: TextureView,
    resolution: u32,
}

impl DepthPassRasterizer {
    pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

    pub fn new(device: &Device, resolution: u32) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.shadow"),
            source: ShaderSource::Wgsl(include_str!("../shaders/shadow_depth.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.shadow.bgl"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("vxgi.shadow.pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("vxgi.shadow.layout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                }),
            ),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_shadow_depth",
                buffers: &[Vertex::layout()],
            },
            fragment: None,
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(DepthStencilState {
                format: Self::DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
        });

        let depth_view = device
            .create_texture(&TextureDescriptor {
                label: Some("vxgi.shadow.depth"),
                size: Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: Self::DEPTH_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&TextureViewDescriptor::default());

        Ok(Self {
            pipeline,
            bind_group_layout,
            depth_view,
            resolution,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }
}

impl ShadowRasterizer for DepthPassRasterizer {
    fn render_depth(
        &mut self,
        device: &Device,
        encoder: &mut CommandEncoder,
        light_view_proj: Mat4,
        renderables: &[Renderable],
    ) -> RenderResult<()> {
        let bind_groups: Vec<BindGroup> = renderables
            .iter()
            .filter(|r| r.casts_shadow)
            .map(|r| {
                let params = ShadowParamsStd140 {
                    light_view_proj: light_view_proj.to_cols_array_2d(),
                    model: r.world.to_cols_array_2d(),
                };
                let buffer = device.create_buffer_init(&util::BufferInitDescriptor {
                    label: Some("vxgi.shadow.object"),
                    contents: bytemuck::bytes_of(&params),
                    usage: BufferUsages::UNIFORM,
                });
                device.create_bind_group(&BindGroupDescriptor {
                    label: Some("vxgi.shadow.bg"),
                    layout: &self.bind_group_layout,
                    entries: &[BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                })
            })
            .collect();

        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("vxgi.shadow.pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        for (renderable, bind_group) in renderables
            .iter()
            .filter(|r| r.casts_shadow)
            .zip(&bind_groups)
        {
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(0, renderable.mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(renderable.mesh.index_buffer.slice(..), IndexFormat::Uint32);
            pass.draw_indexed(0..renderable.mesh.index_count, 0, 0..1);
        }
        drop(pass);
        Ok(())
    }

    fn depth_view(&self) -> &TextureView {
        &self.depth_view
    }
}
