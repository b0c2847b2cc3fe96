//! Scene boundary: what the host must supply per frame.
//!
//! The pipeline never walks a scene graph itself; it consumes a flat list
//! of renderables from a [`SceneProvider`]. Objects without mesh data simply
//! do not appear in the list.

use glam::{Mat4, Vec3};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Interleaved vertex layout shared by voxelization and shadow passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// GPU-resident triangle mesh.
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, vertices: &[Vertex], indices: &[u32]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi.mesh.vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vxgi.mesh.indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::STORAGE,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }

    /// Axis-aligned unit-ish cube centered at the origin.
    pub fn cube(device: &wgpu::Device, half_extent: f32) -> Self {
        let h = half_extent;
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // (normal, tangent u, tangent v)
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in faces {
            let n = Vec3::from(n);
            let u = Vec3::from(u);
            let v = Vec3::from(v);
            let base = vertices.len() as u32;
            for (su, sv, uv) in [
                (-1.0, -1.0, [0.0, 0.0]),
                (1.0, -1.0, [1.0, 0.0]),
                (1.0, 1.0, [1.0, 1.0]),
                (-1.0, 1.0, [0.0, 1.0]),
            ] {
                let p = (n + u * su + v * sv) * h;
                vertices.push(Vertex {
                    position: p.to_array(),
                    normal: n.to_array(),
                    uv,
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::upload(device, &vertices, &indices)
    }
}

/// One object as seen by the voxelization and shadow passes.
#[derive(Clone)]
pub struct Renderable {
    pub world: Mat4,
    pub mesh: Arc<GpuMesh>,
    /// Albedo texture; a flat white fallback is used when absent.
    pub albedo: Option<Arc<wgpu::TextureView>>,
    /// Emissive texture; a flat black fallback is used when absent.
    pub emissive: Option<Arc<wgpu::TextureView>>,
    /// Blockers contribute occlusion/coverage only, never albedo or
    /// emissive radiance.
    pub is_blocker: bool,
    pub casts_shadow: bool,
}

/// Host-side object enumeration. Each object is visited exactly once per
/// pass; no ordering is assumed.
pub trait SceneProvider {
    fn renderables(&self) -> Vec<Renderable>;
}

impl SceneProvider for Vec<Renderable> {
    fn renderables(&self) -> Vec<Renderable> {
        self.clone()
    }
}
