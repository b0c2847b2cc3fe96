//! GPU readback helpers.

use crate::error::{RenderError, RenderResult};

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

/// Read back one mip level of an Rgba16Float 3D texture as f32 RGBA, depad
/// row pitch, and decode half floats. Blocks on the device.
pub fn read_texture_3d_rgba16f(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    extent: u32,
) -> RenderResult<Vec<f32>> {
    read_rgba16f(device, queue, texture, mip_level, extent, extent, extent)
}

/// Read back an Rgba16Float 2D texture as f32 RGBA. Blocks on the device.
pub fn read_texture_2d_rgba16f(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> RenderResult<Vec<f32>> {
    read_rgba16f(device, queue, texture, 0, width, height, 1)
}

fn read_rgba16f(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    width: u32,
    height: u32,
    depth: u32,
) -> RenderResult<Vec<f32>> {
    let bytes_per_texel = 8u32; // 4 x f16
    let unpadded_bpr = width * bytes_per_texel;
    let padded_bpr = align_copy_bpr(unpadded_bpr);
    let buf_size = (padded_bpr * height * depth) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("vxgi.readback.staging"),
        size: buf_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("vxgi.readback.encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: depth,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = sender.send(res);
    });
    device.poll(wgpu::Maintain::Wait);
    pollster::block_on(receiver.receive())
        .ok_or_else(|| RenderError::readback("map_async channel closed"))?
        .map_err(|e| RenderError::readback(format!("buffer map failed: {:?}", e)))?;

    let data = slice.get_mapped_range();
    let mut out = Vec::with_capacity((width * height * depth * 4) as usize);
    for layer in 0..depth {
        for row in 0..height {
            let start = ((layer * height + row) * padded_bpr) as usize;
            let end = start + unpadded_bpr as usize;
            let halves: &[half::f16] = bytemuck::cast_slice(&data[start..end]);
            out.extend(halves.iter().map(|h| h.to_f32()));
        }
    }
    drop(data);
    staging.unmap();
    Ok(out)
}
