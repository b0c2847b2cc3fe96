//! Anisotropic mip pyramid construction over a radiance volume.
//!
//! Every level is built in two phases: a downsample kernel box-filters the
//! previous committed level of the primary chain into the matching level of
//! a scratch chain, and a copy kernel then commits that scratch level back
//! into the primary chain. Writing a chain level while sampling the same
//! chain is undefined, so the scratch hop is not optional.
//!
//! `downsample_box_3d` is the CPU reference for the downsample kernel and
//! is what the GPU output is validated against.

use crate::error::RenderResult;
use crate::volume::RadianceVolume;
use wgpu::util::DeviceExt;
use wgpu::*;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MipParamsStd140 {
    dst_resolution: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

pub struct MipPropagator {
    downsample_pipeline: ComputePipeline,
    copy_pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    /// One uniform buffer per destination level, index 0 unused.
    level_params: Vec<Buffer>,
    mip_level_count: u32,
}

impl MipPropagator {
    pub fn new(device: &Device, resolution: u32) -> RenderResult<Self> {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("vxgi.mip"),
            source: ShaderSource::Wgsl(include_str!("../shaders/mip.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("vxgi.mip.bgl"),
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
                        view_dimension: TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
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

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("vxgi.mip.layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let make_pipeline = |entry: &str, label: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: entry,
            })
        };

        let mip_level_count = resolution.trailing_zeros() + 1;
        let level_params = (0..mip_level_count)
            .map(|mip| {
                let params = MipParamsStd140 {
                    dst_resolution: (resolution >> mip).max(1),
                    _pad0: 0,
                    _pad1: 0,
                    _pad2: 0,
                };
                device.create_buffer_init(&util::BufferInitDescriptor {
                    label: Some(&format!("vxgi.mip.params.{}", mip)),
                    contents: bytemuck::bytes_of(&params),
                    usage: BufferUsages::UNIFORM,
                })
            })
            .collect();

        Ok(Self {
            downsample_pipeline: make_pipeline("cs_mip_downsample", "vxgi.mip.downsample"),
            copy_pipeline: make_pipeline("cs_mip_copy", "vxgi.mip.copy"),
            bind_group_layout,
            level_params,
            mip_level_count,
        })
    }

    /// Rebuild levels 1..n of `primary`, routing each through `scratch`.
    /// Mip 0 of `primary` must already hold this frame's radiance.
    pub fn propagate(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        primary: &RadianceVolume,
        scratch: &RadianceVolume,
    ) -> RenderResult<()> {
        debug_assert_eq!(primary.mip_level_count, self.mip_level_count);
        debug_assert_eq!(scratch.mip_level_count, self.mip_level_count);

        for mip in 1..self.mip_level_count as usize {
            let groups = (primary.mip_resolution(mip as u32) + 3) / 4;

            // Phase one: box-filter the committed level below into scratch.
            let downsample_bg = self.bind_group(
                device,
                &self.level_params[mip],
                &primary.mip_views[mip - 1],
                &scratch.mip_views[mip],
            );
            // Phase two: commit the scratch level into the primary chain.
            let copy_bg = self.bind_group(
                device,
                &self.level_params[mip],
                &scratch.mip_views[mip],
                &primary.mip_views[mip],
            );

            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("vxgi.mip.downsample.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.downsample_pipeline);
            pass.set_bind_group(0, &downsample_bg, &[]);
            pass.dispatch_workgroups(groups, groups, groups);
            drop(pass);

            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("vxgi.mip.copy.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.copy_pipeline);
            pass.set_bind_group(0, &copy_bg, &[]);
            pass.dispatch_workgroups(groups, groups, groups);
        }
        Ok(())
    }

    fn bind_group(
        &self,
        device: &Device,
        params: &Buffer,
        src: &TextureView,
        dst: &TextureView,
    ) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("vxgi.mip.bg"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(src),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(dst),
                },
            ],
        })
    }
}

/// CPU reference for one downsample step: average each 2x2x2 block of a
/// `src_res^3` RGBA volume into a `(src_res / 2)^3` volume.
pub fn downsample_box_3d(src: &[[f32; 4]], src_res: usize) -> Vec<[f32; 4]> {
    assert_eq!(src.len(), src_res * src_res * src_res);
    assert!(src_res >= 2 && src_res % 2 == 0);
    let dst_res = src_res / 2;
    let mut dst = vec![[0.0f32; 4]; dst_res * dst_res * dst_res];
    for z in 0..dst_res {
        for y in 0..dst_res {
            for x in 0..dst_res {
                let mut sum = [0.0f32; 4];
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let sx = x * 2 + dx;
                            let sy = y * 2 + dy;
                            let sz = z * 2 + dz;
                            let s = src[sx + sy * src_res + sz * src_res * src_res];
                            for c in 0..4 {
                                sum[c] += s[c];
                            }
                        }
                    }
                }
                let d = &mut dst[x + y * dst_res + z * dst_res * dst_res];
                for c in 0..4 {
                    d[c] = sum[c] / 8.0;
                }
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(x: usize, y: usize, z: usize, res: usize) -> usize {
        x + y * res + z * res * res
    }

    #[test]
    fn downsample_averages_each_block() {
        let res = 4;
        let mut src = vec![[0.0f32; 4]; res * res * res];
        // One hot texel in the block at dst (0, 0, 0).
        src[index(1, 0, 1, res)] = [8.0, 16.0, 0.0, 8.0];
        let dst = downsample_box_3d(&src, res);
        assert_eq!(dst.len(), 8);
        assert_eq!(dst[0], [1.0, 2.0, 0.0, 1.0]);
        for texel in &dst[1..] {
            assert_eq!(*texel, [0.0; 4]);
        }
    }

    #[test]
    fn downsample_preserves_constant_volumes() {
        let res = 8;
        let src = vec![[0.25f32, 0.5, 0.75, 1.0]; res * res * res];
        let dst = downsample_box_3d(&src, res);
        for texel in &dst {
            for c in 0..4 {
                assert!((texel[c] - src[0][c]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn downsample_is_deterministic() {
        let res = 4;
        let src: Vec<[f32; 4]> = (0..res * res * res)
            .map(|i| {
                let f = i as f32;
                [f * 0.1, f * 0.2, f * 0.3, (i % 2) as f32]
            })
            .collect();
        assert_eq!(downsample_box_3d(&src, res), downsample_box_3d(&src, res));
    }

    #[test]
    fn chained_downsample_reaches_one_texel() {
        let res = 8;
        let src: Vec<[f32; 4]> = (0..res * res * res)
            .map(|i| [i as f32, 0.0, 0.0, 1.0])
            .collect();
        let mut level = src.clone();
        let mut r = res;
        while r > 1 {
            level = downsample_box_3d(&level, r);
            r /= 2;
        }
        assert_eq!(level.len(), 1);
        // Full-chain box filtering converges to the global mean.
        let mean = src.iter().map(|t| t[0]).sum::<f32>() / src.len() as f32;
        assert!((level[0][0] - mean).abs() < 1e-2);
    }
}
