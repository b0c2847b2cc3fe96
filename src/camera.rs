//! Camera rig for voxelization and shadowing.
//!
//! Pure math, re-derived every frame before any GPU work: the snapped grid
//! origin, the three axis-aligned orthographic voxelization cameras, the
//! sun shadow camera, and the voxel<->world transforms.

use crate::config::{DirectionalLight, GiConfig};
use glam::{Mat4, Vec3};

/// Per-frame transforms shared by the voxelization and lighting passes.
#[derive(Debug, Clone, Copy)]
pub struct CameraRig {
    /// Snapped world-space center of the voxel grid.
    pub origin: Vec3,
    /// Orthographic view-projections looking down -Z, -X and -Y.
    pub forward_view_proj: Mat4,
    pub right_view_proj: Mat4,
    pub up_view_proj: Mat4,
    /// Orthographic view-projection from the sun.
    pub shadow_view_proj: Mat4,
    pub voxel_to_world: Mat4,
    pub world_to_voxel: Mat4,
}

/// Quantize the camera position to cells of
/// `voxel_size * 2^stable_mip_level` so sub-cell camera motion leaves the
/// grid origin unchanged (no voxel swimming).
pub fn snapped_origin(camera_pos: Vec3, voxel_size: f32, stable_mip_level: u32) -> Vec3 {
    let cell = voxel_size * (1u32 << stable_mip_level) as f32;
    // Truncation toward zero, matching integer-cast snapping.
    (camera_pos / cell).trunc() * cell
}

impl CameraRig {
    pub fn new(config: &GiConfig, camera_pos: Vec3) -> Self {
        let range = config.voxelization_range();
        let half = 0.5 * range;
        let origin = snapped_origin(
            camera_pos,
            config.voxelization.voxel_size,
            config.voxelization.stable_mip_level,
        );

        let proj = Mat4::orthographic_rh(-half, half, -half, half, -half, half);
        let forward_view = Mat4::look_at_rh(origin - Vec3::Z * half, origin, Vec3::Y);
        let right_view = Mat4::look_at_rh(origin - Vec3::X * half, origin, Vec3::Y);
        let up_view = Mat4::look_at_rh(origin - Vec3::Y * half, origin, Vec3::NEG_Z);

        let shadow = shadow_view_proj(config, origin, &config.direct.sun);

        let grid_corner = origin - Vec3::splat(half);
        let voxel_to_world = Mat4::from_scale_rotation_translation(
            Vec3::splat(config.voxelization.voxel_size),
            glam::Quat::IDENTITY,
            grid_corner,
        );

        Self {
            origin,
            forward_view_proj: proj * forward_view,
            right_view_proj: proj * right_view,
            up_view_proj: proj * up_view,
            shadow_view_proj: shadow,
            voxel_to_world,
            world_to_voxel: voxel_to_world.inverse(),
        }
    }
}

fn shadow_view_proj(config: &GiConfig, origin: Vec3, sun: &DirectionalLight) -> Mat4 {
    let range = config.voxelization.shadow_map_range;
    let dir = sun.direction.normalize_or_zero();
    let up = if dir.cross(Vec3::Y).length_squared() < 1e-4 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_at_rh(origin - dir * range, origin, up);
    let proj = Mat4::orthographic_rh(
        -range,
        range,
        -range,
        range,
        -range * 10.0,
        range * 10.0,
    );
    proj * view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_stable_under_sub_cell_motion() {
        // cell = 0.1 * 2^6 = 6.4 world units
        let a = snapped_origin(Vec3::new(10.0, 3.0, -7.0), 0.1, 6);
        let b = snapped_origin(Vec3::new(10.0 + 3.0, 3.0 + 2.0, -7.0 + 1.0), 0.1, 6);
        assert_eq!(a, b);
    }

    #[test]
    fn origin_moves_in_whole_cells() {
        let cell = 0.1 * 64.0;
        let a = snapped_origin(Vec3::new(0.5, 0.0, 0.0), 0.1, 6);
        let b = snapped_origin(Vec3::new(0.5 + cell, 0.0, 0.0), 0.1, 6);
        assert!((b.x - a.x - cell).abs() < 1e-5);
        assert_eq!(a.y, b.y);
        assert_eq!(a.z, b.z);
    }

    #[test]
    fn voxel_world_round_trip() {
        let cfg = GiConfig::default();
        let rig = CameraRig::new(&cfg, Vec3::new(1.0, 2.0, 3.0));
        let p = Vec3::new(4.0, -2.0, 7.5);
        let v = rig.world_to_voxel.transform_point3(p);
        let back = rig.voxel_to_world.transform_point3(v);
        assert!((back - p).length() < 1e-3);
    }

    #[test]
    fn grid_center_maps_to_half_resolution() {
        let cfg = GiConfig::default();
        let rig = CameraRig::new(&cfg, Vec3::ZERO);
        let v = rig.world_to_voxel.transform_point3(rig.origin);
        let half_res = cfg.voxelization.voxel_resolution as f32 * 0.5;
        assert!((v - Vec3::splat(half_res)).length() < 1e-2);
    }
}
