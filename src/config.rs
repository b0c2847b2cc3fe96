//! Pipeline configuration.
//!
//! Plain data read by every stage; the orchestrator owns one instance and
//! treats it as immutable for the duration of a frame. Numeric-only fields
//! can change freely between frames; size-affecting fields require a
//! resource rebuild (see [`GiConfig::needs_resource_rebuild`]).

use crate::error::{RenderError, RenderResult};
use glam::Vec3;

/// Directional sun light feeding the direct-lighting injection.
///
/// Replaces the host engine's light object with explicit data; callers are
/// expected to hand in a valid (enabled, directional) light every frame.
#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    /// Normalized direction the light travels (from sun toward scene).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: Vec3::ONE,
            intensity: 1.0,
            enabled: true,
        }
    }
}

impl DirectionalLight {
    pub fn is_valid(&self) -> bool {
        self.enabled && self.direction.length_squared() > 1e-6
    }
}

/// Voxelization and shadow-map sizing.
#[derive(Debug, Clone)]
pub struct VoxelizationConfig {
    pub shadow_map_resolution: u32,
    pub shadow_map_range: f32,
    /// Edge length of the voxel grid, must be a power of two.
    pub voxel_resolution: u32,
    pub voxel_size: f32,
    /// Origin snapping granularity exponent; the grid origin moves in steps
    /// of `voxel_size * 2^stable_mip_level` so camera motion below that
    /// cell size never shifts voxel contents.
    pub stable_mip_level: u32,
    pub conservative_rasterization: bool,
    /// Fragment dilation in units of one voxel texel (0..3).
    pub conservative_raster_scale: f32,
}

impl Default for VoxelizationConfig {
    fn default() -> Self {
        Self {
            shadow_map_resolution: 1024,
            shadow_map_range: 50.0,
            voxel_resolution: 256,
            voxel_size: 0.1,
            stable_mip_level: 6,
            conservative_rasterization: false,
            conservative_raster_scale: 1.5,
        }
    }
}

/// Direct-light injection tunables.
#[derive(Debug, Clone)]
pub struct DirectLightConfig {
    pub sun: DirectionalLight,
    pub light_intensity_multiplier: f32,
    pub emissive_multiplier: f32,
    /// Constant bias along the light direction, in world units.
    pub shadow_sun_bias: f32,
    /// Bias along the voxel normal, scaled by voxel size.
    pub shadow_normal_bias: f32,
}

impl Default for DirectLightConfig {
    fn default() -> Self {
        Self {
            sun: DirectionalLight::default(),
            light_intensity_multiplier: 1.5,
            emissive_multiplier: 1.5,
            shadow_sun_bias: 0.25,
            shadow_normal_bias: 1.0,
        }
    }
}

/// Second-bounce voxel cone tracing tunables.
#[derive(Debug, Clone)]
pub struct IndirectLightConfig {
    pub second_bounce: bool,
    pub max_steps: u32,
    pub alpha_attenuation: f32,
    pub scale: f32,
    /// First step distance in voxels.
    pub first_step: f32,
    pub step_scale: f32,
    /// Cone aperture in degrees.
    pub cone_angle: f32,
    /// Floor on the sampled mip, avoids self-occlusion blur at the origin voxel.
    pub min_mip_level: u32,
}

impl Default for IndirectLightConfig {
    fn default() -> Self {
        Self {
            second_bounce: true,
            max_steps: 12,
            alpha_attenuation: 2.0,
            scale: 2.0,
            first_step: 1.0,
            step_scale: 1.0,
            cone_angle: 120.0,
            min_mip_level: 0,
        }
    }
}

/// Per-pixel screen cone trace tunables.
#[derive(Debug, Clone)]
pub struct ConeTraceConfig {
    pub max_steps: u32,
    pub alpha_attenuation: f32,
    pub scale: f32,
    pub first_step: f32,
    pub step_scale: f32,
    /// Cone aperture in degrees.
    pub cone_angle: f32,
}

impl Default for ConeTraceConfig {
    fn default() -> Self {
        Self {
            max_steps: 32,
            alpha_attenuation: 5.0,
            scale: 1.0,
            first_step: 0.9,
            step_scale: 1.2,
            cone_angle: 120.0,
        }
    }
}

/// Temporal history blend tunables.
#[derive(Debug, Clone)]
pub struct TemporalConfig {
    pub enabled: bool,
    /// Fraction of the current frame blended in; history keeps `1 - alpha`.
    pub blend_alpha: f32,
    /// Scales the neighborhood clamp box about its center; smaller values
    /// reject history more aggressively.
    pub clamp_aabb_scale: f32,
    pub blue_noise_scale: [f32; 2],
    /// Length of the jitter sequence; the offset index wraps at
    /// `halton_count - 1`.
    pub halton_count: u32,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blend_alpha: 0.005,
            clamp_aabb_scale: 1.2,
            blue_noise_scale: [1.0, 1.0],
            halton_count: 8,
        }
    }
}

/// Depth/normal-aware spatial denoise tunables.
#[derive(Debug, Clone)]
pub struct BilateralConfig {
    pub enabled: bool,
    pub sample_radius: f32,
    pub depth_threshold_lower: f32,
    pub depth_threshold_upper: f32,
    pub normal_threshold_lower: f32,
    pub normal_threshold_upper: f32,
}

impl Default for BilateralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_radius: 6.0,
            depth_threshold_lower: 0.1,
            depth_threshold_upper: 0.2,
            normal_threshold_lower: 0.7,
            normal_threshold_upper: 1.0,
        }
    }
}

/// Which intermediate the debug pass visualizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DebugView {
    Albedo = 0,
    Normal = 1,
    Emissive = 2,
    Lighting = 3,
    IndirectLighting = 4,
    ConeTrace = 5,
    TemporalFilter = 6,
    BilateralFilter = 7,
}

/// Diagnostic visualization settings; bypasses normal composition.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    pub enabled: bool,
    pub view: DebugView,
    pub direct_mip_level: u32,
    pub indirect_mip_level: u32,
    /// March step for the volume visualizations, in world units.
    pub ray_step_size: f32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            view: DebugView::Lighting,
            direct_mip_level: 0,
            indirect_mip_level: 0,
            ray_step_size: 0.03,
        }
    }
}

/// Top-level configuration, one instance owned by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct GiConfig {
    pub voxelization: VoxelizationConfig,
    pub direct: DirectLightConfig,
    pub indirect: IndirectLightConfig,
    pub cone_trace: ConeTraceConfig,
    pub temporal: TemporalConfig,
    pub bilateral: BilateralConfig,
    pub debug: DebugConfig,
}

impl GiConfig {
    /// World-space edge length covered by the voxel grid.
    pub fn voxelization_range(&self) -> f32 {
        self.voxelization.voxel_size * self.voxelization.voxel_resolution as f32
    }

    /// Full mip chain length for the radiance volumes: log2(res) + 1.
    pub fn mip_level_count(&self) -> u32 {
        self.voxelization.voxel_resolution.trailing_zeros() + 1
    }

    pub fn validate(&self) -> RenderResult<()> {
        let res = self.voxelization.voxel_resolution;
        if res == 0 || !res.is_power_of_two() {
            return Err(RenderError::render(format!(
                "voxel_resolution must be a power of two, got {}",
                res
            )));
        }
        if self.voxelization.voxel_size <= 0.0 {
            return Err(RenderError::render("voxel_size must be positive"));
        }
        if self.voxelization.shadow_map_resolution == 0 {
            return Err(RenderError::render("shadow_map_resolution must be nonzero"));
        }
        if self.temporal.halton_count < 2 {
            return Err(RenderError::render("halton_count must be at least 2"));
        }
        Ok(())
    }

    /// True when switching to `next` invalidates GPU resources. Only the
    /// size-affecting fields count; angles, scales and thresholds are
    /// consumed from uniforms every frame.
    pub fn needs_resource_rebuild(&self, next: &GiConfig) -> bool {
        self.voxelization.voxel_resolution != next.voxelization.voxel_resolution
            || self.voxelization.shadow_map_resolution != next.voxelization.shadow_map_resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_count_matches_log2_plus_one() {
        let mut cfg = GiConfig::default();
        cfg.voxelization.voxel_resolution = 256;
        assert_eq!(cfg.mip_level_count(), 9);
        cfg.voxelization.voxel_resolution = 64;
        assert_eq!(cfg.mip_level_count(), 7);
    }

    #[test]
    fn rebuild_only_for_size_fields() {
        let a = GiConfig::default();
        let mut b = a.clone();
        b.cone_trace.cone_angle = 90.0;
        b.bilateral.sample_radius = 2.0;
        assert!(!a.needs_resource_rebuild(&b));

        b.voxelization.voxel_resolution = 128;
        assert!(a.needs_resource_rebuild(&b));

        let mut c = a.clone();
        c.voxelization.shadow_map_resolution = 2048;
        assert!(a.needs_resource_rebuild(&c));
    }

    #[test]
    fn validate_rejects_non_power_of_two() {
        let mut cfg = GiConfig::default();
        cfg.voxelization.voxel_resolution = 200;
        assert!(cfg.validate().is_err());
        cfg.voxelization.voxel_resolution = 128;
        assert!(cfg.validate().is_ok());
    }
}
