//! Per-stage GPU pass wrappers, issued in pipeline order by the
//! orchestrator.

pub mod bilateral;
pub mod bounce;
pub mod composite;
pub mod direct;
pub mod mip;
pub mod shadow;
pub mod temporal;
pub mod trace;
pub mod voxelize;

pub use bilateral::BilateralFilterPass;
pub use bounce::IndirectLightingPass;
pub use composite::CompositePass;
pub use direct::DirectLightingPass;
pub use mip::MipPropagator;
pub use shadow::{DepthPassRasterizer, ShadowRasterizer};
pub use temporal::TemporalFilterPass;
pub use trace::ScreenTracePass;
pub use voxelize::VoxelizePass;
