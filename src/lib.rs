//! Real-time voxel cone-traced global illumination.
//!
//! The pipeline revoxelizes the scene around the camera every frame,
//! injects shadowed sun light into a 3D radiance volume, builds a box
//! filtered mip pyramid over it (optionally adding a second bounce), cone
//! traces one diffuse ray per pixel and resolves the noisy estimate with a
//! temporal and a bilateral filter before compositing onto the host's
//! direct lighting.
//!
//! [`pipeline::VoxelGi`] is the entry point; the host supplies a
//! [`scene::SceneProvider`] plus per-frame [`pipeline::FrameInputs`] and
//! receives the composed image in a storage texture.

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod passes;
pub mod pipeline;
pub mod sampling;
pub mod scene;
pub mod volume;

pub use config::{DebugView, DirectionalLight, GiConfig};
pub use error::{RenderError, RenderResult};
pub use pipeline::{FrameInputs, VoxelGi};
pub use scene::{GpuMesh, Renderable, SceneProvider, Vertex};
