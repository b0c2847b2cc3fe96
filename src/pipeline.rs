//! Frame orchestration.
//!
//! [`VoxelGi`] owns every pass and GPU resource and runs them in a fixed
//! order: voxelize, shadow-lit injection, mip pyramid, optional second
//! bounce, screen cone trace, temporal filter, bilateral filter,
//! composition. Disabling drops all GPU resources; re-enabling rebuilds
//! them and restarts temporal history from scratch.

use crate::camera::CameraRig;
use crate::config::GiConfig;
use crate::error::{RenderError, RenderResult};
use crate::frame::{CameraFrame, FrameContext};
use crate::passes::composite::DebugScreenSource;
use crate::passes::trace::BlueNoise;
use crate::passes::{
    BilateralFilterPass, CompositePass, DepthPassRasterizer, DirectLightingPass,
    IndirectLightingPass, MipPropagator, ScreenTracePass, ShadowRasterizer, TemporalFilterPass,
    VoxelizePass,
};
use crate::scene::SceneProvider;
use crate::volume::{ClearKit, RadianceVolume, ScreenBuffers, VoxelGrid};
use wgpu::{CommandEncoder, Device, Queue, TextureView};

/// Everything the host hands in per frame besides the scene itself.
pub struct FrameInputs<'a> {
    pub camera: CameraFrame,
    /// Opaque scene depth, non-linear [0, 1].
    pub scene_depth: &'a TextureView,
    /// World-space normals encoded as `n * 0.5 + 0.5`.
    pub scene_normal: &'a TextureView,
    /// The host's direct lighting result; composition adds GI on top.
    pub scene_direct: &'a TextureView,
    /// Rgba16Float storage target receiving the composed (or debug) image.
    pub output: &'a TextureView,
    pub blue_noise: Option<BlueNoise<'a>>,
    pub width: u32,
    pub height: u32,
}

struct GiResources {
    grid: VoxelGrid,
    primary: RadianceVolume,
    primary_scratch: RadianceVolume,
    indirect: RadianceVolume,
    indirect_scratch: RadianceVolume,
    screen: ScreenBuffers,
    clear: ClearKit,
    voxelize: VoxelizePass,
    shadow: Box<dyn ShadowRasterizer>,
    direct: DirectLightingPass,
    mip: MipPropagator,
    bounce: IndirectLightingPass,
    trace: ScreenTracePass,
    temporal: TemporalFilterPass,
    bilateral: BilateralFilterPass,
    composite: CompositePass,
}

impl GiResources {
    fn new(
        device: &Device,
        queue: &Queue,
        config: &GiConfig,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        let res = config.voxelization.voxel_resolution;
        Ok(Self {
            grid: VoxelGrid::new(device, res),
            primary: RadianceVolume::new(device, "vxgi.volume.direct", res),
            primary_scratch: RadianceVolume::new(device, "vxgi.volume.direct.scratch", res),
            indirect: RadianceVolume::new(device, "vxgi.volume.indirect", res),
            indirect_scratch: RadianceVolume::new(device, "vxgi.volume.indirect.scratch", res),
            screen: ScreenBuffers::new(device, width.max(1), height.max(1)),
            clear: ClearKit::new(device)?,
            voxelize: VoxelizePass::new(device, queue, res)?,
            shadow: Box::new(DepthPassRasterizer::new(
                device,
                config.voxelization.shadow_map_resolution,
            )?),
            direct: DirectLightingPass::new(device)?,
            mip: MipPropagator::new(device, res)?,
            bounce: IndirectLightingPass::new(device)?,
            trace: ScreenTracePass::new(device, queue)?,
            temporal: TemporalFilterPass::new(device)?,
            bilateral: BilateralFilterPass::new(device)?,
            composite: CompositePass::new(device)?,
        })
    }
}

/// Voxel cone-traced global illumination pipeline.
pub struct VoxelGi {
    config: GiConfig,
    frame: FrameContext,
    resources: Option<GiResources>,
    sun_warned: bool,
}

impl VoxelGi {
    pub fn new(config: GiConfig) -> RenderResult<Self> {
        config.validate()?;
        let halton_count = config.temporal.halton_count;
        Ok(Self {
            config,
            frame: FrameContext::new(halton_count),
            resources: None,
            sun_warned: false,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.resources.is_some()
    }

    pub fn config(&self) -> &GiConfig {
        &self.config
    }

    /// The lit radiance volume, for readback and inspection. `None` while
    /// disabled.
    pub fn primary_volume_texture(&self) -> Option<&wgpu::Texture> {
        self.resources.as_ref().map(|r| &r.primary.texture)
    }

    /// Both temporal irradiance accumulation targets, for readback and
    /// inspection. `None` while disabled.
    pub fn irradiance_textures(&self) -> Option<[&wgpu::Texture; 2]> {
        self.resources
            .as_ref()
            .map(|r| [&r.screen.irradiance[0], &r.screen.irradiance[1]])
    }

    /// Position in the Halton jitter sequence. Advances once per rendered
    /// frame.
    pub fn jitter_index(&self) -> u32 {
        self.frame.jitter.index()
    }

    /// Allocate all GPU resources and arm the history clear. Idempotent.
    pub fn enable(
        &mut self,
        device: &Device,
        queue: &Queue,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }
        log::info!(
            "enabling vxgi: {0}^3 voxels, {1} mips",
            self.config.voxelization.voxel_resolution,
            self.config.mip_level_count()
        );
        self.resources = Some(GiResources::new(device, queue, &self.config, width, height)?);
        self.frame.arm_history_clear();
        Ok(())
    }

    /// Drop every GPU resource. The next [`VoxelGi::enable`] starts clean.
    pub fn disable(&mut self) {
        if self.resources.take().is_some() {
            log::info!("disabling vxgi, releasing GPU resources");
        }
    }

    /// Replace the configuration, rebuilding resources when size-affecting
    /// fields changed.
    pub fn set_config(
        &mut self,
        device: &Device,
        queue: &Queue,
        config: GiConfig,
    ) -> RenderResult<()> {
        config.validate()?;
        let rebuild = self.config.needs_resource_rebuild(&config);
        self.config = config;
        self.frame = FrameContext::new(self.config.temporal.halton_count);
        if rebuild {
            if let Some(old) = self.resources.take() {
                let (w, h) = (old.screen.width, old.screen.height);
                drop(old);
                self.resources = Some(GiResources::new(device, queue, &self.config, w, h)?);
            }
        }
        self.frame.arm_history_clear();
        Ok(())
    }

    /// Record one full GI frame into `encoder`.
    pub fn render_frame(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut CommandEncoder,
        inputs: &FrameInputs<'_>,
        scene: &dyn SceneProvider,
    ) -> RenderResult<()> {
        if inputs.width == 0 || inputs.height == 0 {
            log::debug!("skipping vxgi frame for zero-sized target");
            return Ok(());
        }

        // A missing sun makes the injected volume all-black and the trace
        // meaningless; skip the frame rather than paying for it.
        debug_assert!(
            self.config.direct.sun.is_valid(),
            "vxgi requires a valid directional sun"
        );
        if !self.config.direct.sun.is_valid() {
            if !self.sun_warned {
                log::warn!("vxgi skipped: no valid directional sun configured");
                self.sun_warned = true;
            }
            return Ok(());
        }
        self.sun_warned = false;

        self.frame.begin_frame();
        let rig = CameraRig::new(&self.config, inputs.camera.position);
        let renderables = scene.renderables();
        let config = self.config.clone();

        let r = self.resources.as_mut().ok_or_else(|| {
            RenderError::render("render_frame called while disabled")
        })?;
        if r.screen.width != inputs.width || r.screen.height != inputs.height {
            r.screen = ScreenBuffers::new(device, inputs.width, inputs.height);
            self.frame.arm_history_clear();
        }
        let (width, height) = (inputs.width, inputs.height);

        if self.frame.take_history_clear() {
            for view in &r.screen.irradiance_views {
                r.clear.clear_screen(device, encoder, view, width, height);
            }
        }

        // Stage 1: rebuild the voxel G-buffer from scratch.
        r.clear.clear_grid(device, encoder, &r.grid);
        r.clear.clear_volume_mip0(device, encoder, &r.primary);
        r.shadow
            .render_depth(device, encoder, rig.shadow_view_proj, &renderables)?;
        r.voxelize
            .execute(device, queue, encoder, &rig, &config, &r.grid, &renderables)?;

        // Stage 2: inject shadowed sun light and build the mip pyramid.
        r.direct.execute(
            device,
            queue,
            encoder,
            &rig,
            &config,
            &r.grid,
            r.shadow.depth_view(),
            &r.primary,
        )?;
        r.mip
            .propagate(device, encoder, &r.primary, &r.primary_scratch)?;

        // Stage 3: optional second bounce, then the volume the screen trace
        // samples.
        let traced_volume = if config.indirect.second_bounce {
            r.clear.clear_volume_mip0(device, encoder, &r.indirect);
            r.bounce.execute(
                device,
                queue,
                encoder,
                &config,
                &r.grid,
                &r.primary,
                &r.indirect,
            )?;
            r.mip
                .propagate(device, encoder, &r.indirect, &r.indirect_scratch)?;
            &r.indirect
        } else {
            &r.primary
        };

        // Stage 4: per-pixel cone trace. The jitter sequence advances every
        // frame so toggling the temporal filter never replays offsets; only
        // the shader-side use of the offset is gated.
        let halton_offset = self.frame.jitter.next_offset();
        let blue_noise = inputs.blue_noise.as_ref().map(|n| BlueNoise {
            view: n.view,
            size: n.size,
        });
        r.trace.execute(
            device,
            queue,
            encoder,
            &inputs.camera,
            &rig,
            &config,
            halton_offset,
            config.temporal.enabled,
            inputs.scene_depth,
            inputs.scene_normal,
            traced_volume,
            blue_noise,
            &r.screen.trace_view,
            width,
            height,
        )?;

        // Stage 5: resolve. Bilateral output wins over temporal, temporal
        // over the raw trace.
        let mut indirect_source = &r.screen.trace_view;
        let temporal_write = self.frame.ping_pong.write_index();
        if config.temporal.enabled {
            r.temporal.execute(
                device,
                queue,
                encoder,
                &inputs.camera,
                self.frame.prev_view_proj,
                &config,
                &r.screen.trace_view,
                &r.screen.irradiance_views[self.frame.ping_pong.history_index()],
                inputs.scene_depth,
                &r.screen.irradiance_views[temporal_write],
                width,
                height,
            )?;
            indirect_source = &r.screen.irradiance_views[temporal_write];
        }
        if config.bilateral.enabled {
            r.bilateral.execute(
                device,
                queue,
                encoder,
                &config,
                inputs.camera.near,
                inputs.camera.far,
                indirect_source,
                inputs.scene_depth,
                inputs.scene_normal,
                &r.screen.bilateral_view,
                width,
                height,
            )?;
            indirect_source = &r.screen.bilateral_view;
        }

        // Stage 6: composition or debug passthrough.
        if config.debug.enabled {
            let screen_source = match CompositePass::debug_screen_source(config.debug.view) {
                Some(DebugScreenSource::Trace) | None => &r.screen.trace_view,
                Some(DebugScreenSource::Temporal) => &r.screen.irradiance_views[temporal_write],
                Some(DebugScreenSource::Bilateral) => &r.screen.bilateral_view,
            };
            r.composite.debug_view(
                device,
                queue,
                encoder,
                &inputs.camera,
                &rig,
                &config,
                &r.grid,
                &r.primary,
                &r.indirect,
                screen_source,
                inputs.output,
                width,
                height,
            )?;
        } else {
            r.composite.combine(
                device,
                queue,
                encoder,
                inputs.scene_direct,
                indirect_source,
                inputs.output,
                width,
                height,
            )?;
        }

        if config.temporal.enabled {
            self.frame.flip_ping_pong();
        }
        self.frame.end_frame(inputs.camera.view_proj());
        Ok(())
    }
}
