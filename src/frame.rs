//! Per-frame mutable state, threaded explicitly through the stages.
//!
//! Everything that survives from one frame to the next (the ping-pong
//! selector, the one-shot history clear, the jitter counter) lives here and
//! is mutated only at frame boundaries, never mid-stage.

use crate::sampling::JitterSequence;
use glam::{Mat4, Vec3};

/// Selects which of the two screen irradiance buffers is history and which
/// is the current write target. Flips exactly once per frame in which the
/// temporal filter runs, after all of its consumers have resolved reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingPong {
    flag: bool,
}

impl PingPong {
    /// Buffer holding last frame's blended irradiance.
    pub fn history_index(&self) -> usize {
        if self.flag {
            0
        } else {
            1
        }
    }

    /// Buffer the temporal filter writes this frame.
    pub fn write_index(&self) -> usize {
        1 - self.history_index()
    }

    pub fn flip(&mut self) {
        self.flag = !self.flag;
    }
}

/// Host camera data for the frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame {
    pub view: Mat4,
    pub proj: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl CameraFrame {
    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }
}

/// Cross-frame state owned by the orchestrator.
#[derive(Debug)]
pub struct FrameContext {
    pub ping_pong: PingPong,
    /// Armed on (re)enable; the first frame afterwards clears both history
    /// buffers to black before any trace writes.
    needs_history_clear: bool,
    pub jitter: JitterSequence,
    pub frame_index: u64,
    /// Previous frame's view-projection, used to reproject history.
    pub prev_view_proj: Mat4,
    flipped_this_frame: bool,
}

impl FrameContext {
    pub fn new(halton_count: u32) -> Self {
        Self {
            ping_pong: PingPong::default(),
            needs_history_clear: true,
            jitter: JitterSequence::new(halton_count),
            frame_index: 0,
            prev_view_proj: Mat4::IDENTITY,
            flipped_this_frame: false,
        }
    }

    /// Re-arm the one-shot clear (called on enable).
    pub fn arm_history_clear(&mut self) {
        self.needs_history_clear = true;
        self.jitter.reset();
        self.flipped_this_frame = false;
    }

    /// Consume the one-shot clear flag; true on the first frame after
    /// (re)enabling only.
    pub fn take_history_clear(&mut self) -> bool {
        std::mem::take(&mut self.needs_history_clear)
    }

    pub fn begin_frame(&mut self) {
        self.flipped_this_frame = false;
    }

    /// Flip the ping-pong selector; a second flip within one frame is a
    /// stage-ordering bug and is ignored.
    pub fn flip_ping_pong(&mut self) {
        if self.flipped_this_frame {
            log::warn!("ping-pong flip requested twice in one frame; ignoring");
            return;
        }
        self.ping_pong.flip();
        self.flipped_this_frame = true;
    }

    pub fn end_frame(&mut self, view_proj: Mat4) {
        self.prev_view_proj = view_proj;
        self.frame_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_history_is_previous_write() {
        let mut pp = PingPong::default();
        for _ in 0..16 {
            let written = pp.write_index();
            pp.flip();
            assert_eq!(pp.history_index(), written);
            assert_ne!(pp.history_index(), pp.write_index());
        }
    }

    #[test]
    fn history_clear_fires_once_per_enable_cycle() {
        let mut ctx = FrameContext::new(8);
        assert!(ctx.take_history_clear());
        for _ in 0..8 {
            assert!(!ctx.take_history_clear());
        }
        ctx.arm_history_clear();
        assert!(ctx.take_history_clear());
        assert!(!ctx.take_history_clear());
    }

    #[test]
    fn flip_is_once_per_frame() {
        let mut ctx = FrameContext::new(8);
        ctx.begin_frame();
        let before = ctx.ping_pong.history_index();
        ctx.flip_ping_pong();
        ctx.flip_ping_pong(); // ignored
        assert_ne!(ctx.ping_pong.history_index(), before);
        ctx.begin_frame();
        ctx.flip_ping_pong();
        assert_eq!(ctx.ping_pong.history_index(), before);
    }
}
