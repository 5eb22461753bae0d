// renderer/frame.rs
//
// Per-frame state. A FrameContext lives for exactly one render_frame call;
// only FrameHistory survives between frames.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};

use super::partition::WorkerId;
use crate::gpu::{CommandBuffer, CommandBufferFlags, CommandBufferInit};
use crate::visibility::{PassCategory, VisibilityResults};

/// Camera matrices for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameView {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// World transform of the camera (inverse of `view`).
    pub camera_transform: Mat4,
}

impl FrameView {
    pub fn from_camera(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_transform: view.inverse(),
        }
    }
}

impl Default for FrameView {
    fn default() -> Self {
        Self::from_camera(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// The only state carried from one frame into the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHistory {
    pub prev_view_projection: Mat4,
    pub prev_camera_transform: Mat4,
    pub frame_count: u64,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self {
            prev_view_projection: Mat4::IDENTITY,
            prev_camera_transform: Mat4::IDENTITY,
            frame_count: 0,
        }
    }
}

impl FrameHistory {
    /// Stashes this frame's camera for the next frame's temporal stages.
    pub fn advance(&mut self, view: &FrameView) {
        self.prev_view_projection = view.view_projection;
        self.prev_camera_transform = view.camera_transform;
        self.frame_count += 1;
    }
}

/// Fragments built for one pass category.
#[derive(Debug, Default)]
pub struct PassBookkeeping {
    pub last_worker_with_work: Option<WorkerId>,
    /// One slot per worker; `None` when that worker produced nothing.
    pub fragments: Vec<Option<CommandBuffer>>,
}

impl PassBookkeeping {
    pub fn fragment_count(&self) -> usize {
        self.fragments.iter().flatten().count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub fragments: [usize; 2],
    /// Instanced draws emitted by the batcher. Trailing fullscreen draws are
    /// not included.
    pub draw_calls: [usize; 2],
    pub shadow_draw_calls: usize,
    pub merged_draw_calls: u32,
    pub barriers: usize,
    pub stages_executed: usize,
}

impl FrameStats {
    pub fn fragments(&self, category: PassCategory) -> usize {
        self.fragments[category.index()]
    }

    pub fn draw_calls(&self, category: PassCategory) -> usize {
        self.draw_calls[category.index()]
    }
}

pub struct FrameContext<'a> {
    pub view: FrameView,
    visibility: &'a VisibilityResults,

    // Filled in by the renderer before any stage runs.
    pub frame_index: u64,
    pub jitter: Mat4,
    pub projection_jitter: Mat4,
    pub view_projection_jitter: Mat4,
    pub prev_view_projection: Mat4,
    pub prev_camera_transform: Mat4,
    pub resources_dirty: bool,

    passes: [PassBookkeeping; 2],
    pub(crate) shadow_fragments: Vec<Option<CommandBuffer>>,
    /// Primary buffer every stage records into.
    pub command_buffer: CommandBuffer,
    pub stats: FrameStats,
}

impl<'a> FrameContext<'a> {
    pub fn new(view: FrameView, visibility: &'a VisibilityResults) -> Self {
        Self {
            view,
            visibility,
            frame_index: 0,
            jitter: Mat4::IDENTITY,
            projection_jitter: view.projection,
            view_projection_jitter: view.view_projection,
            prev_view_projection: Mat4::IDENTITY,
            prev_camera_transform: Mat4::IDENTITY,
            resources_dirty: false,
            passes: Default::default(),
            shadow_fragments: Vec::new(),
            command_buffer: CommandBuffer::new(CommandBufferInit::new(
                "frame",
                CommandBufferFlags::GRAPHICS_WORK | CommandBufferFlags::COMPUTE_WORK,
            )),
            stats: FrameStats::default(),
        }
    }

    pub fn visibility(&self) -> &'a VisibilityResults {
        self.visibility
    }

    pub fn pass(&self, category: PassCategory) -> &PassBookkeeping {
        &self.passes[category.index()]
    }

    pub(crate) fn pass_mut(&mut self, category: PassCategory) -> &mut PassBookkeeping {
        &mut self.passes[category.index()]
    }

    /// Moves the sealed fragments of `category` out, in worker order.
    pub fn take_fragments(&mut self, category: PassCategory) -> Vec<CommandBuffer> {
        self.passes[category.index()]
            .fragments
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    pub fn take_shadow_fragments(&mut self) -> Vec<CommandBuffer> {
        self.shadow_fragments
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    /// Sub-pixel offset of this frame's jitter in NDC.
    pub fn jitter_offset(&self) -> Vec2 {
        self.jitter.w_axis.truncate().truncate()
    }

    pub fn uniforms(&self) -> FrameUniforms {
        let offset = self.jitter_offset();
        FrameUniforms {
            view_projection: self.view.view_projection.to_cols_array_2d(),
            view_projection_jitter: self.view_projection_jitter.to_cols_array_2d(),
            prev_view_projection: self.prev_view_projection.to_cols_array_2d(),
            camera_transform: self.view.camera_transform.to_cols_array_2d(),
            frame_jitter: [self.frame_index as f32, offset.x, offset.y, 0.0],
        }
    }
}

/// Uploaded once at the top of every frame.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct FrameUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub view_projection_jitter: [[f32; 4]; 4],
    pub prev_view_projection: [[f32; 4]; 4],
    pub camera_transform: [[f32; 4]; 4],
    /// x = frame index, yz = jitter offset.
    pub frame_jitter: [f32; 4],
}
