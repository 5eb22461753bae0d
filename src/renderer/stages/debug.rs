// renderer/stages/debug.rs
use super::super::frame::FrameContext;
use super::super::stage::{PassIo, RenderFlags, Stage, StageId, StageInit};
use super::super::targets::TargetName;
use crate::error::Result;
use crate::gpu::{SamplingFilter, TextureDesc, TextureFormat, TextureRef, TextureUsage};
use crate::resource::{ProgramHandle, ShaderKey};

/// Light-volume overlay, only run while the debug overlay flag is set.
/// Its target stays allocated either way so the final composite can always
/// sample it.
pub struct DebugStage {
    io: PassIo,
    program: ProgramHandle,
    target: TextureRef,
}

impl DebugStage {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let size = init.config.resolution;
        let depth = init.texture(TargetName::GBufferDepth)?;
        let target = init.create_render_target(
            TargetName::DebugOverlay,
            TextureDesc::render_target(
                TargetName::DebugOverlay.to_string(),
                size.width,
                size.height,
                TextureFormat::Rgba8Unorm,
                TextureUsage::ATTACHMENT_WRITE | TextureUsage::SAMPLED_ALL,
                SamplingFilter::Nearest,
                1,
            ),
        )?;
        let program = init.load_program(ShaderKey::new("shaders/Dbg.frag"))?;

        Ok(Self {
            io: PassIo::new()
                .read(&depth, TextureUsage::SAMPLED_FRAGMENT)
                .transition(&target, TextureUsage::ATTACHMENT_WRITE),
            program,
            target,
        })
    }
}

impl Stage for DebugStage {
    fn id(&self) -> StageId {
        StageId::Debug
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn is_enabled(&self, flags: &RenderFlags) -> bool {
        flags.debug_overlay
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let lights = frame.visibility().lights.len();
        let (width, height) = self.target.size();
        let cmdb = &mut frame.command_buffer;

        cmdb.begin_render_pass(StageId::Debug.name(), vec![self.target.id()], true);
        cmdb.set_viewport(0, 0, width, height);
        cmdb.bind_program(self.program);
        for _ in 0..lights {
            cmdb.draw_fullscreen_quad();
        }
        cmdb.end_render_pass();
        Ok(())
    }
}
