// renderer/stages/indirect.rs
//
// Re-renders the reflection probes visibility flagged this frame, one cube
// face at a time, before any other stage samples them.

use super::super::frame::FrameContext;
use super::super::stage::{PassIo, Stage, StageId, StageInit};
use super::super::targets::TargetName;
use crate::error::Result;
use crate::gpu::{
    SamplingFilter, TextureDesc, TextureFormat, TextureKind, TextureRef, TextureUsage,
};
use crate::resource::{ProgramHandle, ShaderDefine, ShaderKey};

pub const PROBE_SIZE: u32 = 64;
/// Probes refreshed per frame at most; the rest wait for later frames.
pub const MAX_PROBES_PER_FRAME: usize = 2;

pub struct IndirectStage {
    io: PassIo,
    program: ProgramHandle,
    probes: TextureRef,
    pending: usize,
}

impl IndirectStage {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let probes = init.create_render_target(
            TargetName::ReflectionProbes,
            TextureDesc::render_target(
                TargetName::ReflectionProbes.to_string(),
                PROBE_SIZE,
                PROBE_SIZE,
                TextureFormat::R11G11B10Float,
                TextureUsage::ATTACHMENT_WRITE | TextureUsage::SAMPLED_ALL,
                SamplingFilter::Linear,
                1,
            )
            .with_kind(TextureKind::Cube),
        )?;
        let program = init.load_program(
            ShaderKey::new("shaders/ReflectionProbe.frag")
                .define(ShaderDefine::RendererWidth, PROBE_SIZE)
                .define(ShaderDefine::RendererHeight, PROBE_SIZE),
        )?;

        Ok(Self {
            io: PassIo::new().transition(&probes, TextureUsage::ATTACHMENT_WRITE),
            program,
            probes,
            pending: 0,
        })
    }
}

impl Stage for IndirectStage {
    fn id(&self) -> StageId {
        StageId::Indirect
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn prepare(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let requested = frame.visibility().reflection_probes;
        self.pending = requested.min(MAX_PROBES_PER_FRAME);
        if requested > self.pending {
            log::debug!(
                "Deferring {} reflection probe updates",
                requested - self.pending
            );
        }
        Ok(())
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }

        let cmdb = &mut frame.command_buffer;
        cmdb.bind_program(self.program);
        for _ in 0..self.pending {
            for face in 0..TextureKind::Cube.face_count() {
                cmdb.begin_render_pass(StageId::Indirect.name(), vec![self.probes.id()], true);
                cmdb.upload_uniforms(0, bytemuck::bytes_of(&face));
                cmdb.set_viewport(0, 0, PROBE_SIZE, PROBE_SIZE);
                cmdb.draw_fullscreen_quad();
                cmdb.end_render_pass();
            }
        }
        Ok(())
    }
}
