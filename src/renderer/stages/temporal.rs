// renderer/stages/temporal.rs
//
// Temporal anti-aliasing ping-pongs between two history targets: even frames
// write the first and read the second, odd frames the other way round.

use super::super::frame::FrameContext;
use super::super::stage::{PassIo, Stage, StageId, StageInit};
use super::super::targets::TargetName;
use crate::error::Result;
use crate::gpu::{SamplerRef, SamplingFilter, TextureDesc, TextureFormat, TextureRef, TextureUsage};
use crate::resource::{ProgramHandle, ShaderDefine, ShaderKey};

pub struct TemporalAaStage {
    program: ProgramHandle,
    history: [TextureRef; 2],
    lit: TextureRef,
    depth: TextureRef,
    sampler: SamplerRef,
    /// One declaration set per parity.
    io: [PassIo; 2],
    current: usize,
}

impl TemporalAaStage {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let size = init.config.resolution;
        let lit = init.texture(TargetName::LightShading)?;
        let depth = init.texture(TargetName::GBufferDepth)?;

        let mut create = |name: TargetName| {
            init.create_render_target(
                name,
                TextureDesc::render_target(
                    name.to_string(),
                    size.width,
                    size.height,
                    TextureFormat::Rgba16Float,
                    TextureUsage::ATTACHMENT_WRITE | TextureUsage::SAMPLED_ALL,
                    SamplingFilter::Linear,
                    1,
                ),
            )
        };
        let history = [create(TargetName::TemporalAa0)?, create(TargetName::TemporalAa1)?];

        let program = init.load_program(
            ShaderKey::new("shaders/TemporalAa.frag")
                .define(ShaderDefine::RendererWidth, size.width)
                .define(ShaderDefine::RendererHeight, size.height),
        )?;

        let io = [0usize, 1].map(|current| {
            PassIo::new()
                .read(&lit, TextureUsage::SAMPLED_FRAGMENT)
                .read(&depth, TextureUsage::SAMPLED_FRAGMENT)
                .read(&history[1 - current], TextureUsage::SAMPLED_FRAGMENT)
                .transition(&history[current], TextureUsage::ATTACHMENT_WRITE)
        });

        Ok(Self {
            program,
            history,
            lit,
            depth,
            sampler: SamplerRef::clone(&init.shared.linear_sampler),
            io,
            current: 0,
        })
    }
}

impl Stage for TemporalAaStage {
    fn id(&self) -> StageId {
        StageId::TemporalAa
    }

    fn io(&self) -> &PassIo {
        &self.io[self.current]
    }

    fn begin_frame(&mut self, frame_index: u64) {
        self.current = (frame_index & 1) as usize;
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let target = &self.history[self.current];
        let previous = &self.history[1 - self.current];
        let (width, height) = target.size();
        let cmdb = &mut frame.command_buffer;

        cmdb.begin_render_pass(StageId::TemporalAa.name(), vec![target.id()], false);
        cmdb.set_viewport(0, 0, width, height);
        cmdb.bind_program(self.program);
        cmdb.bind_texture(0, self.lit.id(), Some(self.sampler.id()));
        cmdb.bind_texture(1, self.depth.id(), Some(self.sampler.id()));
        cmdb.bind_texture(2, previous.id(), Some(self.sampler.id()));
        cmdb.draw_fullscreen_quad();
        cmdb.end_render_pass();
        Ok(())
    }
}
