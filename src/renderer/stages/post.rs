// renderer/stages/post.rs
//
// Fullscreen and compute stages that read a few targets and write one.

use super::super::frame::FrameContext;
use super::super::stage::{PassIo, Stage, StageId, StageInit};
use super::super::targets::{BufferName, TargetName};
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferRef, BufferUsage, SamplerRef, SamplingFilter, TextureDesc, TextureFormat, TextureRef,
    TextureUsage,
};
use crate::resource::{ProgramHandle, ShaderDefine, ShaderKey};
use crate::settings::Resolution;

/// Mips of the downscale-blur chain.
pub const DOWNSCALE_MIP_COUNT: u32 = 4;
/// Compute workgroup edge.
const WORKGROUP_SIZE: u32 = 8;

const SAMPLED_WRITE: TextureUsage = TextureUsage::ATTACHMENT_WRITE.union(TextureUsage::SAMPLED_ALL);

#[derive(Debug)]
enum Output {
    Attachment {
        target: TextureRef,
        viewport: Resolution,
    },
    Compute {
        groups: [u32; 3],
    },
}

#[derive(Debug)]
pub struct PostStage {
    id: StageId,
    io: PassIo,
    program: ProgramHandle,
    inputs: Vec<(TextureRef, SamplerRef)>,
    buffers: Vec<BufferRef>,
    output: Output,
}

impl PostStage {
    /// Draws a fullscreen quad into `target`, which is moved to `active`.
    pub fn fullscreen(
        id: StageId,
        program: ProgramHandle,
        target: &TextureRef,
        active: TextureUsage,
    ) -> Self {
        let (width, height) = target.size();
        Self {
            id,
            io: PassIo::new().transition(target, active),
            program,
            inputs: Vec::new(),
            buffers: Vec::new(),
            output: Output::Attachment {
                target: TextureRef::clone(target),
                viewport: Resolution::new(width, height),
            },
        }
    }

    pub fn compute(id: StageId, program: ProgramHandle, groups: [u32; 3]) -> Self {
        Self {
            id,
            io: PassIo::new(),
            program,
            inputs: Vec::new(),
            buffers: Vec::new(),
            output: Output::Compute { groups },
        }
    }

    pub fn input(mut self, texture: &TextureRef, sampler: &SamplerRef, usage: TextureUsage) -> Self {
        self.io = self.io.read(texture, usage);
        self.inputs
            .push((TextureRef::clone(texture), SamplerRef::clone(sampler)));
        self
    }

    pub fn uniform_buffer(mut self, buffer: &BufferRef) -> Self {
        self.io = self.io.read_buffer(buffer, BufferUsage::UNIFORM);
        self.buffers.push(BufferRef::clone(buffer));
        self
    }

    /// A buffer the stage writes, moved to `active` while it runs.
    pub fn storage_buffer(mut self, buffer: &BufferRef, active: BufferUsage) -> Self {
        self.io = self.io.transition_buffer(buffer, active);
        self.buffers.push(BufferRef::clone(buffer));
        self
    }
}

impl Stage for PostStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let cmdb = &mut frame.command_buffer;
        cmdb.bind_program(self.program);
        for (slot, (texture, sampler)) in self.inputs.iter().enumerate() {
            cmdb.bind_texture(slot as u32, texture.id(), Some(sampler.id()));
        }
        for (slot, buffer) in self.buffers.iter().enumerate() {
            cmdb.bind_buffer(slot as u32, buffer.id());
        }

        match &self.output {
            Output::Attachment { target, viewport } => {
                cmdb.begin_render_pass(self.id.name(), vec![target.id()], false);
                cmdb.set_viewport(0, 0, viewport.width, viewport.height);
                cmdb.draw_fullscreen_quad();
                cmdb.end_render_pass();
            }
            Output::Compute { groups } => {
                cmdb.dispatch(groups[0], groups[1], groups[2]);
            }
        }
        Ok(())
    }
}

fn color_target(name: TargetName, size: Resolution, format: TextureFormat) -> TextureDesc {
    TextureDesc::render_target(
        name.to_string(),
        size.width,
        size.height,
        format,
        SAMPLED_WRITE,
        SamplingFilter::Linear,
        1,
    )
}

fn sized_key(source: &'static str, input: Resolution, output: Resolution) -> ShaderKey {
    ShaderKey::new(source)
        .define(ShaderDefine::InputWidth, input.width)
        .define(ShaderDefine::InputHeight, input.height)
        .define(ShaderDefine::RendererWidth, output.width)
        .define(ShaderDefine::RendererHeight, output.height)
}

fn groups_for(size: Resolution) -> [u32; 3] {
    [
        size.width.div_ceil(WORKGROUP_SIZE),
        size.height.div_ceil(WORKGROUP_SIZE),
        1,
    ]
}

pub fn depth_downscale_half(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let full = init.config.resolution;
    let half = full.half();
    let depth = init.texture(TargetName::GBufferDepth)?;
    // The forward pass depth-tests against this target.
    let target = init.create_render_target(
        TargetName::DepthHalf,
        TextureDesc::render_target(
            TargetName::DepthHalf.to_string(),
            half.width,
            half.height,
            TextureFormat::R32Float,
            SAMPLED_WRITE | TextureUsage::ATTACHMENT_READ,
            SamplingFilter::Linear,
            1,
        ),
    )?;
    let program = init.load_program(sized_key("shaders/DepthDownscale.frag", full, half))?;

    let stage = PostStage::fullscreen(
        StageId::DepthDownscaleHalf,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&depth, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

pub fn depth_downscale_quarter(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let half = init.config.resolution.half();
    let quarter = init.config.resolution.quarter();
    let input = init.texture(TargetName::DepthHalf)?;
    let target = init.create_render_target(
        TargetName::DepthQuarter,
        color_target(TargetName::DepthQuarter, quarter, TextureFormat::R32Float),
    )?;
    let program = init.load_program(sized_key("shaders/DepthDownscale.frag", half, quarter))?;

    let stage = PostStage::fullscreen(
        StageId::DepthDownscaleQuarter,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&input, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

pub fn volumetric_main(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let quarter = init.config.resolution.quarter();
    let depth = init.texture(TargetName::DepthQuarter)?;
    let shadow = init.texture(TargetName::ShadowMap)?;
    let target = init.create_render_target(
        TargetName::Volumetric,
        color_target(TargetName::Volumetric, quarter, TextureFormat::R11G11B10Float),
    )?;
    init.create_render_target(
        TargetName::VolumetricBlur,
        color_target(TargetName::VolumetricBlur, quarter, TextureFormat::R11G11B10Float),
    )?;
    let program = init.load_program(
        sized_key("shaders/Volumetric.frag", quarter, quarter)
            .define(ShaderDefine::ShadowMapSize, init.config.shadow_map_size),
    )?;

    let stage = PostStage::fullscreen(
        StageId::VolumetricMain,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&depth, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&shadow, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

/// Separable blur pass. Horizontal passes go `from -> to`, vertical passes
/// come back.
fn blur(
    init: &mut StageInit<'_>,
    id: StageId,
    from: TargetName,
    to: TargetName,
    horizontal: bool,
) -> Result<Box<dyn Stage>> {
    let input = init.texture(from)?;
    let target = init.texture(to)?;
    let (width, height) = target.size();
    let size = Resolution::new(width, height);
    let program = init.load_program(
        sized_key("shaders/GaussianBlur.frag", size, size)
            .define(ShaderDefine::Horizontal, u32::from(horizontal))
            .define(ShaderDefine::KernelSize, 7),
    )?;

    let stage = PostStage::fullscreen(id, program, &target, TextureUsage::ATTACHMENT_WRITE).input(
        &input,
        &init.shared.linear_sampler,
        TextureUsage::SAMPLED_FRAGMENT,
    );
    Ok(Box::new(stage))
}

pub fn volumetric_hblur(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    blur(
        init,
        StageId::VolumetricHBlur,
        TargetName::Volumetric,
        TargetName::VolumetricBlur,
        true,
    )
}

pub fn volumetric_vblur(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    blur(
        init,
        StageId::VolumetricVBlur,
        TargetName::VolumetricBlur,
        TargetName::Volumetric,
        false,
    )
}

pub fn ssao_main(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let quarter = init.config.resolution.quarter();
    let depth = init.texture(TargetName::DepthQuarter)?;
    let normals = init.texture(TargetName::GBufferNormal)?;
    let target = init.create_render_target(
        TargetName::Ssao,
        color_target(TargetName::Ssao, quarter, TextureFormat::R8Unorm),
    )?;
    init.create_render_target(
        TargetName::SsaoBlur,
        color_target(TargetName::SsaoBlur, quarter, TextureFormat::R8Unorm),
    )?;
    let program = init.load_program(
        sized_key("shaders/Ssao.frag", quarter, quarter).define(ShaderDefine::KernelSize, 16),
    )?;

    let stage = PostStage::fullscreen(StageId::SsaoMain, program, &target, TextureUsage::ATTACHMENT_WRITE)
        .input(&depth, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT)
        .input(&normals, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT)
        .input(
            &init.shared.dummy_texture,
            &init.shared.nearest_sampler,
            TextureUsage::SAMPLED_FRAGMENT,
        );
    Ok(Box::new(stage))
}

pub fn ssao_hblur(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    blur(init, StageId::SsaoHBlur, TargetName::Ssao, TargetName::SsaoBlur, true)
}

pub fn ssao_vblur(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    blur(init, StageId::SsaoVBlur, TargetName::SsaoBlur, TargetName::Ssao, false)
}

/// Composites the half-resolution forward result onto the lit image.
pub fn forward_upscale(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let full = init.config.resolution;
    let forward = init.texture(TargetName::Forward)?;
    let depth_half = init.texture(TargetName::DepthHalf)?;
    let depth = init.texture(TargetName::GBufferDepth)?;
    let target = init.texture(TargetName::LightShading)?;
    let program = init.load_program(sized_key("shaders/ForwardUpscale.frag", full.half(), full))?;

    let stage = PostStage::fullscreen(
        StageId::ForwardUpscale,
        program,
        &target,
        TextureUsage::ATTACHMENT_READ_WRITE,
    )
    .input(&forward, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&depth_half, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&depth, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

/// Both history targets are bound; the shader picks the current one from the
/// frame index.
fn temporal_inputs(init: &StageInit<'_>) -> Result<[TextureRef; 2]> {
    Ok([
        init.texture(TargetName::TemporalAa0)?,
        init.texture(TargetName::TemporalAa1)?,
    ])
}

pub fn downscale_blur(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let half = init.config.resolution.half();
    let [taa0, taa1] = temporal_inputs(init)?;
    let target = init.create_render_target(
        TargetName::Downscale,
        TextureDesc::render_target(
            TargetName::Downscale.to_string(),
            half.width,
            half.height,
            TextureFormat::R11G11B10Float,
            SAMPLED_WRITE,
            SamplingFilter::Linear,
            DOWNSCALE_MIP_COUNT,
        ),
    )?;
    let program = init.load_program(
        sized_key("shaders/DownscaleBlur.frag", init.config.resolution, half)
            .define(ShaderDefine::MipmapCount, DOWNSCALE_MIP_COUNT),
    )?;

    let stage = PostStage::fullscreen(
        StageId::DownscaleBlur,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&taa0, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&taa1, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

/// Computes average luminance into the exposure buffer.
pub fn tonemapping(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let downscale = init.texture(TargetName::Downscale)?;
    let (width, height) = downscale.size();
    let smallest = Resolution::new(
        (width >> (DOWNSCALE_MIP_COUNT - 1)).max(1),
        (height >> (DOWNSCALE_MIP_COUNT - 1)).max(1),
    );
    let luminance = init.create_buffer(
        BufferName::Luminance,
        BufferDesc::new(
            BufferName::Luminance.to_string(),
            16,
            BufferUsage::UNIFORM | BufferUsage::STORAGE_READ_WRITE,
        ),
    )?;
    let program = init.load_program(
        sized_key("shaders/TonemappingAverageLuminance.comp", smallest, smallest)
            .define(ShaderDefine::MipmapCount, DOWNSCALE_MIP_COUNT),
    )?;

    let stage = PostStage::compute(StageId::Tonemapping, program, groups_for(smallest))
        .input(&downscale, &init.shared.linear_sampler, TextureUsage::SAMPLED_COMPUTE)
        .storage_buffer(&luminance, BufferUsage::STORAGE_READ_WRITE);
    Ok(Box::new(stage))
}

pub fn bloom_extract(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let quarter = init.config.resolution.quarter();
    let [taa0, taa1] = temporal_inputs(init)?;
    let luminance = init.buffer(BufferName::Luminance)?;
    let target = init.create_render_target(
        TargetName::BloomExtract,
        color_target(TargetName::BloomExtract, quarter, TextureFormat::R11G11B10Float),
    )?;
    let program = init.load_program(sized_key(
        "shaders/BloomExtract.frag",
        init.config.resolution,
        quarter,
    ))?;

    let stage = PostStage::fullscreen(
        StageId::BloomExtract,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&taa0, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&taa1, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .uniform_buffer(&luminance);
    Ok(Box::new(stage))
}

pub fn bloom_upscale(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let quarter = init.config.resolution.quarter();
    let half = init.config.resolution.half();
    let input = init.texture(TargetName::BloomExtract)?;
    let target = init.create_render_target(
        TargetName::BloomUpscale,
        color_target(TargetName::BloomUpscale, half, TextureFormat::R11G11B10Float),
    )?;
    let program = init.load_program(sized_key("shaders/BloomUpscale.frag", quarter, half))?;

    let stage = PostStage::fullscreen(
        StageId::BloomUpscale,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&input, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

/// Writes the presentable image. The target rests in `PRESENT` between frames.
pub fn final_composite(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let full = init.config.resolution;
    let [taa0, taa1] = temporal_inputs(init)?;
    let bloom = init.texture(TargetName::BloomUpscale)?;
    let overlay = init.texture(TargetName::DebugOverlay)?;
    let luminance = init.buffer(BufferName::Luminance)?;
    let target = init.create_render_target(
        TargetName::Present,
        TextureDesc::render_target(
            TargetName::Present.to_string(),
            full.width,
            full.height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::ATTACHMENT_WRITE | TextureUsage::PRESENT,
            SamplingFilter::Nearest,
            1,
        )
        .with_initial_usage(TextureUsage::PRESENT),
    )?;
    let program = init.load_program(sized_key("shaders/FinalComposite.frag", full, full))?;

    let stage = PostStage::fullscreen(
        StageId::FinalComposite,
        program,
        &target,
        TextureUsage::ATTACHMENT_WRITE,
    )
    .input(&taa0, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&taa1, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&bloom, &init.shared.linear_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .input(&overlay, &init.shared.nearest_sampler, TextureUsage::SAMPLED_FRAGMENT)
    .uniform_buffer(&luminance);
    Ok(Box::new(stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_groups_cover_partial_tiles() {
        assert_eq!(groups_for(Resolution::new(17, 8)), [3, 1, 1]);
        assert_eq!(groups_for(Resolution::new(1, 1)), [1, 1, 1]);
    }
}
