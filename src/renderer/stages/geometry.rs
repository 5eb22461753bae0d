// renderer/stages/geometry.rs
//
// Stages that replay the worker-built fragments inside one render pass.

use super::super::frame::{FrameContext, FrameView};
use super::super::scheduler::{PassTargets, TrailingDraws};
use super::super::stage::{PassIo, Stage, StageId, StageInit};
use super::super::targets::TargetName;
use crate::error::Result;
use crate::gpu::{
    CommandBuffer, SamplerRef, SamplingFilter, TextureDesc, TextureFormat, TextureRef, TextureUsage,
};
use crate::resource::{ProgramHandle, ShaderDefine, ShaderKey};
use crate::settings::Resolution;
use crate::visibility::{PassCategory, VisibilityResults};

const GBUFFER_COLOR: TextureUsage = TextureUsage::ATTACHMENT_WRITE;
const GBUFFER_DEPTH: TextureUsage = TextureUsage::ATTACHMENT_READ_WRITE;
const FORWARD_COLOR: TextureUsage = TextureUsage::ATTACHMENT_READ_WRITE;
const FORWARD_DEPTH: TextureUsage = TextureUsage::ATTACHMENT_READ.union(TextureUsage::SAMPLED_FRAGMENT);
const SHADOW_DEPTH: TextureUsage = TextureUsage::ATTACHMENT_READ_WRITE;

#[derive(Debug, Clone, Copy)]
enum FragmentSource {
    Category(PassCategory),
    Shadow,
}

/// Opens a render pass over `attachments` and executes every fragment the
/// scheduler built for `source`, in worker order.
#[derive(Debug)]
pub struct FragmentPassStage {
    id: StageId,
    io: PassIo,
    attachments: Vec<TextureRef>,
    source: FragmentSource,
}

impl FragmentPassStage {
    fn new(id: StageId, source: FragmentSource) -> Self {
        Self {
            id,
            io: PassIo::new(),
            attachments: Vec::new(),
            source,
        }
    }

    fn attach(mut self, texture: &TextureRef, active: TextureUsage) -> Self {
        self.io = self.io.transition(texture, active);
        self.attachments.push(TextureRef::clone(texture));
        self
    }

    fn read(mut self, texture: &TextureRef, usage: TextureUsage) -> Self {
        self.io = self.io.read(texture, usage);
        self
    }
}

impl Stage for FragmentPassStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let fragments = match self.source {
            FragmentSource::Category(category) => frame.take_fragments(category),
            FragmentSource::Shadow => frame.take_shadow_fragments(),
        };

        let cmdb = &mut frame.command_buffer;
        let attachments = self.attachments.iter().map(|texture| texture.id()).collect();
        cmdb.begin_render_pass(self.id.name(), attachments, true);
        for fragment in fragments {
            cmdb.execute_secondary(fragment);
        }
        cmdb.end_render_pass();
        Ok(())
    }
}

fn target_desc(
    name: TargetName,
    size: Resolution,
    format: TextureFormat,
    usage: TextureUsage,
) -> TextureDesc {
    TextureDesc::render_target(
        name.to_string(),
        size.width,
        size.height,
        format,
        usage | TextureUsage::SAMPLED_ALL,
        SamplingFilter::Nearest,
        1,
    )
}

pub fn shadow_mapping(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let size = init.config.shadow_map_size;
    let shadow_map = init.create_render_target(
        TargetName::ShadowMap,
        target_desc(
            TargetName::ShadowMap,
            Resolution::new(size, size),
            TextureFormat::Depth32Float,
            SHADOW_DEPTH,
        ),
    )?;

    let stage = FragmentPassStage::new(StageId::ShadowMapping, FragmentSource::Shadow)
        .attach(&shadow_map, SHADOW_DEPTH);
    Ok(Box::new(stage))
}

pub fn gbuffer(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let size = init.config.resolution;
    let albedo = init.create_render_target(
        TargetName::GBufferAlbedo,
        target_desc(TargetName::GBufferAlbedo, size, TextureFormat::Rgba8Unorm, GBUFFER_COLOR),
    )?;
    let normal = init.create_render_target(
        TargetName::GBufferNormal,
        target_desc(TargetName::GBufferNormal, size, TextureFormat::Rgba16Float, GBUFFER_COLOR),
    )?;
    let depth = init.create_render_target(
        TargetName::GBufferDepth,
        target_desc(TargetName::GBufferDepth, size, TextureFormat::Depth24Stencil8, GBUFFER_DEPTH),
    )?;

    let stage = FragmentPassStage::new(
        StageId::GBuffer,
        FragmentSource::Category(PassCategory::Opaque),
    )
    .attach(&albedo, GBUFFER_COLOR)
    .attach(&normal, GBUFFER_COLOR)
    .attach(&depth, GBUFFER_DEPTH);
    Ok(Box::new(stage))
}

/// Half-resolution forward pass for transparent geometry. Depth is tested
/// against the downscaled G-buffer depth.
pub fn forward_shading(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    let half = init.config.resolution.half();
    let depth_half = init.texture(TargetName::DepthHalf)?;
    let volumetric = init.texture(TargetName::Volumetric)?;
    let forward = init.create_render_target(
        TargetName::Forward,
        target_desc(TargetName::Forward, half, TextureFormat::Rgba16Float, FORWARD_COLOR),
    )?;

    let stage = FragmentPassStage::new(
        StageId::ForwardShading,
        FragmentSource::Category(PassCategory::Transparent),
    )
    .attach(&forward, FORWARD_COLOR)
    .attach(&depth_half, FORWARD_DEPTH)
    .read(&volumetric, TextureUsage::SAMPLED_FRAGMENT);
    Ok(Box::new(stage))
}

/// Fragment setup for the opaque, transparent and shadow passes, matching
/// the usages the stages above move their attachments into.
pub fn pass_targets(init: &StageInit<'_>) -> Result<[PassTargets; 3]> {
    let full = init.config.resolution;
    let shadow_size = init.config.shadow_map_size;

    let opaque = PassTargets::new(StageId::GBuffer.name(), full)
        .inform(&init.texture(TargetName::GBufferAlbedo)?, GBUFFER_COLOR)
        .inform(&init.texture(TargetName::GBufferNormal)?, GBUFFER_COLOR)
        .inform(&init.texture(TargetName::GBufferDepth)?, GBUFFER_DEPTH);
    let transparent = PassTargets::new(StageId::ForwardShading.name(), full.half())
        .inform(&init.texture(TargetName::Forward)?, FORWARD_COLOR)
        .inform(&init.texture(TargetName::DepthHalf)?, FORWARD_DEPTH);
    let shadow = PassTargets::new(
        StageId::ShadowMapping.name(),
        Resolution::new(shadow_size, shadow_size),
    )
    .inform(&init.texture(TargetName::ShadowMap)?, SHADOW_DEPTH);

    Ok([opaque, transparent, shadow])
}

/// Blends the blurred volumetric fog over the forward target. Trails the
/// transparent pass.
pub struct VolumetricComposite {
    program: ProgramHandle,
    volumetric: TextureRef,
    sampler: SamplerRef,
}

impl VolumetricComposite {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let half = init.config.resolution.half();
        let program = init.load_program(
            ShaderKey::new("shaders/VolumetricComposite.frag")
                .define(ShaderDefine::RendererWidth, half.width)
                .define(ShaderDefine::RendererHeight, half.height),
        )?;

        Ok(Self {
            program,
            volumetric: init.texture(TargetName::Volumetric)?,
            sampler: SamplerRef::clone(&init.shared.linear_sampler),
        })
    }
}

impl TrailingDraws for VolumetricComposite {
    fn record(
        &self,
        _view: &FrameView,
        _visibility: &VisibilityResults,
        cmdb: &mut CommandBuffer,
    ) -> Result<()> {
        cmdb.bind_program(self.program);
        cmdb.bind_texture(0, self.volumetric.id(), Some(self.sampler.id()));
        cmdb.draw_fullscreen_quad();
        Ok(())
    }
}
