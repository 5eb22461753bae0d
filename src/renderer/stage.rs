// renderer/stage.rs
//
// The uniform capability interface every rendering stage implements, plus the
// context stages are constructed with.

use std::fmt;
use std::sync::Arc;

use super::barrier::{Barrier, ResourceUsage};
use super::frame::FrameContext;
use super::targets::{BufferName, RenderTargets, TargetName};
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferRef, BufferUsage, CommandBuffer, CommandBufferFlags, CommandBufferInit,
    GpuDevice, SamplerRef, SurfaceInfo, TextureDesc, TextureRef, TextureUsage,
    SMALL_BATCH_MAX_COMMANDS,
};
use crate::resource::{ProgramCache, ProgramHandle, ResourceProvider, ShaderKey};
use crate::settings::RendererConfig;

/// Identity of a stage. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    Indirect,
    ShadowMapping,
    GBuffer,
    DepthDownscaleHalf,
    DepthDownscaleQuarter,
    VolumetricMain,
    SsaoMain,
    VolumetricHBlur,
    SsaoHBlur,
    VolumetricVBlur,
    SsaoVBlur,
    LightShading,
    ForwardShading,
    ForwardUpscale,
    TemporalAa,
    DownscaleBlur,
    Tonemapping,
    BloomExtract,
    BloomUpscale,
    Debug,
    FinalComposite,
}

impl StageId {
    pub const ORDER: [StageId; 21] = [
        StageId::Indirect,
        StageId::ShadowMapping,
        StageId::GBuffer,
        StageId::DepthDownscaleHalf,
        StageId::DepthDownscaleQuarter,
        StageId::VolumetricMain,
        StageId::SsaoMain,
        StageId::VolumetricHBlur,
        StageId::SsaoHBlur,
        StageId::VolumetricVBlur,
        StageId::SsaoVBlur,
        StageId::LightShading,
        StageId::ForwardShading,
        StageId::ForwardUpscale,
        StageId::TemporalAa,
        StageId::DownscaleBlur,
        StageId::Tonemapping,
        StageId::BloomExtract,
        StageId::BloomUpscale,
        StageId::Debug,
        StageId::FinalComposite,
    ];

    /// Position in the fixed execution order.
    pub fn order(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Indirect => "indirect",
            Self::ShadowMapping => "shadow_mapping",
            Self::GBuffer => "gbuffer",
            Self::DepthDownscaleHalf => "depth_downscale_half",
            Self::DepthDownscaleQuarter => "depth_downscale_quarter",
            Self::VolumetricMain => "volumetric_main",
            Self::SsaoMain => "ssao_main",
            Self::VolumetricHBlur => "volumetric_hblur",
            Self::SsaoHBlur => "ssao_hblur",
            Self::VolumetricVBlur => "volumetric_vblur",
            Self::SsaoVBlur => "ssao_vblur",
            Self::LightShading => "light_shading",
            Self::ForwardShading => "forward_shading",
            Self::ForwardUpscale => "forward_upscale",
            Self::TemporalAa => "temporal_aa",
            Self::DownscaleBlur => "downscale_blur",
            Self::Tonemapping => "tonemapping",
            Self::BloomExtract => "bloom_extract",
            Self::BloomUpscale => "bloom_upscale",
            Self::Debug => "debug",
            Self::FinalComposite => "final_composite",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime switches consulted before each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderFlags {
    pub debug_overlay: bool,
}

/// One ordered step of the frame.
///
/// A stage never infers hazards. It declares the usage each resource must be
/// moved into before it runs and the usage it leaves the resource in after,
/// and the renderer records those transitions around [`Stage::run`].
pub trait Stage: Send {
    fn id(&self) -> StageId;

    /// Reads and transitions of the current frame.
    fn io(&self) -> &PassIo;

    fn is_enabled(&self, _flags: &RenderFlags) -> bool {
        true
    }

    /// Called for every frame, disabled or not, before any declaration is
    /// queried.
    fn begin_frame(&mut self, _frame_index: u64) {}

    /// Pre-pass work, recorded before command buffers are built.
    fn prepare(&mut self, _frame: &mut FrameContext<'_>) -> Result<()> {
        Ok(())
    }

    fn declare_pre_barriers(&self, out: &mut Vec<Barrier>) {
        self.io().pre_barriers(out);
    }

    fn declare_post_barriers(&self, out: &mut Vec<Barrier>) {
        self.io().post_barriers(out);
    }

    /// Usages that must hold while `run` executes.
    fn declare_usages(&self, out: &mut Vec<ResourceUsage>) {
        self.io().usages(out);
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()>;
}

/// Resource declarations of one stage.
///
/// Resources rest in their initial usage between stages. A transition moves
/// every surface from rest into the active usage before the stage and back
/// afterwards; a read only requires the rest usage to cover it.
#[derive(Debug, Clone, Default)]
pub struct PassIo {
    reads: Vec<ResourceUsage>,
    transitions: Vec<(TextureRef, TextureUsage)>,
    buffer_transitions: Vec<(BufferRef, BufferUsage)>,
}

impl PassIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, texture: &TextureRef, usage: TextureUsage) -> Self {
        self.reads.push(ResourceUsage::texture(texture, usage));
        self
    }

    pub fn read_buffer(mut self, buffer: &BufferRef, usage: BufferUsage) -> Self {
        self.reads.push(ResourceUsage::buffer(buffer, usage));
        self
    }

    /// Moves every surface of `texture` into `active` for the stage.
    pub fn transition(mut self, texture: &TextureRef, active: TextureUsage) -> Self {
        self.transitions.push((TextureRef::clone(texture), active));
        self
    }

    pub fn transition_buffer(mut self, buffer: &BufferRef, active: BufferUsage) -> Self {
        self.buffer_transitions.push((BufferRef::clone(buffer), active));
        self
    }

    fn surfaces(&self) -> impl Iterator<Item = (&TextureRef, SurfaceInfo, TextureUsage, TextureUsage)> {
        self.transitions.iter().flat_map(|(texture, active)| {
            let rest = texture.desc().initial_usage;
            texture
                .desc()
                .surfaces()
                .map(move |surface| (texture, surface, rest, *active))
        })
    }

    pub fn pre_barriers(&self, out: &mut Vec<Barrier>) {
        for (texture, surface, rest, active) in self.surfaces() {
            out.push(Barrier::texture_surface(texture, surface, rest, active));
        }
        for (buffer, active) in &self.buffer_transitions {
            out.push(Barrier::buffer(buffer, buffer.desc().initial_usage, *active));
        }
    }

    pub fn post_barriers(&self, out: &mut Vec<Barrier>) {
        for (texture, surface, rest, active) in self.surfaces() {
            out.push(Barrier::texture_surface(texture, surface, active, rest));
        }
        for (buffer, active) in &self.buffer_transitions {
            out.push(Barrier::buffer(buffer, *active, buffer.desc().initial_usage));
        }
    }

    pub fn usages(&self, out: &mut Vec<ResourceUsage>) {
        out.extend(self.reads.iter().cloned());
        for (texture, surface, _, active) in self.surfaces() {
            out.push(ResourceUsage::Texture {
                texture: TextureRef::clone(texture),
                surface,
                usage: active,
            });
        }
        for (buffer, active) in &self.buffer_transitions {
            out.push(ResourceUsage::buffer(buffer, *active));
        }
    }
}

/// Resources every stage may bind.
#[derive(Debug, Clone)]
pub struct SharedResources {
    pub dummy_texture: TextureRef,
    pub dummy_buffer: BufferRef,
    pub nearest_sampler: SamplerRef,
    pub linear_sampler: SamplerRef,
    /// Fullscreen quad vertex program.
    pub quad_program: ProgramHandle,
}

/// What a stage is constructed with. Everything earlier stages published is
/// reachable through [`StageInit::texture`].
pub struct StageInit<'a> {
    pub config: &'a RendererConfig,
    pub shared: &'a SharedResources,
    device: &'a Arc<dyn GpuDevice>,
    resources: &'a dyn ResourceProvider,
    programs: &'a mut ProgramCache,
    targets: &'a mut RenderTargets,
}

impl<'a> StageInit<'a> {
    pub fn new(
        config: &'a RendererConfig,
        shared: &'a SharedResources,
        device: &'a Arc<dyn GpuDevice>,
        resources: &'a dyn ResourceProvider,
        programs: &'a mut ProgramCache,
        targets: &'a mut RenderTargets,
    ) -> Self {
        Self {
            config,
            shared,
            device,
            resources,
            programs,
            targets,
        }
    }

    pub fn load_program(&mut self, key: ShaderKey) -> Result<ProgramHandle> {
        self.programs.get_or_load(&key, self.resources)
    }

    /// Creates a render target, clears every surface once and publishes it.
    pub fn create_render_target(&mut self, name: TargetName, desc: TextureDesc) -> Result<TextureRef> {
        let texture = create_and_clear_render_target(self.device.as_ref(), desc)?;
        self.targets.publish(name, TextureRef::clone(&texture));
        Ok(texture)
    }

    pub fn create_buffer(&mut self, name: BufferName, desc: BufferDesc) -> Result<BufferRef> {
        let buffer = self.device.create_buffer(desc)?;
        self.targets.publish_buffer(name, BufferRef::clone(&buffer));
        Ok(buffer)
    }

    pub fn texture(&self, name: TargetName) -> Result<TextureRef> {
        self.targets.texture(name)
    }

    pub fn buffer(&self, name: BufferName) -> Result<BufferRef> {
        self.targets.buffer(name)
    }
}

/// Every surface goes `NONE -> attachment write -> initial usage` with an
/// empty clearing render pass in between.
pub fn create_and_clear_render_target(device: &dyn GpuDevice, desc: TextureDesc) -> Result<TextureRef> {
    debug_assert!(desc.usage.contains(TextureUsage::ATTACHMENT_WRITE));

    let texture = device.create_texture(desc)?;
    let desc = texture.desc();

    let mut flags = CommandBufferFlags::GRAPHICS_WORK;
    if desc.surface_count() * 4 < SMALL_BATCH_MAX_COMMANDS {
        flags |= CommandBufferFlags::SMALL_BATCH;
    }
    let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
        format!("clear {}", desc.name),
        flags,
    ));

    for surface in desc.surfaces() {
        cmdb.texture_barrier(
            texture.id(),
            surface,
            TextureUsage::NONE,
            TextureUsage::ATTACHMENT_WRITE,
        );
        cmdb.begin_render_pass("clear", vec![texture.id()], true);
        cmdb.end_render_pass();
        if !desc.initial_usage.is_empty() {
            cmdb.texture_barrier(
                texture.id(),
                surface,
                TextureUsage::ATTACHMENT_WRITE,
                desc.initial_usage,
            );
        }
    }

    cmdb.flush();
    device.submit(vec![cmdb])?;
    Ok(texture)
}
