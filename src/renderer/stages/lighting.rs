// renderer/stages/lighting.rs
use bytemuck::{Pod, Zeroable};

use super::super::frame::FrameContext;
use super::super::stage::{PassIo, Stage, StageId, StageInit};
use super::super::targets::{BufferName, TargetName};
use crate::error::Result;
use crate::gpu::{
    BufferDesc, BufferRef, BufferUsage, SamplerRef, SamplingFilter, TextureDesc, TextureFormat,
    TextureRef, TextureUsage,
};
use crate::resource::{ProgramHandle, ShaderDefine, ShaderKey};

pub const MAX_LIGHTS: usize = 256;
const LIGHTS_SLOT: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct LightUniform {
    /// xyz = world position, w = radius.
    pub position_radius: [f32; 4],
}

pub struct LightShadingStage {
    io: PassIo,
    program: ProgramHandle,
    target: TextureRef,
    inputs: Vec<TextureRef>,
    lights: BufferRef,
    sampler: SamplerRef,
}

impl LightShadingStage {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let size = init.config.resolution;
        let inputs = [
            TargetName::GBufferAlbedo,
            TargetName::GBufferNormal,
            TargetName::GBufferDepth,
            TargetName::ShadowMap,
            TargetName::ReflectionProbes,
            TargetName::Ssao,
        ]
        .into_iter()
        .map(|name| init.texture(name))
        .collect::<Result<Vec<_>>>()?;

        let target = init.create_render_target(
            TargetName::LightShading,
            TextureDesc::render_target(
                TargetName::LightShading.to_string(),
                size.width,
                size.height,
                TextureFormat::R11G11B10Float,
                TextureUsage::ATTACHMENT_READ_WRITE | TextureUsage::SAMPLED_ALL,
                SamplingFilter::Linear,
                1,
            ),
        )?;
        let lights = init.create_buffer(
            BufferName::ClusteredLights,
            BufferDesc::new(
                BufferName::ClusteredLights.to_string(),
                (MAX_LIGHTS * std::mem::size_of::<LightUniform>()) as u64,
                BufferUsage::UNIFORM,
            ),
        )?;
        let program = init.load_program(
            ShaderKey::new("shaders/LightShading.frag")
                .define(ShaderDefine::RendererWidth, size.width)
                .define(ShaderDefine::RendererHeight, size.height)
                .define(ShaderDefine::ShadowMapSize, init.config.shadow_map_size),
        )?;

        let mut io = PassIo::new()
            .transition(&target, TextureUsage::ATTACHMENT_WRITE)
            .read_buffer(&lights, BufferUsage::UNIFORM);
        for input in &inputs {
            io = io.read(input, TextureUsage::SAMPLED_FRAGMENT);
        }

        Ok(Self {
            io,
            program,
            target,
            inputs,
            lights,
            sampler: SamplerRef::clone(&init.shared.nearest_sampler),
        })
    }
}

impl Stage for LightShadingStage {
    fn id(&self) -> StageId {
        StageId::LightShading
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    /// Bins the visible lights into the light buffer.
    fn prepare(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let visible = &frame.visibility().lights;
        if visible.len() > MAX_LIGHTS {
            log::warn!(
                "{} visible lights exceed the limit of {}. Dropping the rest.",
                visible.len(),
                MAX_LIGHTS
            );
        }

        let packed: Vec<LightUniform> = visible
            .iter()
            .take(MAX_LIGHTS)
            .map(|light| LightUniform {
                position_radius: light.position.extend(light.radius).to_array(),
            })
            .collect();

        if !packed.is_empty() {
            frame
                .command_buffer
                .upload_uniforms(LIGHTS_SLOT, bytemuck::cast_slice(&packed));
        }
        Ok(())
    }

    fn run(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let (width, height) = self.target.size();
        let cmdb = &mut frame.command_buffer;

        cmdb.begin_render_pass(StageId::LightShading.name(), vec![self.target.id()], true);
        cmdb.set_viewport(0, 0, width, height);
        cmdb.bind_program(self.program);
        for (slot, input) in self.inputs.iter().enumerate() {
            cmdb.bind_texture(slot as u32, input.id(), Some(self.sampler.id()));
        }
        cmdb.bind_buffer(LIGHTS_SLOT, self.lights.id());
        cmdb.draw_fullscreen_quad();
        cmdb.end_render_pass();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_uniform_is_16_bytes() {
        assert_eq!(std::mem::size_of::<LightUniform>(), 16);
    }
}
