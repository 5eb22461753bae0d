// renderer/targets.rs
//
// Registry of the shared render targets and buffers. A stage publishes what it
// creates; later stages in the initialization order look it up by name.

use std::collections::HashMap;
use std::fmt;

use crate::error::{RenderError, Result};
use crate::gpu::{BufferRef, TextureRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetName {
    ReflectionProbes,
    ShadowMap,
    GBufferAlbedo,
    GBufferNormal,
    GBufferDepth,
    DepthHalf,
    DepthQuarter,
    Volumetric,
    VolumetricBlur,
    Ssao,
    SsaoBlur,
    LightShading,
    Forward,
    TemporalAa0,
    TemporalAa1,
    Downscale,
    BloomExtract,
    BloomUpscale,
    DebugOverlay,
    Present,
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferName {
    ClusteredLights,
    Luminance,
}

impl fmt::Display for BufferName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Default)]
pub struct RenderTargets {
    textures: HashMap<TargetName, TextureRef>,
    buffers: HashMap<BufferName, BufferRef>,
}

impl RenderTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, name: TargetName, texture: TextureRef) {
        if self.textures.insert(name, texture).is_some() {
            log::warn!("Render target {} published twice. Keeping the latest.", name);
        }
    }

    pub fn publish_buffer(&mut self, name: BufferName, buffer: BufferRef) {
        if self.buffers.insert(name, buffer).is_some() {
            log::warn!("Buffer {} published twice. Keeping the latest.", name);
        }
    }

    /// Fails with a load error when no earlier stage created `name`.
    pub fn texture(&self, name: TargetName) -> Result<TextureRef> {
        self.textures.get(&name).cloned().ok_or_else(|| {
            RenderError::resource_load(name.to_string(), "render target was never created")
        })
    }

    pub fn buffer(&self, name: BufferName) -> Result<BufferRef> {
        self.buffers
            .get(&name)
            .cloned()
            .ok_or_else(|| RenderError::resource_load(name.to_string(), "buffer was never created"))
    }

    pub fn textures(&self) -> impl Iterator<Item = &TextureRef> {
        self.textures.values()
    }

    pub fn buffers(&self) -> impl Iterator<Item = &BufferRef> {
        self.buffers.values()
    }

    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_target_is_a_load_error() {
        let targets = RenderTargets::new();

        let err = targets
            .texture(TargetName::GBufferDepth)
            .expect_err("nothing published");
        assert!(matches!(err, RenderError::ResourceLoad { ref resource, .. } if resource == "GBufferDepth"));
    }
}
