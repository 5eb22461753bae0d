// renderer/barrier.rs
//
// Declared usage transitions and the tracker that checks they chain.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::gpu::{
    BufferId, BufferRef, BufferUsage, CommandBuffer, SurfaceInfo, TextureId, TextureRef,
    TextureUsage,
};

/// A transition of one resource from the usage its last user left it in to
/// the usage its next user needs.
#[derive(Debug, Clone)]
pub enum Barrier {
    Texture {
        texture: TextureRef,
        surface: SurfaceInfo,
        before: TextureUsage,
        after: TextureUsage,
    },
    Buffer {
        buffer: BufferRef,
        before: BufferUsage,
        after: BufferUsage,
    },
}

impl Barrier {
    pub fn texture(texture: &TextureRef, before: TextureUsage, after: TextureUsage) -> Self {
        Self::texture_surface(texture, SurfaceInfo::BASE, before, after)
    }

    pub fn texture_surface(
        texture: &TextureRef,
        surface: SurfaceInfo,
        before: TextureUsage,
        after: TextureUsage,
    ) -> Self {
        Self::Texture {
            texture: TextureRef::clone(texture),
            surface,
            before,
            after,
        }
    }

    pub fn buffer(buffer: &BufferRef, before: BufferUsage, after: BufferUsage) -> Self {
        Self::Buffer {
            buffer: BufferRef::clone(buffer),
            before,
            after,
        }
    }

    /// Fails when the resource was not created with the usage this barrier
    /// moves it into.
    pub fn check_granted(&self) -> Result<(), BarrierViolation> {
        match self {
            Self::Texture {
                texture,
                surface,
                after,
                ..
            } => {
                let granted = texture.desc().usage | texture.desc().initial_usage;
                if !granted.contains(*after) {
                    return Err(BarrierViolation::NotGranted {
                        resource: SurfaceName(texture, *surface).to_string(),
                        requested: format!("{after:?}"),
                        granted: format!("{granted:?}"),
                    });
                }
            }
            Self::Buffer { buffer, after, .. } => {
                let granted = buffer.desc().usage | buffer.desc().initial_usage;
                if !granted.contains(*after) {
                    return Err(BarrierViolation::NotGranted {
                        resource: buffer.to_string(),
                        requested: format!("{after:?}"),
                        granted: format!("{granted:?}"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn record(&self, cmdb: &mut CommandBuffer) {
        match self {
            Self::Texture {
                texture,
                surface,
                before,
                after,
            } => cmdb.texture_barrier(texture.id(), *surface, *before, *after),
            Self::Buffer {
                buffer,
                before,
                after,
            } => cmdb.buffer_barrier(buffer.id(), *before, *after),
        }
    }
}

/// The usage a stage needs a resource to be in while it runs.
#[derive(Debug, Clone)]
pub enum ResourceUsage {
    Texture {
        texture: TextureRef,
        surface: SurfaceInfo,
        usage: TextureUsage,
    },
    Buffer {
        buffer: BufferRef,
        usage: BufferUsage,
    },
}

impl ResourceUsage {
    pub fn texture(texture: &TextureRef, usage: TextureUsage) -> Self {
        Self::Texture {
            texture: TextureRef::clone(texture),
            surface: SurfaceInfo::BASE,
            usage,
        }
    }

    pub fn buffer(buffer: &BufferRef, usage: BufferUsage) -> Self {
        Self::Buffer {
            buffer: BufferRef::clone(buffer),
            usage,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarrierViolation {
    #[error("{resource} is not tracked")]
    Untracked { resource: String },

    #[error("barrier on {resource} expects {declared} but it is in {actual}")]
    UnexpectedBefore {
        resource: String,
        declared: String,
        actual: String,
    },

    #[error("{resource} is in {actual} but {required} is required")]
    Unsatisfied {
        resource: String,
        required: String,
        actual: String,
    },

    #[error("{resource} was created without {requested} (allows {granted})")]
    NotGranted {
        resource: String,
        requested: String,
        granted: String,
    },

    #[error("{count} surfaces or buffers do not return to their resting usage")]
    Unbalanced { count: usize },
}

struct SurfaceName<'a>(&'a TextureRef, SurfaceInfo);

impl fmt::Display for SurfaceName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let SurfaceInfo { mip, face, layer } = self.1;
        write!(f, "{} [mip {mip}, face {face}, layer {layer}]", self.0)
    }
}

/// Current usage of every registered surface and buffer.
///
/// The renderer validates a frame against a clone and only commits the clone
/// once the frame succeeded.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    textures: HashMap<(TextureId, SurfaceInfo), TextureUsage>,
    buffers: HashMap<BufferId, BufferUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks every surface of `texture` at its initial usage.
    pub fn register_texture(&mut self, texture: &TextureRef) {
        let initial = texture.desc().initial_usage;
        for surface in texture.desc().surfaces() {
            self.textures.insert((texture.id(), surface), initial);
        }
    }

    pub fn register_buffer(&mut self, buffer: &BufferRef) {
        self.buffers.insert(buffer.id(), buffer.desc().initial_usage);
    }

    pub fn texture_usage(&self, texture: TextureId, surface: SurfaceInfo) -> Option<TextureUsage> {
        self.textures.get(&(texture, surface)).copied()
    }

    pub fn buffer_usage(&self, buffer: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&buffer).copied()
    }

    pub fn apply(&mut self, barrier: &Barrier) -> Result<(), BarrierViolation> {
        match barrier {
            Barrier::Texture {
                texture,
                surface,
                before,
                after,
            } => {
                let current = self
                    .textures
                    .get_mut(&(texture.id(), *surface))
                    .ok_or_else(|| BarrierViolation::Untracked {
                        resource: SurfaceName(texture, *surface).to_string(),
                    })?;
                if current != before {
                    return Err(BarrierViolation::UnexpectedBefore {
                        resource: SurfaceName(texture, *surface).to_string(),
                        declared: format!("{before:?}"),
                        actual: format!("{current:?}"),
                    });
                }
                *current = *after;
            }
            Barrier::Buffer {
                buffer,
                before,
                after,
            } => {
                let current = self.buffers.get_mut(&buffer.id()).ok_or_else(|| {
                    BarrierViolation::Untracked {
                        resource: buffer.to_string(),
                    }
                })?;
                if current != before {
                    return Err(BarrierViolation::UnexpectedBefore {
                        resource: buffer.to_string(),
                        declared: format!("{before:?}"),
                        actual: format!("{current:?}"),
                    });
                }
                *current = *after;
            }
        }
        Ok(())
    }

    /// Number of tracked resources whose usage differs from `other`.
    pub fn differences(&self, other: &UsageTracker) -> usize {
        let textures = self
            .textures
            .iter()
            .filter(|(key, usage)| other.textures.get(key) != Some(usage))
            .count();
        let buffers = self
            .buffers
            .iter()
            .filter(|(key, usage)| other.buffers.get(key) != Some(usage))
            .count();
        textures + buffers
    }

    pub fn check(&self, usage: &ResourceUsage) -> Result<(), BarrierViolation> {
        match usage {
            ResourceUsage::Texture {
                texture,
                surface,
                usage,
            } => {
                let current = self.texture_usage(texture.id(), *surface).ok_or_else(|| {
                    BarrierViolation::Untracked {
                        resource: SurfaceName(texture, *surface).to_string(),
                    }
                })?;
                if !current.satisfies(*usage) {
                    return Err(BarrierViolation::Unsatisfied {
                        resource: SurfaceName(texture, *surface).to_string(),
                        required: format!("{usage:?}"),
                        actual: format!("{current:?}"),
                    });
                }
            }
            ResourceUsage::Buffer { buffer, usage } => {
                let current = self.buffer_usage(buffer.id()).ok_or_else(|| {
                    BarrierViolation::Untracked {
                        resource: buffer.to_string(),
                    }
                })?;
                if !current.satisfies(*usage) {
                    return Err(BarrierViolation::Unsatisfied {
                        resource: buffer.to_string(),
                        required: format!("{usage:?}"),
                        actual: format!("{current:?}"),
                    });
                }
            }
        }
        Ok(())
    }
}
