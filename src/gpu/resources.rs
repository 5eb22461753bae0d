//! GPU resource descriptions and the shared handles stages hold on to.
//!
//! Render targets are aliased by several stages (the G-buffer depth is written
//! by one stage and sampled by half a dozen others), so created resources are
//! handed out as `Arc`s and live as long as the last stage referencing them.

use std::fmt;
use std::sync::Arc;

use super::usage::{BufferUsage, TextureUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rg16Float,
    R11G11B10Float,
    R8Unorm,
    R32Float,
    Depth32Float,
    Depth24Stencil8,
}

impl TextureFormat {
    pub fn is_depth_stencil(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24Stencil8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

impl TextureKind {
    pub fn face_count(self) -> u32 {
        match self {
            Self::D2 => 1,
            Self::Cube => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplingFilter {
    #[default]
    Nearest,
    Linear,
    /// Only the base mip is ever sampled.
    Base,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
    pub mip_count: u32,
    pub layer_count: u32,
    /// Every usage the texture may ever be put in.
    pub usage: TextureUsage,
    /// Usage the texture is left in after creation.
    pub initial_usage: TextureUsage,
    pub min_mag_filter: SamplingFilter,
    pub mip_filter: SamplingFilter,
}

impl TextureDesc {
    /// Single-sampled 2D render target. `usage` must include attachment writes.
    pub fn render_target(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
        filter: SamplingFilter,
        mip_count: u32,
    ) -> Self {
        debug_assert!(
            usage.contains(TextureUsage::ATTACHMENT_WRITE),
            "render targets must be writable as attachments"
        );

        let mip_count = mip_count.max(1);
        Self {
            name: name.into(),
            width,
            height,
            format,
            kind: TextureKind::D2,
            mip_count,
            layer_count: 1,
            usage,
            initial_usage: TextureUsage::SAMPLED_ALL,
            min_mag_filter: filter,
            mip_filter: if mip_count > 1 {
                filter
            } else {
                SamplingFilter::Base
            },
        }
    }

    pub fn with_kind(mut self, kind: TextureKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_initial_usage(mut self, usage: TextureUsage) -> Self {
        self.initial_usage = usage;
        self
    }

    /// Every addressable (mip, face, layer) surface.
    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceInfo> + '_ {
        let faces = self.kind.face_count();
        (0..self.mip_count).flat_map(move |mip| {
            (0..faces).flat_map(move |face| {
                (0..self.layer_count).map(move |layer| SurfaceInfo { mip, face, layer })
            })
        })
    }

    pub fn surface_count(&self) -> u32 {
        self.mip_count * self.kind.face_count() * self.layer_count
    }
}

/// One (mip, face, layer) of a texture. Barriers are tracked per surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SurfaceInfo {
    pub mip: u32,
    pub face: u32,
    pub layer: u32,
}

impl SurfaceInfo {
    pub const BASE: Self = Self {
        mip: 0,
        face: 0,
        layer: 0,
    };
}

#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    desc: TextureDesc,
}

impl Texture {
    pub fn new(id: TextureId, desc: TextureDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }
}

impl fmt::Display for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.desc.name, self.id.0)
    }
}

pub type TextureRef = Arc<Texture>;

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub initial_usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(name: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
            initial_usage: usage & BufferUsage::UNIFORM_STORAGE_READ,
        }
    }
}

#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    desc: BufferDesc,
}

impl Buffer {
    pub fn new(id: BufferId, desc: BufferDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.desc.name, self.id.0)
    }
}

pub type BufferRef = Arc<Buffer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub min_mag_filter: SamplingFilter,
    pub repeat: bool,
}

#[derive(Debug)]
pub struct Sampler {
    id: SamplerId,
    desc: SamplerDesc,
}

impl Sampler {
    pub fn new(id: SamplerId, desc: SamplerDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> SamplerId {
        self.id
    }

    pub fn desc(&self) -> SamplerDesc {
        self.desc
    }
}

pub type SamplerRef = Arc<Sampler>;
