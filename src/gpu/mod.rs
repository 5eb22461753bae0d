//! Abstract command-recording and resource-barrier interface.

pub mod command;
pub mod device;
pub mod resources;
pub mod usage;

pub use command::{Command, CommandBuffer, CommandBufferInit};
pub use device::{GpuDevice, HeadlessDevice};
pub use resources::{
    Buffer, BufferDesc, BufferId, BufferRef, Sampler, SamplerDesc, SamplerId, SamplerRef,
    SamplingFilter, SurfaceInfo, Texture, TextureDesc, TextureFormat, TextureId, TextureKind,
    TextureRef,
};
pub use usage::{BufferUsage, CommandBufferFlags, TextureUsage, SMALL_BATCH_MAX_COMMANDS};
