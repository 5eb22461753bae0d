use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::CommandBuffer;
use super::resources::{
    Buffer, BufferDesc, BufferId, BufferRef, Sampler, SamplerDesc, SamplerId, SamplerRef, Texture,
    TextureDesc, TextureId, TextureRef,
};
use crate::error::{RenderError, Result};

/// The graphics backend the renderer records against.
pub trait GpuDevice: Send + Sync {
    fn create_texture(&self, desc: TextureDesc) -> Result<TextureRef>;

    fn create_buffer(&self, desc: BufferDesc) -> Result<BufferRef>;

    fn create_sampler(&self, desc: SamplerDesc) -> Result<SamplerRef>;

    /// Hands sealed command buffers to the GPU queue, in order.
    fn submit(&self, command_buffers: Vec<CommandBuffer>) -> Result<()>;
}

/// In-memory backend. Keeps every submission around so it can be inspected.
#[derive(Default)]
pub struct HeadlessDevice {
    next_id: AtomicU32,
    textures: Mutex<Vec<TextureRef>>,
    submissions: Mutex<Vec<Vec<CommandBuffer>>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Drains everything submitted so far.
    pub fn take_submissions(&self) -> Vec<Vec<CommandBuffer>> {
        std::mem::take(&mut *self.submissions.lock())
    }

    pub fn texture_named(&self, name: &str) -> Option<TextureRef> {
        self.textures
            .lock()
            .iter()
            .find(|texture| texture.name() == name)
            .cloned()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.lock().len()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_texture(&self, desc: TextureDesc) -> Result<TextureRef> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::resource_load(
                desc.name,
                "texture extent must be non-zero",
            ));
        }

        let texture = Arc::new(Texture::new(TextureId(self.allocate_id()), desc));
        log::trace!("Created texture {}", texture);
        self.textures.lock().push(Arc::clone(&texture));
        Ok(texture)
    }

    fn create_buffer(&self, desc: BufferDesc) -> Result<BufferRef> {
        if desc.size == 0 {
            return Err(RenderError::resource_load(
                desc.name,
                "buffer size must be non-zero",
            ));
        }

        Ok(Arc::new(Buffer::new(BufferId(self.allocate_id()), desc)))
    }

    fn create_sampler(&self, desc: SamplerDesc) -> Result<SamplerRef> {
        Ok(Arc::new(Sampler::new(SamplerId(self.allocate_id()), desc)))
    }

    fn submit(&self, command_buffers: Vec<CommandBuffer>) -> Result<()> {
        if let Some(open) = command_buffers.iter().find(|cmdb| !cmdb.is_sealed()) {
            return Err(RenderError::Submission(format!(
                "command buffer '{}' was not flushed before submit",
                open.label()
            )));
        }

        self.submissions.lock().push(command_buffers);
        Ok(())
    }
}
