use bitflags::bitflags;

bitflags! {
    /// How a texture surface is being used by the GPU at a point in time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const SAMPLED_VERTEX = 1 << 0;
        const SAMPLED_FRAGMENT = 1 << 1;
        const SAMPLED_COMPUTE = 1 << 2;
        const IMAGE_COMPUTE_READ = 1 << 3;
        const IMAGE_COMPUTE_WRITE = 1 << 4;
        const ATTACHMENT_READ = 1 << 5;
        const ATTACHMENT_WRITE = 1 << 6;
        const TRANSFER_DST = 1 << 7;
        const PRESENT = 1 << 8;

        const SAMPLED_ALL = Self::SAMPLED_VERTEX.bits()
            | Self::SAMPLED_FRAGMENT.bits()
            | Self::SAMPLED_COMPUTE.bits();
        const ATTACHMENT_READ_WRITE = Self::ATTACHMENT_READ.bits() | Self::ATTACHMENT_WRITE.bits();
    }
}

impl TextureUsage {
    pub const NONE: Self = Self::empty();

    pub fn is_write(self) -> bool {
        self.intersects(Self::IMAGE_COMPUTE_WRITE | Self::ATTACHMENT_WRITE | Self::TRANSFER_DST)
    }

    /// `true` when `self` grants everything `required` asks for.
    pub fn satisfies(self, required: Self) -> bool {
        self.contains(required)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const UNIFORM = 1 << 0;
        const STORAGE_READ = 1 << 1;
        const STORAGE_WRITE = 1 << 2;
        const INDIRECT = 1 << 3;
        const TRANSFER_DST = 1 << 4;

        const STORAGE_READ_WRITE = Self::STORAGE_READ.bits() | Self::STORAGE_WRITE.bits();
        const UNIFORM_STORAGE_READ = Self::UNIFORM.bits() | Self::STORAGE_READ.bits();
    }
}

impl BufferUsage {
    pub const NONE: Self = Self::empty();

    pub fn is_write(self) -> bool {
        self.intersects(Self::STORAGE_WRITE | Self::TRANSFER_DST)
    }

    pub fn satisfies(self, required: Self) -> bool {
        self.contains(required)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandBufferFlags: u32 {
        const GRAPHICS_WORK = 1 << 0;
        const COMPUTE_WORK = 1 << 1;
        const TRANSFER_WORK = 1 << 2;
        /// Executed from inside a primary buffer's render pass.
        const SECOND_LEVEL = 1 << 3;
        /// Hint that only a handful of commands will be recorded.
        const SMALL_BATCH = 1 << 4;
    }
}

/// Command count under which a buffer qualifies for [`CommandBufferFlags::SMALL_BATCH`].
pub const SMALL_BATCH_MAX_COMMANDS: u32 = 100;
