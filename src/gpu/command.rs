use super::resources::{BufferId, SamplerId, SurfaceInfo, TextureId};
use super::usage::{BufferUsage, CommandBufferFlags, TextureUsage};
use crate::resource::{MaterialHandle, MeshHandle, ProgramHandle};

/// One recorded GPU operation. Backends translate these into their native API.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetViewport {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    BindProgram(ProgramHandle),
    BindTexture {
        slot: u32,
        texture: TextureId,
        sampler: Option<SamplerId>,
    },
    BindBuffer {
        slot: u32,
        buffer: BufferId,
    },
    UploadUniforms {
        slot: u32,
        data: Vec<u8>,
    },
    DrawInstanced {
        mesh: MeshHandle,
        material: MaterialHandle,
        lod: u8,
        instance_count: u32,
    },
    DrawFullscreenQuad,
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    TextureBarrier {
        texture: TextureId,
        surface: SurfaceInfo,
        before: TextureUsage,
        after: TextureUsage,
    },
    BufferBarrier {
        buffer: BufferId,
        before: BufferUsage,
        after: BufferUsage,
    },
    /// Tells a second-level buffer what state a surface is already in.
    InformTextureUsage {
        texture: TextureId,
        surface: SurfaceInfo,
        usage: TextureUsage,
    },
    BeginRenderPass {
        label: &'static str,
        attachments: Vec<TextureId>,
        clear: bool,
    },
    EndRenderPass,
    ResetOcclusionQueries {
        count: u32,
    },
    OcclusionTest {
        query: u32,
    },
    ExecuteSecondary(CommandBuffer),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandBufferInit {
    pub label: String,
    pub flags: CommandBufferFlags,
}

impl CommandBufferInit {
    pub fn new(label: impl Into<String>, flags: CommandBufferFlags) -> Self {
        Self {
            label: label.into(),
            flags,
        }
    }
}

/// An ordered list of commands. `flush` seals it for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBuffer {
    label: String,
    flags: CommandBufferFlags,
    commands: Vec<Command>,
    sealed: bool,
}

impl CommandBuffer {
    pub fn new(init: CommandBufferInit) -> Self {
        Self {
            label: init.label,
            flags: init.flags,
            commands: Vec::new(),
            sealed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn flags(&self) -> CommandBufferFlags {
        self.flags
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn flush(&mut self) {
        self.sealed = true;
    }

    pub fn record(&mut self, command: Command) {
        debug_assert!(
            !self.sealed,
            "recording into sealed command buffer '{}'",
            self.label
        );
        self.commands.push(command);
    }

    pub fn set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.record(Command::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    pub fn bind_program(&mut self, program: ProgramHandle) {
        self.record(Command::BindProgram(program));
    }

    pub fn bind_texture(&mut self, slot: u32, texture: TextureId, sampler: Option<SamplerId>) {
        self.record(Command::BindTexture {
            slot,
            texture,
            sampler,
        });
    }

    pub fn bind_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.record(Command::BindBuffer { slot, buffer });
    }

    pub fn upload_uniforms(&mut self, slot: u32, data: &[u8]) {
        self.record(Command::UploadUniforms {
            slot,
            data: data.to_vec(),
        });
    }

    pub fn draw_instanced(
        &mut self,
        mesh: MeshHandle,
        material: MaterialHandle,
        lod: u8,
        instance_count: u32,
    ) {
        self.record(Command::DrawInstanced {
            mesh,
            material,
            lod,
            instance_count,
        });
    }

    pub fn draw_fullscreen_quad(&mut self) {
        self.record(Command::DrawFullscreenQuad);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn texture_barrier(
        &mut self,
        texture: TextureId,
        surface: SurfaceInfo,
        before: TextureUsage,
        after: TextureUsage,
    ) {
        self.record(Command::TextureBarrier {
            texture,
            surface,
            before,
            after,
        });
    }

    pub fn buffer_barrier(&mut self, buffer: BufferId, before: BufferUsage, after: BufferUsage) {
        self.record(Command::BufferBarrier {
            buffer,
            before,
            after,
        });
    }

    pub fn inform_texture_usage(
        &mut self,
        texture: TextureId,
        surface: SurfaceInfo,
        usage: TextureUsage,
    ) {
        self.record(Command::InformTextureUsage {
            texture,
            surface,
            usage,
        });
    }

    pub fn begin_render_pass(&mut self, label: &'static str, attachments: Vec<TextureId>, clear: bool) {
        self.record(Command::BeginRenderPass {
            label,
            attachments,
            clear,
        });
    }

    pub fn end_render_pass(&mut self) {
        self.record(Command::EndRenderPass);
    }

    pub fn reset_occlusion_queries(&mut self, count: u32) {
        self.record(Command::ResetOcclusionQueries { count });
    }

    pub fn occlusion_test(&mut self, query: u32) {
        self.record(Command::OcclusionTest { query });
    }

    /// Moves a sealed second-level buffer into this one.
    pub fn execute_secondary(&mut self, secondary: CommandBuffer) {
        debug_assert!(
            secondary.is_sealed(),
            "second-level buffer '{}' executed before flush",
            secondary.label
        );
        self.record(Command::ExecuteSecondary(secondary));
    }

    /// Instanced draws in this buffer and every nested second-level buffer.
    /// Fullscreen quads are not counted.
    pub fn batched_draw_count(&self) -> usize {
        self.commands
            .iter()
            .map(|command| match command {
                Command::DrawInstanced { .. } => 1,
                Command::ExecuteSecondary(secondary) => secondary.batched_draw_count(),
                _ => 0,
            })
            .sum()
    }

    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| {
                matches!(
                    command,
                    Command::TextureBarrier { .. } | Command::BufferBarrier { .. }
                )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Handle;

    fn secondary_with_draws(draws: usize) -> CommandBuffer {
        let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
            "secondary",
            CommandBufferFlags::GRAPHICS_WORK | CommandBufferFlags::SECOND_LEVEL,
        ));
        for _ in 0..draws {
            cmdb.draw_instanced(Handle::new(0), Handle::new(0), 0, 1);
        }
        cmdb.flush();
        cmdb
    }

    #[test]
    fn batched_draw_count_includes_nested_buffers_but_not_quads() {
        let mut primary = CommandBuffer::new(CommandBufferInit::new(
            "primary",
            CommandBufferFlags::GRAPHICS_WORK,
        ));
        primary.draw_fullscreen_quad();
        primary.execute_secondary(secondary_with_draws(3));
        primary.execute_secondary(secondary_with_draws(2));

        assert_eq!(primary.batched_draw_count(), 5);
    }

    #[test]
    fn flush_seals_the_buffer() {
        let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
            "cmdb",
            CommandBufferFlags::COMPUTE_WORK,
        ));
        cmdb.dispatch(1, 1, 1);
        assert!(!cmdb.is_sealed());

        cmdb.flush();
        assert!(cmdb.is_sealed());
        assert_eq!(cmdb.commands().len(), 1);
    }
}
