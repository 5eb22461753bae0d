// renderer/stages/lens_flare.rs
//
// Lens flares need an occlusion query per flare, issued after the opaque
// geometry, and a sprite draw after the transparent geometry.

use std::sync::Arc;

use super::super::frame::{FrameContext, FrameView};
use super::super::scheduler::TrailingDraws;
use super::super::stage::StageInit;
use crate::error::Result;
use crate::gpu::CommandBuffer;
use crate::resource::{ProgramHandle, ShaderKey};
use crate::visibility::VisibilityResults;

/// Flares beyond this count are ignored.
pub const MAX_LENS_FLARES: usize = 8;

fn flare_count(visibility: &VisibilityResults) -> usize {
    visibility.lens_flares.len().min(MAX_LENS_FLARES)
}

pub struct LensFlareOcclusion {
    program: ProgramHandle,
}

impl TrailingDraws for LensFlareOcclusion {
    fn record(
        &self,
        _view: &FrameView,
        visibility: &VisibilityResults,
        cmdb: &mut CommandBuffer,
    ) -> Result<()> {
        let count = flare_count(visibility);
        if count == 0 {
            return Ok(());
        }

        cmdb.bind_program(self.program);
        for query in 0..count {
            cmdb.occlusion_test(query as u32);
        }
        Ok(())
    }
}

pub struct LensFlareSprites {
    program: ProgramHandle,
}

impl TrailingDraws for LensFlareSprites {
    fn record(
        &self,
        view: &FrameView,
        visibility: &VisibilityResults,
        cmdb: &mut CommandBuffer,
    ) -> Result<()> {
        let count = flare_count(visibility);
        if count == 0 {
            return Ok(());
        }

        // Clip-space position and size of every flare, one vec4 each.
        let sprites: Vec<[f32; 4]> = visibility
            .lens_flares
            .iter()
            .take(count)
            .map(|flare| {
                let clip = view.view_projection.project_point3(flare.position);
                [clip.x, clip.y, clip.z, flare.size]
            })
            .collect();

        cmdb.bind_program(self.program);
        cmdb.upload_uniforms(0, bytemuck::cast_slice(&sprites));
        for _ in 0..count {
            cmdb.draw_fullscreen_quad();
        }
        Ok(())
    }
}

pub struct LensFlare {
    pub occlusion: Arc<LensFlareOcclusion>,
    pub sprites: Arc<LensFlareSprites>,
}

impl LensFlare {
    pub fn new(init: &mut StageInit<'_>) -> Result<Self> {
        let occlusion = init.load_program(ShaderKey::new("shaders/LensFlareOcclusion.vert"))?;
        let sprites = init.load_program(ShaderKey::new("shaders/LensFlareSprite.frag"))?;

        Ok(Self {
            occlusion: Arc::new(LensFlareOcclusion { program: occlusion }),
            sprites: Arc::new(LensFlareSprites { program: sprites }),
        })
    }

    /// Pre-pass: clears the queries the opaque pass is about to issue.
    pub fn reset_occlusion_queries(&self, frame: &mut FrameContext<'_>) {
        let count = flare_count(frame.visibility());
        if count > 0 {
            frame.command_buffer.reset_occlusion_queries(count as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, CommandBufferFlags, CommandBufferInit};
    use crate::resource::Handle;
    use crate::visibility::LensFlareInfo;
    use glam::Vec3;

    #[test]
    fn occlusion_tests_are_capped() {
        let mut visibility = VisibilityResults::new();
        visibility.lens_flares = (0..12)
            .map(|i| LensFlareInfo {
                position: Vec3::new(i as f32, 0.0, -5.0),
                size: 1.0,
            })
            .collect();
        let occlusion = LensFlareOcclusion {
            program: Handle::new(1),
        };
        let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
            "fs",
            CommandBufferFlags::SECOND_LEVEL,
        ));

        occlusion
            .record(&FrameView::default(), &visibility, &mut cmdb)
            .expect("record");

        let tests = cmdb
            .commands()
            .iter()
            .filter(|command| matches!(command, Command::OcclusionTest { .. }))
            .count();
        assert_eq!(tests, MAX_LENS_FLARES);
    }

    #[test]
    fn no_flares_records_nothing() {
        let sprites = LensFlareSprites {
            program: Handle::new(2),
        };
        let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
            "fs",
            CommandBufferFlags::SECOND_LEVEL,
        ));

        sprites
            .record(&FrameView::default(), &VisibilityResults::new(), &mut cmdb)
            .expect("record");

        assert!(cmdb.is_empty());
    }
}
