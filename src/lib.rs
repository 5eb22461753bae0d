pub mod error;
pub mod gpu;
pub mod renderer;
pub mod resource;
pub mod settings;
pub mod visibility;

pub use error::{RenderError, Result};
pub use renderer::{FrameContext, FrameView, Renderer, StageId};
pub use settings::{RendererConfig, Resolution};
pub use visibility::{PassCategory, VisibilityResults, VisibleItem};

/// Installs the `env_logger` backend at `info` unless `RUST_LOG` says
/// otherwise. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::error::{RenderError, Result};
    use crate::gpu::{Command, CommandBuffer};
    use crate::renderer::{DrawContext, DrawSubmitter, FrameView, RenderDescriptor, RenderingKey, TrailingDraws};
    use crate::resource::{Handle, MeshHandle};
    use crate::visibility::{PassCategory, VisibilityResults, VisibleItem};

    pub type FakeResources = crate::resource::InMemoryResources;

    /// Records every rendering key it is handed and one instanced draw per
    /// batch.
    #[derive(Default)]
    pub struct RecordingSubmitter {
        keys: Mutex<Vec<RenderingKey>>,
    }

    impl RecordingSubmitter {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn keys(&self) -> Vec<RenderingKey> {
            self.keys.lock().clone()
        }
    }

    impl DrawSubmitter for RecordingSubmitter {
        fn submit(&self, ctx: &mut DrawContext<'_>, batch: &[RenderDescriptor]) -> Result<()> {
            self.keys.lock().push(ctx.key);
            let first = &batch[0];
            ctx.command_buffer
                .draw_instanced(first.mesh, first.material, ctx.key.lod, ctx.key.instance_count);
            Ok(())
        }
    }

    pub struct FailingSubmitter;

    impl FailingSubmitter {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self)
        }
    }

    impl DrawSubmitter for FailingSubmitter {
        fn submit(&self, _ctx: &mut DrawContext<'_>, _batch: &[RenderDescriptor]) -> Result<()> {
            Err(RenderError::Submission("rejected".into()))
        }
    }

    /// Trailing draw that leaves a single occlusion test behind.
    pub struct MarkerTrailing;

    impl MarkerTrailing {
        pub fn shared() -> Arc<dyn TrailingDraws> {
            Arc::new(Self)
        }
    }

    impl TrailingDraws for MarkerTrailing {
        fn record(&self, _view: &FrameView, _visibility: &VisibilityResults, cmdb: &mut CommandBuffer) -> Result<()> {
            cmdb.occlusion_test(0);
            Ok(())
        }
    }

    pub fn item<S: DrawSubmitter + 'static>(submitter: &Arc<S>, merge_key: u64, distance: f32) -> VisibleItem {
        item_with(submitter, merge_key, distance, Handle::new(0))
    }

    pub fn item_with<S: DrawSubmitter + 'static>(
        submitter: &Arc<S>,
        merge_key: u64,
        distance: f32,
        mesh: MeshHandle,
    ) -> VisibleItem {
        let submitter: Arc<dyn DrawSubmitter> = submitter.clone();
        let descriptor = RenderDescriptor::new(submitter, mesh, Handle::new(0)).with_merge_key(merge_key);
        VisibleItem::new(Arc::new(descriptor), distance)
    }

    pub fn visibility_with(opaque: Vec<VisibleItem>, transparent: Vec<VisibleItem>) -> VisibilityResults {
        let mut visibility = VisibilityResults::new();
        visibility.extend(PassCategory::Opaque, opaque);
        visibility.extend(PassCategory::Transparent, transparent);
        visibility
    }

    /// `(lod, instance_count)` of every instanced draw, in recording order.
    pub fn draws_in(cmdb: &CommandBuffer) -> Vec<(u8, u32)> {
        cmdb.commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawInstanced {
                    lod,
                    instance_count,
                    ..
                } => Some((*lod, *instance_count)),
                _ => None,
            })
            .collect()
    }
}
