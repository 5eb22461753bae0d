#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};
use render_orchestrator::gpu::HeadlessDevice;
use render_orchestrator::renderer::{
    DrawContext, DrawSubmitter, InstancedMeshSubmitter, PassIo, RenderDescriptor, Stage, StageId,
};
use render_orchestrator::resource::{Handle, InMemoryResources};
use render_orchestrator::{
    FrameContext, PassCategory, RenderError, Renderer, RendererConfig, Resolution, Result,
    VisibilityResults, VisibleItem,
};

pub fn config() -> RendererConfig {
    RendererConfig {
        resolution: Resolution::new(64, 48),
        worker_count: Some(3),
        ..RendererConfig::default()
    }
}

pub fn renderer_with(config: RendererConfig) -> (Renderer, Arc<HeadlessDevice>, Arc<InMemoryResources>) {
    let device = Arc::new(HeadlessDevice::new());
    let resources = Arc::new(InMemoryResources::new());
    let renderer = Renderer::initialize(config, device.clone(), resources.clone()).expect("renderer initializes");
    // Drop the render-target clears submitted during initialize.
    device.take_submissions();
    (renderer, device, resources)
}

pub fn renderer() -> (Renderer, Arc<HeadlessDevice>, Arc<InMemoryResources>) {
    renderer_with(config())
}

pub fn camera(eye: Vec3) -> (Mat4, Mat4) {
    (
        Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(1.0, 4.0 / 3.0, 0.1, 100.0),
    )
}

pub fn items(
    submitter: &Arc<dyn DrawSubmitter>,
    merge_keys: impl IntoIterator<Item = u64>,
    distance: f32,
) -> Vec<VisibleItem> {
    merge_keys
        .into_iter()
        .map(|key| {
            let descriptor = RenderDescriptor::new(Arc::clone(submitter), Handle::new(0), Handle::new(0))
                .with_merge_key(key);
            VisibleItem::new(Arc::new(descriptor), distance)
        })
        .collect()
}

pub fn instanced() -> Arc<dyn DrawSubmitter> {
    Arc::new(InstancedMeshSubmitter::default())
}

pub fn scene(opaque: usize, transparent: usize, shadow: usize) -> VisibilityResults {
    let submitter = instanced();
    let mut visibility = VisibilityResults::new();
    visibility.extend(PassCategory::Opaque, items(&submitter, (0..opaque).map(|i| i as u64 % 3), 5.0));
    visibility.extend(
        PassCategory::Transparent,
        items(&submitter, std::iter::repeat(0).take(transparent), 5.0),
    );
    visibility.shadow_casters = items(&submitter, std::iter::repeat(1).take(shadow), 5.0);
    visibility
}

pub struct FailingSubmitter;

impl DrawSubmitter for FailingSubmitter {
    fn submit(&self, _ctx: &mut DrawContext<'_>, _batch: &[RenderDescriptor]) -> Result<()> {
        Err(RenderError::Submission("draw rejected".into()))
    }
}

/// Declares nothing and fails when run.
pub struct FailingStage {
    pub id: StageId,
    pub io: PassIo,
}

impl FailingStage {
    pub fn boxed(id: StageId) -> Box<dyn Stage> {
        Box::new(Self { id, io: PassIo::new() })
    }
}

impl Stage for FailingStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn run(&mut self, _frame: &mut FrameContext<'_>) -> Result<()> {
        Err(RenderError::Submission("device lost".into()))
    }
}
