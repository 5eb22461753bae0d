use std::sync::Arc;

use glam::{Mat4, Vec3};
use render_orchestrator::gpu::HeadlessDevice;
use render_orchestrator::renderer::{InstancedMeshSubmitter, RenderDescriptor};
use render_orchestrator::resource::{Handle, InMemoryResources};
use render_orchestrator::visibility::VisibleLight;
use render_orchestrator::{
    init_logging, FrameContext, FrameView, PassCategory, Renderer, RendererConfig,
    VisibilityResults, VisibleItem,
};

const DEFAULT_CONFIG_PATH: &str = "renderer.json";
const DEFAULT_FRAMES: u64 = 4;

/// A small grid of cubes, half of them sharing one merge key.
fn demo_visibility() -> VisibilityResults {
    let submitter = Arc::new(InstancedMeshSubmitter::default());
    let mut visibility = VisibilityResults::new();

    for i in 0..32u32 {
        let position = Vec3::new((i % 8) as f32 * 2.0, 0.0, -((i / 8) as f32) * 2.0 - 5.0);
        let descriptor = RenderDescriptor::new(submitter.clone(), Handle::new(0), Handle::new(0))
            .with_merge_key(if i % 2 == 0 { 1 } else { 0 })
            .with_transform(Mat4::from_translation(position));
        let item = VisibleItem::new(Arc::new(descriptor), position.length());
        visibility.shadow_casters.push(item.clone());
        visibility.push(PassCategory::Opaque, item);
    }

    visibility.lights.push(VisibleLight {
        position: Vec3::new(4.0, 6.0, -8.0),
        radius: 12.0,
    });
    visibility
}

fn main() {
    init_logging();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let frames = args
        .next()
        .and_then(|count| count.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let config = match RendererConfig::load_from_path(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            std::process::exit(1);
        }
    };

    let device = Arc::new(HeadlessDevice::new());
    let mut renderer = match Renderer::initialize(config, device.clone(), Arc::new(InMemoryResources::new())) {
        Ok(renderer) => renderer,
        Err(err) => {
            log::error!("{err}");
            std::process::exit(1);
        }
    };

    let visibility = demo_visibility();
    let aspect = renderer.config().resolution.width as f32 / renderer.config().resolution.height as f32;
    let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 200.0);

    for frame_index in 0..frames {
        let eye = Vec3::new(frame_index as f32 * 0.25, 4.0, 6.0);
        let view = Mat4::look_at_rh(eye, Vec3::new(7.0, 0.0, -8.0), Vec3::Y);
        let mut frame = FrameContext::new(FrameView::from_camera(view, projection), &visibility);

        if let Err(err) = renderer.render_frame(&mut frame) {
            log::error!("Frame {frame_index} failed: {err}");
            continue;
        }

        let stats = renderer.last_frame_stats();
        log::info!(
            "Frame {}: {} stages, {} barriers, {} opaque draws ({} merged), {} shadow draws",
            frame_index,
            stats.stages_executed,
            stats.barriers,
            stats.draw_calls(PassCategory::Opaque),
            stats.merged_draw_calls,
            stats.shadow_draw_calls
        );
    }

    log::info!("Submitted {} command buffer batches", device.submission_count());
}
