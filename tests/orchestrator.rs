mod common;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use render_orchestrator::gpu::{
    Command, CommandBuffer, CommandBufferFlags, HeadlessDevice, SurfaceInfo, TextureId,
    TextureUsage,
};
use render_orchestrator::renderer::{Barrier, DrawSubmitter, PassIo, Stage, TargetName};
use render_orchestrator::resource::InMemoryResources;
use render_orchestrator::{
    FrameContext, FrameView, PassCategory, RenderError, Renderer, RendererConfig, Resolution,
    Result, StageId, VisibilityResults,
};

fn view_from(eye: Vec3) -> FrameView {
    let (view, projection) = common::camera(eye);
    FrameView::from_camera(view, projection)
}

fn render(renderer: &mut Renderer, visibility: &VisibilityResults) -> Result<()> {
    let mut frame = FrameContext::new(view_from(Vec3::new(0.0, 2.0, 6.0)), visibility);
    renderer.render_frame(&mut frame)
}

fn submitted_primary(device: &HeadlessDevice) -> CommandBuffer {
    let mut submissions = device.take_submissions();
    assert_eq!(submissions.len(), 1, "one submission per frame");
    let mut buffers = submissions.remove(0);
    assert_eq!(buffers.len(), 1, "one primary buffer per frame");
    buffers.remove(0)
}

fn render_pass_labels(cmdb: &CommandBuffer) -> Vec<&'static str> {
    cmdb.commands()
        .iter()
        .filter_map(|command| match command {
            Command::BeginRenderPass { label, .. } => Some(*label),
            _ => None,
        })
        .collect()
}

/// Leaves the SSAO target in a write usage after running.
struct UnbalancedStage {
    io: PassIo,
}

impl Stage for UnbalancedStage {
    fn id(&self) -> StageId {
        StageId::SsaoMain
    }

    fn io(&self) -> &PassIo {
        &self.io
    }

    fn declare_post_barriers(&self, _out: &mut Vec<Barrier>) {}

    fn run(&mut self, _frame: &mut FrameContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[test]
fn every_render_target_is_cleared_at_initialize() {
    let device = Arc::new(HeadlessDevice::new());
    let renderer = Renderer::initialize(
        common::config(),
        device.clone(),
        Arc::new(InMemoryResources::new()),
    )
    .expect("renderer");

    let clears = device.take_submissions();
    assert_eq!(clears.len(), renderer.targets().textures().count());
    for submission in &clears {
        let cmdb = &submission[0];
        assert!(cmdb.is_sealed());
        assert!(matches!(
            cmdb.commands().first(),
            Some(Command::TextureBarrier { before, after, .. })
                if *before == TextureUsage::NONE && *after == TextureUsage::ATTACHMENT_WRITE
        ));
    }
}

#[test]
fn stages_run_in_the_fixed_order() {
    let (mut renderer, device, _) = common::renderer();
    let visibility = common::scene(6, 2, 3);

    render(&mut renderer, &visibility).expect("frame");

    assert_eq!(renderer.stage_order(), StageId::ORDER.to_vec());
    let primary = submitted_primary(&device);
    let positions: Vec<usize> = render_pass_labels(&primary)
        .into_iter()
        .filter_map(|label| StageId::ORDER.iter().position(|id| id.name() == label))
        .collect();
    assert!(!positions.is_empty());
    assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]), "{positions:?}");
    assert_eq!(
        renderer.last_frame_stats().stages_executed,
        StageId::ORDER.len() - 1
    );
}

#[test]
fn frame_uniforms_are_uploaded_first() {
    let (mut renderer, device, _) = common::renderer();

    render(&mut renderer, &VisibilityResults::new()).expect("frame");

    let primary = submitted_primary(&device);
    assert!(matches!(
        primary.commands().first(),
        Some(Command::UploadUniforms { slot: 0, data }) if data.len() == 272
    ));
    assert!(primary
        .flags()
        .contains(CommandBufferFlags::GRAPHICS_WORK | CommandBufferFlags::COMPUTE_WORK));
}

#[test]
fn barriers_chain_and_return_every_surface_to_rest() {
    let (mut renderer, device, _) = common::renderer();
    renderer.set_debug_overlay(true);
    let visibility = common::scene(12, 5, 4);

    render(&mut renderer, &visibility).expect("frame");

    let primary = submitted_primary(&device);
    let mut chains: HashMap<(TextureId, SurfaceInfo), Vec<(TextureUsage, TextureUsage)>> = HashMap::new();
    for command in primary.commands() {
        if let Command::TextureBarrier {
            texture,
            surface,
            before,
            after,
        } = command
        {
            chains.entry((*texture, *surface)).or_default().push((*before, *after));
        }
    }

    assert!(!chains.is_empty());
    for (surface, chain) in &chains {
        for pair in chain.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "broken chain on {surface:?}");
        }
        let first = chain.first().map(|b| b.0);
        let last = chain.last().map(|b| b.1);
        assert_eq!(first, last, "{surface:?} does not return to rest");
    }
    assert_eq!(renderer.last_frame_stats().barriers, primary.barrier_count());
}

#[test]
fn fragments_of_every_pass_are_executed() {
    let (mut renderer, device, _) = common::renderer();
    let visibility = common::scene(9, 2, 4);

    render(&mut renderer, &visibility).expect("frame");

    let stats = *renderer.last_frame_stats();
    assert_eq!(stats.fragments(PassCategory::Opaque), 3);
    assert_eq!(stats.fragments(PassCategory::Transparent), 2);

    let primary = submitted_primary(&device);
    let executed = primary
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::ExecuteSecondary(_)))
        .count();
    // 3 opaque + 2 transparent + 3 shadow fragments.
    assert_eq!(executed, 8);
}

#[test]
fn empty_scene_still_renders_the_transparent_trailing_draws() {
    let (mut renderer, device, _) = common::renderer();

    render(&mut renderer, &VisibilityResults::new()).expect("frame");

    let stats = renderer.last_frame_stats();
    assert_eq!(stats.fragments(PassCategory::Opaque), 0);
    assert_eq!(stats.fragments(PassCategory::Transparent), 1);
    assert_eq!(stats.draw_calls(PassCategory::Transparent), 0, "trailing quads are not batched draws");
    assert_eq!(device.submission_count(), 1);
}

#[test]
fn debug_overlay_toggles_the_debug_stage() {
    let (mut renderer, device, _) = common::renderer();
    let visibility = common::scene(3, 0, 0);

    render(&mut renderer, &visibility).expect("frame without overlay");
    let without = submitted_primary(&device);
    assert!(!render_pass_labels(&without).contains(&StageId::Debug.name()));

    renderer.set_debug_overlay(true);
    render(&mut renderer, &visibility).expect("frame with overlay");
    let with = submitted_primary(&device);
    assert!(render_pass_labels(&with).contains(&StageId::Debug.name()));
    assert_eq!(renderer.last_frame_stats().stages_executed, StageId::ORDER.len());
}

#[test]
fn failing_stage_aborts_the_frame_without_submitting() {
    let (mut renderer, device, _) = common::renderer();
    let visibility = common::scene(4, 1, 1);
    let original = renderer
        .replace_stage(common::FailingStage::boxed(StageId::Tonemapping))
        .expect("replacement keeps the chain");

    let err = render(&mut renderer, &visibility).expect_err("stage fails");

    assert!(matches!(
        err,
        RenderError::StageExecution {
            stage: StageId::Tonemapping,
            ..
        }
    ));
    assert_eq!(device.submission_count(), 0);
    assert_eq!(renderer.frame_count(), 0);

    renderer.replace_stage(original).expect("restore");
    render(&mut renderer, &visibility).expect("next frame recovers");
    assert_eq!(device.submission_count(), 1);
    assert_eq!(renderer.frame_count(), 1);
}

#[test]
fn failing_worker_drops_the_frame() {
    let (mut renderer, device, _) = common::renderer();
    let failing: Arc<dyn DrawSubmitter> = Arc::new(common::FailingSubmitter);
    let mut visibility = VisibilityResults::new();
    visibility.extend(PassCategory::Opaque, common::items(&failing, [0, 0, 0, 0, 0], 1.0));

    let err = render(&mut renderer, &visibility).expect_err("worker fails");

    assert!(matches!(
        err,
        RenderError::WorkerTask {
            worker: 0,
            category: PassCategory::Opaque,
            ..
        }
    ));
    assert_eq!(device.submission_count(), 0);
    assert_eq!(renderer.frame_count(), 0);
}

#[test]
fn unbalanced_replacement_is_rejected() {
    let (mut renderer, _, _) = common::renderer();
    let ssao = renderer.targets().texture(TargetName::Ssao).expect("ssao target");
    let stage = UnbalancedStage {
        io: PassIo::new().transition(&ssao, TextureUsage::ATTACHMENT_WRITE),
    };

    let err = renderer
        .replace_stage(Box::new(stage))
        .err()
        .expect("chain breaks");

    assert!(matches!(err, RenderError::Configuration(_)));
    assert_eq!(renderer.stage_order(), StageId::ORDER.to_vec());
    render(&mut renderer, &VisibilityResults::new()).expect("original stage still in place");
}

#[test]
fn replacement_needing_an_ungranted_usage_is_rejected() {
    let (mut renderer, _, _) = common::renderer();
    let ssao = renderer.targets().texture(TargetName::Ssao).expect("ssao target");
    let stage = common::FailingStage {
        id: StageId::SsaoMain,
        io: PassIo::new().transition(&ssao, TextureUsage::ATTACHMENT_READ),
    };

    let err = renderer
        .replace_stage(Box::new(stage))
        .err()
        .expect("ssao is never read as an attachment");

    assert!(matches!(err, RenderError::Configuration(ref message) if message.contains("created without")));
    render(&mut renderer, &VisibilityResults::new()).expect("original stage still in place");
}

#[test]
fn forward_depth_target_grants_the_forward_pass_usage() {
    let (renderer, _, _) = common::renderer();
    let depth_half = renderer.targets().texture(TargetName::DepthHalf).expect("half depth");

    assert!(depth_half
        .desc()
        .usage
        .contains(TextureUsage::ATTACHMENT_READ | TextureUsage::SAMPLED_FRAGMENT));
}

#[test]
fn previous_frame_camera_is_carried_forward() {
    let (mut renderer, _, _) = common::renderer();
    let visibility = VisibilityResults::new();
    let first_view = view_from(Vec3::new(0.0, 1.0, 5.0));
    let second_view = view_from(Vec3::new(3.0, 1.0, 5.0));

    let mut first = FrameContext::new(first_view, &visibility);
    renderer.render_frame(&mut first).expect("first frame");
    let mut second = FrameContext::new(second_view, &visibility);
    renderer.render_frame(&mut second).expect("second frame");

    assert_eq!(first.prev_view_projection, Mat4::IDENTITY);
    assert_eq!(second.prev_view_projection, first_view.view_projection);
    assert_eq!(second.prev_camera_transform, first_view.camera_transform);
    assert_eq!(renderer.history().prev_view_projection, second_view.view_projection);
    assert_eq!(renderer.frame_count(), 2);
}

#[test]
fn jitter_cycles_every_eight_frames() {
    let (mut renderer, _, _) = common::renderer();
    let visibility = VisibilityResults::new();
    let view = view_from(Vec3::new(0.0, 0.0, 4.0));

    let mut jitters = Vec::new();
    for _ in 0..9 {
        let mut frame = FrameContext::new(view, &visibility);
        renderer.render_frame(&mut frame).expect("frame");
        assert_eq!(frame.projection_jitter, frame.jitter * view.projection);
        assert_eq!(frame.view_projection_jitter, frame.projection_jitter * view.view);
        jitters.push(frame.jitter);
    }

    assert_ne!(jitters[0], jitters[1]);
    assert_eq!(jitters[0], jitters[8]);
}

#[test]
fn resource_progress_marks_frames_dirty() {
    let (mut renderer, _, resources) = common::renderer();
    let visibility = VisibilityResults::new();
    let view = view_from(Vec3::new(0.0, 0.0, 4.0));
    let mut dirty = Vec::new();

    for step in 0..3 {
        if step == 2 {
            resources.complete_task();
        }
        let mut frame = FrameContext::new(view, &visibility);
        renderer.render_frame(&mut frame).expect("frame");
        dirty.push(frame.resources_dirty);
    }

    assert_eq!(dirty, vec![true, false, true]);
}

#[test]
fn dropped_frame_keeps_resource_progress_pending() {
    let (mut renderer, _, resources) = common::renderer();
    let visibility = VisibilityResults::new();
    let view = view_from(Vec3::new(0.0, 0.0, 4.0));

    let mut first = FrameContext::new(view, &visibility);
    renderer.render_frame(&mut first).expect("first frame");

    resources.complete_task();
    let original = renderer
        .replace_stage(common::FailingStage::boxed(StageId::Tonemapping))
        .expect("replacement keeps the chain");
    let mut dropped = FrameContext::new(view, &visibility);
    renderer.render_frame(&mut dropped).expect_err("stage fails");
    assert!(dropped.resources_dirty);

    renderer.replace_stage(original).expect("restore");
    let mut next = FrameContext::new(view, &visibility);
    renderer.render_frame(&mut next).expect("next frame");
    assert!(next.resources_dirty, "progress seen only by a dropped frame");

    let mut settled = FrameContext::new(view, &visibility);
    renderer.render_frame(&mut settled).expect("settled frame");
    assert!(!settled.resources_dirty);
}

#[test]
fn reused_frame_context_reports_one_frame_of_stats() {
    let (mut renderer, _, _) = common::renderer();
    let visibility = common::scene(9, 2, 4);
    let mut frame = FrameContext::new(view_from(Vec3::new(0.0, 2.0, 6.0)), &visibility);

    renderer.render_frame(&mut frame).expect("first frame");
    let first = *renderer.last_frame_stats();
    renderer.render_frame(&mut frame).expect("second frame");

    let second = *renderer.last_frame_stats();
    assert_eq!(second.stages_executed, first.stages_executed);
    assert_eq!(second.fragments(PassCategory::Opaque), 3);
    assert_eq!(second.draw_calls, first.draw_calls);
}

#[test]
fn tiny_resolution_is_a_configuration_error() {
    let device = Arc::new(HeadlessDevice::new());
    let config = RendererConfig {
        resolution: Resolution::new(8, 8),
        ..RendererConfig::default()
    };

    let err = Renderer::initialize(config, device.clone(), Arc::new(InMemoryResources::new()))
        .err()
        .expect("rejected");

    assert!(matches!(err, RenderError::Configuration(_)));
    assert_eq!(device.texture_count(), 0);
}

#[test]
fn missing_program_fails_initialization() {
    let result = Renderer::initialize(
        common::config(),
        Arc::new(HeadlessDevice::new()),
        Arc::new(InMemoryResources::failing_on("shaders/Ssao.frag")),
    );

    match result {
        Err(RenderError::ResourceLoad { resource, .. }) => assert_eq!(resource, "shaders/Ssao.frag"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("initialization should fail"),
    }
}

#[test]
fn unproject_recovers_world_points() {
    let view = Mat4::look_at_rh(Vec3::new(1.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh_gl(0.9, 1.5, 0.5, 50.0);
    let viewport = [10, 20, 300, 200];

    for point in [Vec3::ZERO, Vec3::new(-1.0, 0.5, 2.0), Vec3::new(2.0, -1.0, -3.0)] {
        let clip = projection * view * point.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let window = Vec3::new(
            10.0 + (ndc.x + 1.0) * 0.5 * 300.0,
            20.0 + (ndc.y + 1.0) * 0.5 * 200.0,
            (ndc.z + 1.0) * 0.5,
        );

        let back = Renderer::unproject(window, view, projection, viewport);
        assert!((back - point).length() < 1e-2, "{point:?} came back as {back:?}");
    }
}
