// renderer/renderer.rs
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use log::{debug, error, info};

use super::barrier::{Barrier, BarrierViolation, ResourceUsage, UsageTracker};
use super::batch::LodPolicy;
use super::frame::{FrameContext, FrameHistory, FrameStats};
use super::jitter::JitterPattern;
use super::scheduler::CommandBufferScheduler;
use super::stage::{RenderFlags, SharedResources, Stage, StageId, StageInit};
use super::stages::{self, LensFlare};
use super::targets::RenderTargets;
use crate::error::{RenderError, Result};
use crate::gpu::{
    BufferDesc, BufferUsage, CommandBuffer, CommandBufferFlags, CommandBufferInit, GpuDevice,
    SamplerDesc, SamplingFilter, TextureDesc, TextureFormat, TextureKind, TextureUsage,
};
use crate::resource::{LoadProgress, ProgramCache, ResourceProvider, ShaderKey};
use crate::settings::RendererConfig;

const DUMMY_TEXTURE_SIZE: u32 = 4;
const DUMMY_BUFFER_SIZE: u64 = 1024;
const FRAME_UNIFORMS_SLOT: u32 = 0;

/// Frames simulated when checking the barrier chain. Two covers every
/// stage whose declarations alternate with frame parity.
const VALIDATION_FRAMES: u64 = 2;

/// Owns every stage and drives one frame at a time through them.
pub struct Renderer {
    config: RendererConfig,
    device: Arc<dyn GpuDevice>,
    resources: Arc<dyn ResourceProvider>,
    programs: ProgramCache,
    targets: RenderTargets,
    shared: SharedResources,
    stages: Vec<Box<dyn Stage>>,
    lens_flare: LensFlare,
    scheduler: CommandBufferScheduler,
    tracker: UsageTracker,
    jitter: JitterPattern,
    history: FrameHistory,
    load_progress: LoadProgress,
    flags: RenderFlags,
    last_stats: FrameStats,
}

impl Renderer {
    /// Creates the shared resources and every stage in execution order.
    /// The first failing stage aborts initialization.
    pub fn initialize(
        config: RendererConfig,
        device: Arc<dyn GpuDevice>,
        resources: Arc<dyn ResourceProvider>,
    ) -> Result<Self> {
        let renderer = Self::create(config, device, resources);
        if let Err(err) = &renderer {
            error!("Failed to initialize the renderer: {}", err);
        }
        renderer
    }

    fn create(
        config: RendererConfig,
        device: Arc<dyn GpuDevice>,
        resources: Arc<dyn ResourceProvider>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing offscreen renderer. Size {}x{}",
            config.resolution.width, config.resolution.height
        );

        let mut programs = ProgramCache::new();
        let shared = SharedResources {
            dummy_texture: device.create_texture(TextureDesc {
                name: "dummy".into(),
                width: DUMMY_TEXTURE_SIZE,
                height: DUMMY_TEXTURE_SIZE,
                format: TextureFormat::Rgba8Unorm,
                kind: TextureKind::D2,
                mip_count: 1,
                layer_count: 1,
                usage: TextureUsage::SAMPLED_FRAGMENT,
                initial_usage: TextureUsage::SAMPLED_FRAGMENT,
                min_mag_filter: SamplingFilter::Nearest,
                mip_filter: SamplingFilter::Base,
            })?,
            dummy_buffer: device.create_buffer(BufferDesc::new(
                "dummy",
                DUMMY_BUFFER_SIZE,
                BufferUsage::UNIFORM_STORAGE_READ,
            ))?,
            nearest_sampler: device.create_sampler(SamplerDesc {
                min_mag_filter: SamplingFilter::Nearest,
                repeat: false,
            })?,
            linear_sampler: device.create_sampler(SamplerDesc {
                min_mag_filter: SamplingFilter::Linear,
                repeat: false,
            })?,
            quad_program: programs.get_or_load(&ShaderKey::new("shaders/Quad.vert"), resources.as_ref())?,
        };

        let mut targets = RenderTargets::new();
        let pipeline = {
            let mut init = StageInit::new(
                &config,
                &shared,
                &device,
                resources.as_ref(),
                &mut programs,
                &mut targets,
            );
            stages::build(&mut init)?
        };
        let mut stages = pipeline.stages;

        let mut tracker = UsageTracker::new();
        tracker.register_texture(&shared.dummy_texture);
        tracker.register_buffer(&shared.dummy_buffer);
        for texture in targets.textures() {
            tracker.register_texture(texture);
        }
        for buffer in targets.buffers() {
            tracker.register_buffer(buffer);
        }

        validate_barrier_chain(&mut stages, &tracker).map_err(|(stage, violation)| {
            RenderError::Configuration(format!("stage {stage} breaks the barrier chain: {violation}"))
        })?;

        let scheduler = CommandBufferScheduler::new(
            config.effective_worker_count(),
            LodPolicy::new(config.lod_distance),
            pipeline.opaque,
            pipeline.transparent,
            pipeline.shadow,
            pipeline.trailing,
        )?;

        info!(
            "Renderer ready: {} stages, {} targets, {} programs",
            stages.len(),
            targets.len(),
            programs.len()
        );

        Ok(Self {
            jitter: JitterPattern::new(config.resolution),
            flags: RenderFlags {
                debug_overlay: config.debug_overlay,
            },
            config,
            device,
            resources,
            programs,
            targets,
            shared,
            stages,
            lens_flare: pipeline.lens_flare,
            scheduler,
            tracker,
            history: FrameHistory::default(),
            load_progress: LoadProgress::default(),
            last_stats: FrameStats::default(),
        })
    }

    /// Records and submits one frame.
    ///
    /// On error nothing is submitted, the frame counter does not advance and
    /// the renderer stays usable for the next frame.
    pub fn render_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<()> {
        let frame_index = self.history.frame_count;
        frame.frame_index = frame_index;
        frame.jitter = self.jitter.for_frame(frame_index);
        frame.projection_jitter = frame.jitter * frame.view.projection;
        frame.view_projection_jitter = frame.projection_jitter * frame.view.view;
        frame.prev_view_projection = self.history.prev_view_projection;
        frame.prev_camera_transform = self.history.prev_camera_transform;
        frame.stats = FrameStats::default();

        // Committed only on submit so a dropped frame keeps the change pending.
        let progress = LoadProgress::sample(self.resources.as_ref());
        frame.resources_dirty = progress != self.load_progress;

        let uniforms = frame.uniforms();
        frame
            .command_buffer
            .upload_uniforms(FRAME_UNIFORMS_SLOT, bytemuck::bytes_of(&uniforms));

        let tracker = match self.record_frame(frame) {
            Ok(tracker) => tracker,
            Err(err) => {
                error!("Dropping frame {}: {}", frame_index, err);
                return Err(err);
            }
        };

        let mut primary = std::mem::replace(
            &mut frame.command_buffer,
            CommandBuffer::new(CommandBufferInit::new(
                "frame (submitted)",
                CommandBufferFlags::GRAPHICS_WORK | CommandBufferFlags::COMPUTE_WORK,
            )),
        );
        primary.flush();
        if let Err(err) = self.device.submit(vec![primary]) {
            error!("Dropping frame {}: {}", frame_index, err);
            return Err(err);
        }

        if let Some(tracker) = tracker {
            self.tracker = tracker;
        }
        self.load_progress = progress;
        self.history.advance(&frame.view);
        self.last_stats = frame.stats;

        debug!(
            "Frame {} submitted: {} stages, {} barriers, {} opaque / {} transparent draws",
            frame_index,
            frame.stats.stages_executed,
            frame.stats.barriers,
            frame.stats.draw_calls[0],
            frame.stats.draw_calls[1]
        );
        Ok(())
    }

    /// Pre-pass, parallel build, then every enabled stage in order. Returns
    /// the tracker state the frame leaves behind when validation is on.
    fn record_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<Option<UsageTracker>> {
        let flags = self.flags;
        for stage in self.stages.iter_mut() {
            stage.begin_frame(frame.frame_index);
        }

        for stage in self.stages.iter_mut().filter(|stage| stage.is_enabled(&flags)) {
            let id = stage.id();
            stage.prepare(frame).map_err(|err| err.within_stage(id))?;
        }
        self.lens_flare.reset_occlusion_queries(frame);

        self.scheduler.build(frame)?;

        let mut tracker = self.config.validate_barriers.then(|| self.tracker.clone());
        let mut barriers = Vec::new();
        let mut usages = Vec::new();

        for stage in self.stages.iter_mut() {
            if !stage.is_enabled(&flags) {
                continue;
            }
            let id = stage.id();

            barriers.clear();
            stage.declare_pre_barriers(&mut barriers);
            record_barriers(tracker.as_mut(), &barriers, frame, id)?;

            if let Some(tracker) = tracker.as_ref() {
                usages.clear();
                stage.declare_usages(&mut usages);
                check_usages(tracker, &usages, id)?;
            }

            stage.run(frame).map_err(|err| err.within_stage(id))?;

            barriers.clear();
            stage.declare_post_barriers(&mut barriers);
            record_barriers(tracker.as_mut(), &barriers, frame, id)?;

            frame.stats.stages_executed += 1;
        }

        Ok(tracker)
    }

    pub fn set_debug_overlay(&mut self, enabled: bool) {
        if self.flags.debug_overlay != enabled {
            info!("Debug overlay {}", if enabled { "enabled" } else { "disabled" });
        }
        self.flags.debug_overlay = enabled;
    }

    pub fn debug_overlay(&self) -> bool {
        self.flags.debug_overlay
    }

    /// Every stage, in execution order.
    pub fn stage_order(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    /// Stages that run with the current flags.
    pub fn active_stages(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|stage| stage.is_enabled(&self.flags))
            .map(|stage| stage.id())
            .collect()
    }

    /// Swaps in a stage with the same id, keeping its slot in the order.
    /// The replacement must keep the barrier chain intact; otherwise it is
    /// rejected and the previous stage stays in place.
    pub fn replace_stage(&mut self, stage: Box<dyn Stage>) -> Result<Box<dyn Stage>> {
        let id = stage.id();
        let slot = self
            .stages
            .iter()
            .position(|existing| existing.id() == id)
            .ok_or_else(|| RenderError::Configuration(format!("no stage {id} to replace")))?;

        let previous = std::mem::replace(&mut self.stages[slot], stage);
        if let Err((stage, violation)) = validate_barrier_chain(&mut self.stages, &self.tracker) {
            self.stages[slot] = previous;
            return Err(RenderError::Configuration(format!(
                "replacing {id} breaks the barrier chain at {stage}: {violation}"
            )));
        }
        Ok(previous)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn shared(&self) -> &SharedResources {
        &self.shared
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn frame_count(&self) -> u64 {
        self.history.frame_count
    }

    pub fn last_frame_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    /// Maps window coordinates (pixels, depth in [0, 1]) back into the space
    /// `model_view` was built from.
    pub fn unproject(window: Vec3, model_view: Mat4, projection: Mat4, viewport: [i32; 4]) -> Vec3 {
        let inverse = (projection * model_view).inverse();
        let [x, y, width, height] = viewport.map(|v| v as f32);
        let ndc = Vec4::new(
            (window.x - x) / width * 2.0 - 1.0,
            (window.y - y) / height * 2.0 - 1.0,
            window.z * 2.0 - 1.0,
            1.0,
        );
        let out = inverse * ndc;
        out.truncate() / out.w
    }
}

fn record_barriers(
    tracker: Option<&mut UsageTracker>,
    barriers: &[Barrier],
    frame: &mut FrameContext<'_>,
    stage: StageId,
) -> Result<()> {
    if let Some(tracker) = tracker {
        for barrier in barriers {
            tracker
                .apply(barrier)
                .map_err(|violation| RenderError::stage(stage, violation.to_string()))?;
        }
    }
    for barrier in barriers {
        barrier.record(&mut frame.command_buffer);
    }
    frame.stats.barriers += barriers.len();
    Ok(())
}

fn check_usages(tracker: &UsageTracker, usages: &[ResourceUsage], stage: StageId) -> Result<()> {
    for usage in usages {
        tracker
            .check(usage)
            .map_err(|violation| RenderError::stage(stage, violation.to_string()))?;
    }
    Ok(())
}

/// Replays the declarations of every stage over a few frames, with optional
/// stages enabled, and checks that each barrier finds its resource where the
/// previous user left it and that everything is back at rest afterwards.
fn validate_barrier_chain(
    stages: &mut [Box<dyn Stage>],
    rest: &UsageTracker,
) -> std::result::Result<(), (StageId, BarrierViolation)> {
    let flags = RenderFlags { debug_overlay: true };
    let mut tracker = rest.clone();
    let mut barriers = Vec::new();
    let mut usages = Vec::new();

    for frame_index in 0..VALIDATION_FRAMES {
        for stage in stages.iter_mut() {
            stage.begin_frame(frame_index);
        }

        for stage in stages.iter().filter(|stage| stage.is_enabled(&flags)) {
            let id = stage.id();

            barriers.clear();
            stage.declare_pre_barriers(&mut barriers);
            for barrier in &barriers {
                barrier.check_granted().map_err(|violation| (id, violation))?;
                tracker.apply(barrier).map_err(|violation| (id, violation))?;
            }

            usages.clear();
            stage.declare_usages(&mut usages);
            for usage in &usages {
                tracker.check(usage).map_err(|violation| (id, violation))?;
            }

            barriers.clear();
            stage.declare_post_barriers(&mut barriers);
            for barrier in &barriers {
                barrier.check_granted().map_err(|violation| (id, violation))?;
                tracker.apply(barrier).map_err(|violation| (id, violation))?;
            }

            let count = tracker.differences(rest);
            if count > 0 {
                return Err((id, BarrierViolation::Unbalanced { count }));
            }
        }
    }
    Ok(())
}
