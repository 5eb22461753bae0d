// renderer/scheduler.rs
//
// Builds the per-worker second-level command buffers for the opaque, shadow
// and transparent passes on a dedicated rayon pool.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::batch::{BatchStats, DrawBatcher, DrawContext, DrawPass, LodPolicy};
use super::frame::{FrameContext, FrameView};
use super::partition::{last_worker_with_work, partition, WorkerId};
use crate::error::{RenderError, Result};
use crate::gpu::{
    CommandBuffer, CommandBufferFlags, CommandBufferInit, SurfaceInfo, TextureRef, TextureUsage,
};
use crate::settings::Resolution;
use crate::visibility::{PassCategory, VisibilityResults, VisibleItem};

/// Order-dependent draws appended after the last batched draw of a pass.
pub trait TrailingDraws: Send + Sync {
    fn record(
        &self,
        view: &FrameView,
        visibility: &VisibilityResults,
        cmdb: &mut CommandBuffer,
    ) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct TrailingSet {
    pub opaque: Vec<Arc<dyn TrailingDraws>>,
    pub transparent: Vec<Arc<dyn TrailingDraws>>,
}

impl TrailingSet {
    pub fn for_category(&self, category: PassCategory) -> &[Arc<dyn TrailingDraws>] {
        match category {
            PassCategory::Opaque => &self.opaque,
            PassCategory::Transparent => &self.transparent,
        }
    }
}

/// How every fragment of a pass starts: viewport plus the usage each
/// attachment is already in inside the primary render pass.
#[derive(Debug, Clone)]
pub struct PassTargets {
    pub label: &'static str,
    pub viewport: Resolution,
    pub informs: Vec<(TextureRef, TextureUsage)>,
}

impl PassTargets {
    pub fn new(label: &'static str, viewport: Resolution) -> Self {
        Self {
            label,
            viewport,
            informs: Vec::new(),
        }
    }

    pub fn inform(mut self, texture: &TextureRef, usage: TextureUsage) -> Self {
        self.informs.push((TextureRef::clone(texture), usage));
        self
    }

    fn begin_fragment(&self, worker: WorkerId, flags: CommandBufferFlags) -> CommandBuffer {
        let mut cmdb = CommandBuffer::new(CommandBufferInit::new(
            format!("{} #{worker}", self.label),
            flags,
        ));
        for (texture, usage) in &self.informs {
            cmdb.inform_texture_usage(texture.id(), SurfaceInfo::BASE, *usage);
        }
        cmdb.set_viewport(0, 0, self.viewport.width, self.viewport.height);
        cmdb
    }
}

#[derive(Default)]
struct WorkerOutput {
    fragments: [Option<CommandBuffer>; 2],
    shadow: Option<CommandBuffer>,
    stats: [BatchStats; 2],
    shadow_stats: BatchStats,
}

type WorkerResult = std::result::Result<WorkerOutput, (PassCategory, RenderError)>;

struct BuildInput<'f> {
    view: FrameView,
    visibility: &'f VisibilityResults,
    last_worker: [Option<WorkerId>; 2],
    last_shadow_worker: Option<WorkerId>,
}

const FRAGMENT_FLAGS: CommandBufferFlags =
    CommandBufferFlags::GRAPHICS_WORK.union(CommandBufferFlags::SECOND_LEVEL);

pub struct CommandBufferScheduler {
    pool: ThreadPool,
    worker_count: usize,
    lod: LodPolicy,
    targets: [PassTargets; 2],
    shadow_targets: PassTargets,
    trailing: TrailingSet,
}

impl CommandBufferScheduler {
    pub fn new(
        worker_count: usize,
        lod: LodPolicy,
        opaque: PassTargets,
        transparent: PassTargets,
        shadow: PassTargets,
        trailing: TrailingSet,
    ) -> Result<Self> {
        let worker_count = worker_count.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("cmdb-worker-{index}"))
            .build()
            .map_err(|err| {
                RenderError::Configuration(format!("failed to build worker pool: {err}"))
            })?;

        log::info!("Command buffer scheduler running {} workers", worker_count);

        Ok(Self {
            pool,
            worker_count,
            lod,
            targets: [opaque, transparent],
            shadow_targets: shadow,
            trailing,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Builds every fragment for `frame` and stores them, sealed, in the
    /// frame's pass bookkeeping. Blocks until every worker is done.
    pub fn build(&self, frame: &mut FrameContext<'_>) -> Result<()> {
        let visibility = frame.visibility();
        let workers = self.worker_count;

        // Decided here, before dispatch, so no worker races on who owns the
        // trailing draws.
        let input = BuildInput {
            view: frame.view,
            visibility,
            last_worker: PassCategory::ALL
                .map(|category| last_worker_with_work(visibility.count(category), workers)),
            last_shadow_worker: last_worker_with_work(visibility.shadow_casters.len(), workers),
        };

        let results: Vec<WorkerResult> = self.pool.install(|| {
            (0..workers)
                .into_par_iter()
                .map(|worker| self.build_worker(worker, &input))
                .collect()
        });

        let mut passes: [Vec<Option<CommandBuffer>>; 2] = Default::default();
        let mut shadow = Vec::with_capacity(workers);
        let mut stats = [BatchStats::default(); 2];
        let mut shadow_stats = BatchStats::default();

        for (worker, result) in results.into_iter().enumerate() {
            let output = result.map_err(|(category, source)| RenderError::WorkerTask {
                worker,
                category,
                source: Box::new(source),
            })?;

            let [opaque, transparent] = output.fragments;
            passes[0].push(opaque);
            passes[1].push(transparent);
            shadow.push(output.shadow);
            stats[0] += output.stats[0];
            stats[1] += output.stats[1];
            shadow_stats += output.shadow_stats;
        }

        let [opaque, transparent] = passes;
        for (category, fragments) in PassCategory::ALL.into_iter().zip([opaque, transparent]) {
            let pass = frame.pass_mut(category);
            pass.last_worker_with_work = input.last_worker[category.index()];
            pass.fragments = fragments;

            let built = pass.fragment_count();
            let draws: usize = pass
                .fragments
                .iter()
                .flatten()
                .map(CommandBuffer::batched_draw_count)
                .sum();
            frame.stats.fragments[category.index()] = built;
            frame.stats.draw_calls[category.index()] = draws;
        }
        frame.stats.shadow_draw_calls = shadow.iter().flatten().map(CommandBuffer::batched_draw_count).sum();
        frame.stats.merged_draw_calls =
            stats[0].merged_draw_calls + stats[1].merged_draw_calls + shadow_stats.merged_draw_calls;
        frame.shadow_fragments = shadow;

        log::debug!(
            "Built {} opaque, {} transparent fragments (last workers {:?})",
            frame.stats.fragments[0],
            frame.stats.fragments[1],
            input.last_worker
        );
        Ok(())
    }

    fn build_worker(&self, worker: WorkerId, input: &BuildInput<'_>) -> WorkerResult {
        let mut output = WorkerOutput::default();

        self.build_category(PassCategory::Opaque, worker, input, &mut output)
            .map_err(|err| (PassCategory::Opaque, err))?;

        // Shadow casters are depth-only work and report as opaque.
        self.build_shadow(worker, input, &mut output)
            .map_err(|err| (PassCategory::Opaque, err))?;

        self.build_category(PassCategory::Transparent, worker, input, &mut output)
            .map_err(|err| (PassCategory::Transparent, err))?;

        Ok(output)
    }

    fn build_category(
        &self,
        category: PassCategory,
        worker: WorkerId,
        input: &BuildInput<'_>,
        output: &mut WorkerOutput,
    ) -> Result<()> {
        let items = input.visibility.items(category);
        let targets = &self.targets[category.index()];
        let last = input.last_worker[category.index()];
        let trailing = self.trailing.for_category(category);

        let mut fragment = None;
        let range = partition(items.len(), worker, self.worker_count);
        if !range.is_empty() {
            let mut cmdb = targets.begin_fragment(worker, FRAGMENT_FLAGS);
            output.stats[category.index()] =
                self.draw_items(&mut cmdb, input.view, category.into(), &items[range.as_range()])?;
            fragment = Some(cmdb);
        }

        if last == Some(worker) {
            if let Some(cmdb) = fragment.as_mut() {
                record_trailing(trailing, input, cmdb)?;
            }
        } else if last.is_none()
            && worker == self.worker_count - 1
            && category.synthesizes_trailing_fragment()
            && !trailing.is_empty()
        {
            // No worker has work for this pass; give the trailing draws a
            // fragment of their own.
            let mut cmdb =
                targets.begin_fragment(worker, FRAGMENT_FLAGS | CommandBufferFlags::SMALL_BATCH);
            record_trailing(trailing, input, &mut cmdb)?;
            fragment = Some(cmdb);
        }

        if let Some(cmdb) = fragment.as_mut() {
            cmdb.flush();
        }
        output.fragments[category.index()] = fragment;
        Ok(())
    }

    fn build_shadow(&self, worker: WorkerId, input: &BuildInput<'_>, output: &mut WorkerOutput) -> Result<()> {
        let casters = &input.visibility.shadow_casters;
        let range = partition(casters.len(), worker, self.worker_count);
        if range.is_empty() {
            return Ok(());
        }
        debug_assert!(input.last_shadow_worker.is_some_and(|last| worker <= last));

        let mut cmdb = self.shadow_targets.begin_fragment(worker, FRAGMENT_FLAGS);
        output.shadow_stats =
            self.draw_items(&mut cmdb, input.view, DrawPass::Shadow, &casters[range.as_range()])?;
        cmdb.flush();
        output.shadow = Some(cmdb);
        Ok(())
    }

    fn draw_items(
        &self,
        cmdb: &mut CommandBuffer,
        view: FrameView,
        pass: DrawPass,
        items: &[VisibleItem],
    ) -> Result<BatchStats> {
        let mut batcher = DrawBatcher::new(self.lod);
        let mut ctx = DrawContext::new(view, pass, cmdb);
        batcher.draw_range(&mut ctx, items)?;
        Ok(batcher.stats())
    }
}

fn record_trailing(
    trailing: &[Arc<dyn TrailingDraws>],
    input: &BuildInput<'_>,
    cmdb: &mut CommandBuffer,
) -> Result<()> {
    for draws in trailing {
        draws.record(&input.view, input.visibility, cmdb)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Command;
    use crate::test_support::{item, visibility_with, FailingSubmitter, MarkerTrailing, RecordingSubmitter};

    fn scheduler(workers: usize, trailing: TrailingSet) -> CommandBufferScheduler {
        CommandBufferScheduler::new(
            workers,
            LodPolicy::new(100.0),
            PassTargets::new("gbuffer", Resolution::new(64, 64)),
            PassTargets::new("forward", Resolution::new(32, 32)),
            PassTargets::new("shadow", Resolution::new(128, 128)),
            trailing,
        )
        .expect("pool")
    }

    fn markers(cmdb: &CommandBuffer) -> usize {
        cmdb.commands()
            .iter()
            .filter(|command| matches!(command, Command::OcclusionTest { .. }))
            .count()
    }

    #[test]
    fn trailing_draws_attach_to_the_last_busy_worker() {
        let submitter = RecordingSubmitter::shared();
        let items: Vec<_> = (0..10).map(|_| item(&submitter, 0, 1.0)).collect();
        let visibility = visibility_with(items, Vec::new());
        let trailing = TrailingSet {
            opaque: vec![MarkerTrailing::shared()],
            transparent: Vec::new(),
        };
        let scheduler = scheduler(4, trailing);
        let mut frame = FrameContext::new(FrameView::default(), &visibility);

        scheduler.build(&mut frame).expect("build");

        let pass = frame.pass(PassCategory::Opaque);
        assert_eq!(pass.last_worker_with_work, Some(3));
        assert_eq!(pass.fragment_count(), 4);
        let per_worker: Vec<_> = pass.fragments.iter().flatten().map(markers).collect();
        assert_eq!(per_worker, vec![0, 0, 0, 1]);
        assert!(pass.fragments.iter().flatten().all(CommandBuffer::is_sealed));
    }

    #[test]
    fn missing_transparent_work_gets_one_synthetic_fragment() {
        let submitter = RecordingSubmitter::shared();
        let opaque: Vec<_> = (0..5).map(|_| item(&submitter, 1, 1.0)).collect();
        let visibility = visibility_with(opaque, Vec::new());
        let trailing = TrailingSet {
            opaque: Vec::new(),
            transparent: vec![MarkerTrailing::shared()],
        };
        let scheduler = scheduler(3, trailing);
        let mut frame = FrameContext::new(FrameView::default(), &visibility);

        scheduler.build(&mut frame).expect("build");

        let pass = frame.pass(PassCategory::Transparent);
        assert_eq!(pass.last_worker_with_work, None);
        assert!(pass.fragments[0].is_none());
        assert!(pass.fragments[1].is_none());
        let synthetic = pass.fragments[2].as_ref().expect("worker 2 owns the trailing draws");
        assert_eq!(markers(synthetic), 1);
        assert!(synthetic.flags().contains(CommandBufferFlags::SMALL_BATCH));
        assert!(synthetic.is_sealed());
    }

    #[test]
    fn missing_opaque_work_drops_opaque_trailing_draws() {
        let visibility = VisibilityResults::new();
        let trailing = TrailingSet {
            opaque: vec![MarkerTrailing::shared()],
            transparent: Vec::new(),
        };
        let scheduler = scheduler(2, trailing);
        let mut frame = FrameContext::new(FrameView::default(), &visibility);

        scheduler.build(&mut frame).expect("build");

        assert_eq!(frame.pass(PassCategory::Opaque).fragment_count(), 0);
    }

    #[test]
    fn first_failing_worker_is_reported() {
        let failing = FailingSubmitter::shared();
        let items: Vec<_> = (0..6).map(|_| item(&failing, 0, 1.0)).collect();
        let visibility = visibility_with(Vec::new(), items);
        let scheduler = scheduler(3, TrailingSet::default());
        let mut frame = FrameContext::new(FrameView::default(), &visibility);

        let err = scheduler.build(&mut frame).expect_err("submitter fails");

        assert!(matches!(
            err,
            RenderError::WorkerTask {
                worker: 0,
                category: PassCategory::Transparent,
                ..
            }
        ));
    }

    #[test]
    fn shadow_casters_are_spread_over_workers() {
        let submitter = RecordingSubmitter::shared();
        let mut visibility = VisibilityResults::new();
        visibility.shadow_casters = (0..3).map(|_| item(&submitter, 5, 1.0)).collect();
        let scheduler = scheduler(2, TrailingSet::default());
        let mut frame = FrameContext::new(FrameView::default(), &visibility);

        scheduler.build(&mut frame).expect("build");

        assert_eq!(frame.take_shadow_fragments().len(), 2);
        assert_eq!(frame.stats.shadow_draw_calls, 2);
    }
}
