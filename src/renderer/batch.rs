// renderer/batch.rs
//
// Merges consecutive compatible draws into instanced submissions. Input order
// is visibility order and is never changed; only neighbours can merge.

use std::fmt;
use std::sync::Arc;

use glam::Mat4;

use super::frame::FrameView;
use crate::error::Result;
use crate::gpu::CommandBuffer;
use crate::resource::{MaterialHandle, MeshHandle};
use crate::visibility::{PassCategory, Renderable, VisibleItem};

/// Most instances one batched draw can carry.
pub const MAX_INSTANCES: usize = 64;
/// Number of discrete LOD buckets.
pub const MAX_LOD_COUNT: u8 = 3;

/// The pass a draw is recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    GBuffer,
    Forward,
    Shadow,
}

impl From<PassCategory> for DrawPass {
    fn from(category: PassCategory) -> Self {
        match category {
            PassCategory::Opaque => Self::GBuffer,
            PassCategory::Transparent => Self::Forward,
        }
    }
}

/// Per-submission parameters handed to a [`DrawSubmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderingKey {
    pub pass: DrawPass,
    pub lod: u8,
    pub instance_count: u32,
}

impl RenderingKey {
    pub fn new(pass: DrawPass) -> Self {
        Self {
            pass,
            lod: 0,
            instance_count: 1,
        }
    }
}

/// Maps camera distance to a LOD bucket: `floor(min(distance / lod_distance, max_lod))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodPolicy {
    pub lod_distance: f32,
    pub max_lod: u8,
}

impl LodPolicy {
    pub fn new(lod_distance: f32) -> Self {
        Self {
            lod_distance,
            max_lod: MAX_LOD_COUNT - 1,
        }
    }

    /// Continuous LOD before clamping and flooring.
    pub fn raw_lod(&self, distance: f32) -> f32 {
        distance / self.lod_distance
    }

    pub fn resolve(&self, distance: f32) -> u8 {
        let clamped = self.raw_lod(distance).min(f32::from(self.max_lod)).max(0.0);
        clamped.floor() as u8
    }
}

/// Records the actual draw for a run of merged descriptors.
///
/// Descriptors only merge when they share the same submitter instance
/// (compared by `Arc` pointer), so one call always sees homogeneous input.
pub trait DrawSubmitter: Send + Sync {
    fn submit(&self, ctx: &mut DrawContext<'_>, batch: &[RenderDescriptor]) -> Result<()>;
}

/// One object's contribution to a pass.
#[derive(Clone)]
pub struct RenderDescriptor {
    pub submitter: Arc<dyn DrawSubmitter>,
    /// `0` never merges, not even with another `0`.
    pub merge_key: u64,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub transform: Mat4,
    /// Filled in by the batcher from the item's camera distance.
    pub lod: u8,
}

impl RenderDescriptor {
    pub fn new(submitter: Arc<dyn DrawSubmitter>, mesh: MeshHandle, material: MaterialHandle) -> Self {
        Self {
            submitter,
            merge_key: 0,
            mesh,
            material,
            transform: Mat4::IDENTITY,
            lod: 0,
        }
    }

    pub fn with_merge_key(mut self, merge_key: u64) -> Self {
        self.merge_key = merge_key;
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_lod(mut self, lod: u8) -> Self {
        self.lod = lod;
        self
    }

    /// Same submitter, equal non-zero merge keys and the same resolved LOD.
    pub fn can_merge_with(&self, other: &RenderDescriptor) -> bool {
        Arc::ptr_eq(&self.submitter, &other.submitter)
            && self.merge_key != 0
            && self.merge_key == other.merge_key
            && self.lod == other.lod
    }
}

/// A descriptor that never changes describes itself.
impl Renderable for RenderDescriptor {
    fn render_descriptor(&self) -> RenderDescriptor {
        self.clone()
    }
}

impl fmt::Debug for RenderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderDescriptor")
            .field("merge_key", &self.merge_key)
            .field("mesh", &self.mesh)
            .field("material", &self.material)
            .field("lod", &self.lod)
            .finish_non_exhaustive()
    }
}

/// Everything a submitter needs to record one draw.
pub struct DrawContext<'a> {
    pub view: FrameView,
    pub key: RenderingKey,
    pub command_buffer: &'a mut CommandBuffer,
}

impl<'a> DrawContext<'a> {
    pub fn new(view: FrameView, pass: DrawPass, command_buffer: &'a mut CommandBuffer) -> Self {
        Self {
            view,
            key: RenderingKey::new(pass),
            command_buffer,
        }
    }
}

/// Pending compatible descriptors, bounded by [`MAX_INSTANCES`].
pub struct BatchAccumulator {
    pending: Vec<RenderDescriptor>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(MAX_INSTANCES),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() == MAX_INSTANCES
    }

    /// An empty accumulator accepts anything; otherwise the newcomer must
    /// merge with the last pending descriptor.
    pub fn accepts(&self, descriptor: &RenderDescriptor) -> bool {
        self.pending
            .last()
            .map_or(true, |last| last.can_merge_with(descriptor))
    }

    pub fn push(&mut self, descriptor: RenderDescriptor) {
        debug_assert!(!self.is_full(), "accumulator overflow");
        debug_assert!(self.accepts(&descriptor), "incompatible descriptor");
        self.pending.push(descriptor);
    }

    pub fn as_slice(&self) -> &[RenderDescriptor] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub draw_calls: u32,
    pub instances: u32,
    /// Draws saved by merging.
    pub merged_draw_calls: u32,
}

impl std::ops::AddAssign for BatchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draw_calls += rhs.draw_calls;
        self.instances += rhs.instances;
        self.merged_draw_calls += rhs.merged_draw_calls;
    }
}

/// Walks a range of visible items and emits the fewest draws that respect
/// merge keys, LOD boundaries and the instance bound.
pub struct DrawBatcher {
    lod: LodPolicy,
    accumulator: BatchAccumulator,
    stats: BatchStats,
}

impl DrawBatcher {
    pub fn new(lod: LodPolicy) -> Self {
        Self {
            lod,
            accumulator: BatchAccumulator::new(),
            stats: BatchStats::default(),
        }
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Records `items` into `ctx`. An empty slice records nothing.
    pub fn draw_range(&mut self, ctx: &mut DrawContext<'_>, items: &[VisibleItem]) -> Result<()> {
        for item in items {
            self.draw_single(ctx, item)?;
        }

        self.flush(ctx)
    }

    fn draw_single(&mut self, ctx: &mut DrawContext<'_>, item: &VisibleItem) -> Result<()> {
        if self.accumulator.is_full() {
            self.flush(ctx)?;
        }

        // LOD is part of compatibility, so resolve it before checking.
        let lod = self.lod.resolve(item.distance);
        let descriptor = item.renderable.render_descriptor().with_lod(lod);

        if !self.accumulator.accepts(&descriptor) {
            self.flush(ctx)?;
        }

        self.accumulator.push(descriptor);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut DrawContext<'_>) -> Result<()> {
        let Some(first) = self.accumulator.as_slice().first() else {
            return Ok(());
        };

        let count = self.accumulator.len() as u32;
        ctx.key.lod = first.lod;
        ctx.key.instance_count = count;

        let submitter = Arc::clone(&first.submitter);
        let result = submitter.submit(ctx, self.accumulator.as_slice());
        self.accumulator.clear();
        result?;

        self.stats.draw_calls += 1;
        self.stats.instances += count;
        if count > 1 {
            self.stats.merged_draw_calls += count - 1;
        }
        Ok(())
    }
}

/// Stock submitter: uploads the instance transforms and issues one
/// instanced draw of the first descriptor's mesh and material.
#[derive(Debug, Default)]
pub struct InstancedMeshSubmitter {
    pub transforms_slot: u32,
}

impl DrawSubmitter for InstancedMeshSubmitter {
    fn submit(&self, ctx: &mut DrawContext<'_>, batch: &[RenderDescriptor]) -> Result<()> {
        let Some(first) = batch.first() else {
            return Ok(());
        };

        let transforms: Vec<[f32; 16]> = batch
            .iter()
            .map(|descriptor| descriptor.transform.to_cols_array())
            .collect();
        ctx.command_buffer
            .upload_uniforms(self.transforms_slot, bytemuck::cast_slice(&transforms));
        ctx.command_buffer.draw_instanced(
            first.mesh,
            first.material,
            ctx.key.lod,
            ctx.key.instance_count,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, CommandBufferFlags, CommandBufferInit};
    use crate::resource::Handle;
    use crate::test_support::{draws_in, item, item_with, RecordingSubmitter};

    fn fragment() -> CommandBuffer {
        CommandBuffer::new(CommandBufferInit::new(
            "test",
            CommandBufferFlags::GRAPHICS_WORK | CommandBufferFlags::SECOND_LEVEL,
        ))
    }

    /// `(lod, instance_count)` of every emitted draw.
    fn run(items: &[VisibleItem], lod_distance: f32) -> (Vec<(u8, u32)>, BatchStats) {
        let mut cmdb = fragment();
        let mut batcher = DrawBatcher::new(LodPolicy::new(lod_distance));
        let mut ctx = DrawContext::new(FrameView::default(), DrawPass::GBuffer, &mut cmdb);
        batcher.draw_range(&mut ctx, items).expect("batching succeeds");
        (draws_in(&cmdb), batcher.stats())
    }

    fn sizes(draws: &[(u8, u32)]) -> Vec<u32> {
        draws.iter().map(|&(_, count)| count).collect()
    }

    #[test]
    fn zero_keys_split_around_mergeable_runs() {
        let submitter = RecordingSubmitter::shared();
        let items: Vec<_> = [0, 7, 7, 0, 7]
            .into_iter()
            .map(|key| item(&submitter, key, 1.0))
            .collect();

        let (keys, stats) = run(&items, 100.0);

        assert_eq!(sizes(&keys), vec![1, 2, 1, 1]);
        assert_eq!(stats.draw_calls, 4);
        assert_eq!(stats.merged_draw_calls, 1);
    }

    #[test]
    fn adjacent_zero_keys_never_merge() {
        let submitter = RecordingSubmitter::shared();
        let items: Vec<_> = (0..3).map(|_| item(&submitter, 0, 1.0)).collect();

        let (keys, _) = run(&items, 100.0);

        assert_eq!(sizes(&keys), vec![1, 1, 1]);
    }

    #[test]
    fn lod_boundary_splits_equal_keys() {
        let submitter = RecordingSubmitter::shared();
        let items = vec![
            item(&submitter, 9, 5.0),
            item(&submitter, 9, 15.0),
            item(&submitter, 9, 12.0),
        ];

        let (keys, _) = run(&items, 10.0);

        assert_eq!(keys, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn submitter_sees_the_rendering_key_of_each_batch() {
        let submitter = RecordingSubmitter::shared();
        let items: Vec<_> = (0..3).map(|_| item(&submitter, 2, 1.0)).collect();

        run(&items, 100.0);

        let keys = submitter.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].pass, DrawPass::GBuffer);
        assert_eq!(keys[0].instance_count, 3);
    }

    #[test]
    fn different_submitters_never_merge() {
        let a = RecordingSubmitter::shared();
        let b = RecordingSubmitter::shared();
        let items = vec![item(&a, 4, 1.0), item(&b, 4, 1.0)];

        let (keys, _) = run(&items, 100.0);

        assert_eq!(sizes(&keys), vec![1, 1]);
    }

    #[test]
    fn long_runs_are_split_at_capacity() {
        let submitter = RecordingSubmitter::shared();
        let items: Vec<_> = (0..MAX_INSTANCES * 2 + 5)
            .map(|_| item(&submitter, 3, 1.0))
            .collect();

        let (keys, stats) = run(&items, 100.0);

        assert_eq!(
            sizes(&keys),
            vec![MAX_INSTANCES as u32, MAX_INSTANCES as u32, 5]
        );
        assert_eq!(stats.instances as usize, items.len());
    }

    #[test]
    fn empty_range_records_nothing() {
        let (keys, stats) = run(&[], 10.0);

        assert!(keys.is_empty());
        assert_eq!(stats, BatchStats::default());
    }

    #[test]
    fn lod_saturates_at_the_last_bucket() {
        let policy = LodPolicy::new(10.0);

        assert_eq!(policy.resolve(0.0), 0);
        assert_eq!(policy.resolve(9.99), 0);
        assert_eq!(policy.resolve(10.0), 1);
        assert_eq!(policy.resolve(25.0), 2);
        assert_eq!(policy.resolve(10_000.0), MAX_LOD_COUNT - 1);
        assert_eq!(policy.resolve(-4.0), 0);
    }

    #[test]
    fn stock_submitter_uploads_one_transform_per_instance() {
        let submitter = Arc::new(InstancedMeshSubmitter::default());
        let items: Vec<_> = (0..3)
            .map(|_| item_with(&submitter, 11, 1.0, Handle::new(2)))
            .collect();

        let mut cmdb = fragment();
        let mut batcher = DrawBatcher::new(LodPolicy::new(100.0));
        let mut ctx = DrawContext::new(FrameView::default(), DrawPass::Forward, &mut cmdb);
        batcher.draw_range(&mut ctx, &items).expect("batching succeeds");

        match cmdb.commands() {
            [Command::UploadUniforms { data, .. }, Command::DrawInstanced {
                mesh,
                instance_count,
                ..
            }] => {
                assert_eq!(data.len(), 3 * 16 * std::mem::size_of::<f32>());
                assert_eq!(*mesh, Handle::new(2));
                assert_eq!(*instance_count, 3);
            }
            other => panic!("unexpected commands: {other:?}"),
        }
    }
}
