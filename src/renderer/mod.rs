pub mod barrier;
pub mod batch;
pub mod frame;
pub mod jitter;
pub mod partition;
pub mod renderer;
pub mod scheduler;
pub mod stage;
pub mod stages;
pub mod targets;

pub use barrier::{Barrier, BarrierViolation, ResourceUsage, UsageTracker};
pub use batch::{
    BatchStats, DrawBatcher, DrawContext, DrawPass, DrawSubmitter, InstancedMeshSubmitter,
    LodPolicy, RenderDescriptor, RenderingKey, MAX_INSTANCES,
};
pub use frame::{FrameContext, FrameHistory, FrameStats, FrameUniforms, FrameView};
pub use jitter::JitterPattern;
pub use partition::{last_worker_with_work, partition, will_do_work, WorkRange, WorkerId};
pub use renderer::Renderer;
pub use scheduler::{CommandBufferScheduler, PassTargets, TrailingDraws, TrailingSet};
pub use stage::{PassIo, RenderFlags, SharedResources, Stage, StageId, StageInit};
pub use targets::{BufferName, RenderTargets, TargetName};
