use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::shader::ShaderKey;
use super::ProgramHandle;
use crate::error::{RenderError, Result};

/// The resource collaborator. Compiles and owns shader programs and reports
/// streaming progress so the renderer can tell when cached state went stale.
pub trait ResourceProvider: Send + Sync {
    /// Fails with [`RenderError::ResourceLoad`](crate::error::RenderError::ResourceLoad)
    /// when the program cannot be produced.
    fn load_program(&self, key: &ShaderKey) -> Result<ProgramHandle>;

    /// Total load requests ever issued.
    fn loading_request_count(&self) -> u64 {
        0
    }

    /// Total background loading tasks that have finished.
    fn async_tasks_completed(&self) -> u64 {
        0
    }
}

/// Snapshot of the provider's progress counters between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub requests: u64,
    pub completed: u64,
}

impl LoadProgress {
    pub fn sample(provider: &dyn ResourceProvider) -> Self {
        Self {
            requests: provider.loading_request_count(),
            completed: provider.async_tasks_completed(),
        }
    }
}

/// Provider that hands out sequential program handles without compiling
/// anything. Used by the headless binary and by tests.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    programs: Mutex<HashMap<String, ProgramHandle>>,
    failing: Vec<&'static str>,
    loads: AtomicU64,
    completed: AtomicU64,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load of `source` fails with a load error.
    pub fn failing_on(source: &'static str) -> Self {
        Self {
            failing: vec![source],
            ..Self::default()
        }
    }

    /// Loads that reached the provider, cached or not.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Marks one more background task as finished.
    pub fn complete_task(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl ResourceProvider for InMemoryResources {
    fn load_program(&self, key: &ShaderKey) -> Result<ProgramHandle> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(&key.source()) {
            return Err(RenderError::resource_load(key.source(), "program failed to compile"));
        }

        let mut programs = self.programs.lock();
        let next = programs.len();
        Ok(*programs
            .entry(key.cache_name())
            .or_insert_with(|| ProgramHandle::new(next)))
    }

    fn loading_request_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    fn async_tasks_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
