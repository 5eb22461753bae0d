//! What the visibility collaborator hands the renderer each frame.
//!
//! Culling and ordering happen upstream. Items arrive in the order they must
//! be drawn and are never re-sorted here.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use crate::renderer::RenderDescriptor;

/// Pass categories whose command buffers are built in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassCategory {
    /// Depth/G-buffer pass.
    Opaque,
    /// Forward pass.
    Transparent,
}

impl PassCategory {
    pub const ALL: [PassCategory; 2] = [PassCategory::Opaque, PassCategory::Transparent];

    pub const fn index(self) -> usize {
        match self {
            Self::Opaque => 0,
            Self::Transparent => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Opaque => "opaque",
            Self::Transparent => "transparent",
        }
    }

    /// Whether trailing draws still need a fragment when no worker had work.
    pub const fn synthesizes_trailing_fragment(self) -> bool {
        matches!(self, Self::Transparent)
    }
}

impl fmt::Display for PassCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scene object that can describe its contribution to a pass.
pub trait Renderable: Send + Sync {
    fn render_descriptor(&self) -> RenderDescriptor;
}

#[derive(Clone)]
pub struct VisibleItem {
    pub renderable: Arc<dyn Renderable>,
    /// Distance from the camera, used for LOD selection.
    pub distance: f32,
}

impl VisibleItem {
    pub fn new(renderable: Arc<dyn Renderable>, distance: f32) -> Self {
        Self {
            renderable,
            distance,
        }
    }
}

impl fmt::Debug for VisibleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibleItem")
            .field("distance", &self.distance)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleLight {
    pub position: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LensFlareInfo {
    pub position: Vec3,
    pub size: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityResults {
    categories: [Vec<VisibleItem>; 2],
    pub shadow_casters: Vec<VisibleItem>,
    pub lights: Vec<VisibleLight>,
    pub lens_flares: Vec<LensFlareInfo>,
    /// Reflection probes that need re-rendering this frame.
    pub reflection_probes: usize,
}

impl VisibilityResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self, category: PassCategory) -> &[VisibleItem] {
        &self.categories[category.index()]
    }

    pub fn count(&self, category: PassCategory) -> usize {
        self.categories[category.index()].len()
    }

    pub fn push(&mut self, category: PassCategory, item: VisibleItem) {
        self.categories[category.index()].push(item);
    }

    pub fn extend(&mut self, category: PassCategory, items: impl IntoIterator<Item = VisibleItem>) {
        self.categories[category.index()].extend(items);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(Vec::is_empty) && self.shadow_casters.is_empty()
    }
}
