use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// Smallest accepted render width or height.
pub const MIN_RESOLUTION: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub resolution: Resolution,
    /// Distance covered by one level of detail.
    #[serde(default = "RendererConfig::default_lod_distance")]
    pub lod_distance: f32,
    #[serde(default = "RendererConfig::default_tessellation_factor")]
    pub tessellation_factor: u32,
    #[serde(default = "RendererConfig::default_shadow_map_size")]
    pub shadow_map_size: u32,
    /// Command-buffer build workers. `None` uses the available parallelism.
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default)]
    pub debug_overlay: bool,
    #[serde(default = "RendererConfig::default_validate_barriers")]
    pub validate_barriers: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            lod_distance: Self::default_lod_distance(),
            tessellation_factor: Self::default_tessellation_factor(),
            shadow_map_size: Self::default_shadow_map_size(),
            worker_count: None,
            debug_overlay: false,
            validate_barriers: Self::default_validate_barriers(),
        }
    }
}

impl RendererConfig {
    /// Reads a JSON config file. A missing file yields the defaults; a file
    /// that exists but cannot be read or parsed is a configuration error.
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str::<RendererConfig>(&contents).map_err(|err| {
                    RenderError::Configuration(format!("failed to parse {path:?}: {err}"))
                })?;
                info!("Loaded renderer config from {:?}", path);
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("Renderer config {:?} not found. Using defaults.", path);
                Ok(Self::default())
            }
            Err(err) => Err(RenderError::Configuration(format!(
                "failed to read {path:?}: {err}"
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.width < MIN_RESOLUTION || self.resolution.height < MIN_RESOLUTION {
            return Err(RenderError::Configuration(format!(
                "resolution {}x{} is below the minimum of {MIN_RESOLUTION}x{MIN_RESOLUTION}",
                self.resolution.width, self.resolution.height
            )));
        }

        if !self.lod_distance.is_finite() || self.lod_distance <= 0.0 {
            return Err(RenderError::Configuration(format!(
                "lod distance must be positive, got {}",
                self.lod_distance
            )));
        }

        if self.tessellation_factor == 0 {
            return Err(RenderError::Configuration(
                "tessellation factor must be at least 1".into(),
            ));
        }

        if self.shadow_map_size == 0 {
            return Err(RenderError::Configuration(
                "shadow map size must be greater than zero".into(),
            ));
        }

        if self.worker_count == Some(0) {
            return Err(RenderError::Configuration(
                "worker count must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Worker count after resolving `None` against the host.
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or_else(|err| {
                    warn!("Could not query available parallelism ({err}). Using 1 worker.");
                    1
                })
        })
    }

    const fn default_lod_distance() -> f32 {
        20.0
    }

    const fn default_tessellation_factor() -> u32 {
        1
    }

    const fn default_shadow_map_size() -> u32 {
        2048
    }

    const fn default_validate_barriers() -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn half(self) -> Self {
        Self::new((self.width / 2).max(1), (self.height / 2).max(1))
    }

    pub fn quarter(self) -> Self {
        self.half().half()
    }
}
