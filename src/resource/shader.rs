//! Typed shader cache keys.
//!
//! A key is a program source plus a fixed, enumerated set of preprocessor
//! substitutions. Keys hash and compare structurally, so two stages asking for
//! the same permutation share one cached program.

use std::collections::BTreeMap;
use std::fmt;

/// Prefix applied to the cache name of every renderer-owned program.
pub const CACHE_PREFIX: &str = "r_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderDefine {
    RendererWidth,
    RendererHeight,
    InputWidth,
    InputHeight,
    LodCount,
    Tessellation,
    KernelSize,
    MipmapCount,
    ShadowMapSize,
    Horizontal,
}

impl ShaderDefine {
    pub const fn macro_name(self) -> &'static str {
        match self {
            Self::RendererWidth => "RENDERER_WIDTH",
            Self::RendererHeight => "RENDERER_HEIGHT",
            Self::InputWidth => "INPUT_WIDTH",
            Self::InputHeight => "INPUT_HEIGHT",
            Self::LodCount => "LOD_COUNT",
            Self::Tessellation => "TESSELLATION",
            Self::KernelSize => "KERNEL_SIZE",
            Self::MipmapCount => "MIPMAP_COUNT",
            Self::ShadowMapSize => "SHADOW_MAP_SIZE",
            Self::Horizontal => "HORIZONTAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    source: &'static str,
    defines: BTreeMap<ShaderDefine, u32>,
}

impl ShaderKey {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            defines: BTreeMap::new(),
        }
    }

    /// Sets a substitution. Setting the same define twice keeps the last value.
    pub fn define(mut self, define: ShaderDefine, value: u32) -> Self {
        self.defines.insert(define, value);
        self
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn get(&self, define: ShaderDefine) -> Option<u32> {
        self.defines.get(&define).copied()
    }

    /// `#define` lines in a stable order.
    pub fn preprocessor_block(&self) -> String {
        self.defines
            .iter()
            .map(|(define, value)| format!("#define {} {}\n", define.macro_name(), value))
            .collect()
    }

    /// Name under which the compiled program is cached.
    pub fn cache_name(&self) -> String {
        let mut name = format!("{CACHE_PREFIX}{}", self.source.replace(['/', '.'], "_"));
        for (define, value) in &self.defines {
            name.push('_');
            name.push_str(&define.macro_name().to_ascii_lowercase());
            name.push_str(&value.to_string());
        }
        name
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if !self.defines.is_empty() {
            let defines: Vec<_> = self
                .defines
                .iter()
                .map(|(define, value)| format!("{}={}", define.macro_name(), value))
                .collect();
            write!(f, " [{}]", defines.join(", "))?;
        }
        Ok(())
    }
}
