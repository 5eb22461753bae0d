// renderer/stages/mod.rs
//
// Concrete stages and the table that builds them in execution order.

pub mod debug;
pub mod geometry;
pub mod indirect;
pub mod lens_flare;
pub mod lighting;
pub mod post;
pub mod temporal;

use std::sync::Arc;

use super::scheduler::{PassTargets, TrailingDraws, TrailingSet};
use super::stage::{Stage, StageId, StageInit};
use crate::error::{RenderError, Result};

pub use debug::DebugStage;
pub use geometry::{FragmentPassStage, VolumetricComposite};
pub use indirect::IndirectStage;
pub use lens_flare::LensFlare;
pub use lighting::LightShadingStage;
pub use post::PostStage;
pub use temporal::TemporalAaStage;

pub type StageConstructor = fn(&mut StageInit<'_>) -> Result<Box<dyn Stage>>;

fn indirect(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(IndirectStage::new(init)?))
}

fn light_shading(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(LightShadingStage::new(init)?))
}

fn temporal_aa(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(TemporalAaStage::new(init)?))
}

fn debug_overlay(init: &mut StageInit<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(DebugStage::new(init)?))
}

/// Every stage in execution order. A constructor may only look up targets
/// published by constructors above it.
pub fn stage_table() -> [(StageId, StageConstructor); 21] {
    [
        (StageId::Indirect, indirect),
        (StageId::ShadowMapping, geometry::shadow_mapping),
        (StageId::GBuffer, geometry::gbuffer),
        (StageId::DepthDownscaleHalf, post::depth_downscale_half),
        (StageId::DepthDownscaleQuarter, post::depth_downscale_quarter),
        (StageId::VolumetricMain, post::volumetric_main),
        (StageId::SsaoMain, post::ssao_main),
        (StageId::VolumetricHBlur, post::volumetric_hblur),
        (StageId::SsaoHBlur, post::ssao_hblur),
        (StageId::VolumetricVBlur, post::volumetric_vblur),
        (StageId::SsaoVBlur, post::ssao_vblur),
        (StageId::LightShading, light_shading),
        (StageId::ForwardShading, geometry::forward_shading),
        (StageId::ForwardUpscale, post::forward_upscale),
        (StageId::TemporalAa, temporal_aa),
        (StageId::DownscaleBlur, post::downscale_blur),
        (StageId::Tonemapping, post::tonemapping),
        (StageId::BloomExtract, post::bloom_extract),
        (StageId::BloomUpscale, post::bloom_upscale),
        (StageId::Debug, debug_overlay),
        (StageId::FinalComposite, post::final_composite),
    ]
}

/// Everything the renderer needs besides the stages themselves.
pub struct Pipeline {
    pub stages: Vec<Box<dyn Stage>>,
    pub opaque: PassTargets,
    pub transparent: PassTargets,
    pub shadow: PassTargets,
    pub trailing: TrailingSet,
    pub lens_flare: LensFlare,
}

pub fn build(init: &mut StageInit<'_>) -> Result<Pipeline> {
    let table = stage_table();
    let mut stages = Vec::with_capacity(table.len());
    for (id, construct) in table {
        let stage = construct(init)?;
        if stage.id() != id {
            return Err(RenderError::Configuration(format!(
                "stage {} was constructed in the slot of {}",
                stage.id(),
                id
            )));
        }
        log::debug!("Initialized stage {}", id);
        stages.push(stage);
    }

    let lens_flare = LensFlare::new(init)?;
    let volumetric: Arc<dyn TrailingDraws> = Arc::new(VolumetricComposite::new(init)?);
    let occlusion: Arc<dyn TrailingDraws> = lens_flare.occlusion.clone();
    let sprites: Arc<dyn TrailingDraws> = lens_flare.sprites.clone();
    let trailing = TrailingSet {
        opaque: vec![occlusion],
        transparent: vec![sprites, volumetric],
    };

    let [opaque, transparent, shadow] = geometry::pass_targets(init)?;

    Ok(Pipeline {
        stages,
        opaque,
        transparent,
        shadow,
        trailing,
        lens_flare,
    })
}
