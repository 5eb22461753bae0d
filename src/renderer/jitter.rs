// renderer/jitter.rs
//
// Sub-pixel projection offsets for temporal anti-aliasing.

use glam::{Mat4, Vec2, Vec3};

use crate::settings::Resolution;

/// 16-sample pattern, in 1/8 pixel units.
const SAMPLE_LOCS_16: [[f32; 2]; 16] = [
    [-8.0, 0.0],
    [-6.0, -4.0],
    [-3.0, -2.0],
    [-2.0, -6.0],
    [1.0, -1.0],
    [2.0, -5.0],
    [6.0, -7.0],
    [5.0, -3.0],
    [4.0, 1.0],
    [7.0, 4.0],
    [3.0, 5.0],
    [0.0, 7.0],
    [-1.0, 3.0],
    [-4.0, 6.0],
    [-7.0, 8.0],
    [-5.0, 2.0],
];

/// 8-sample pattern, in 1/8 pixel units.
const SAMPLE_LOCS_8: [[f32; 2]; 8] = [
    [-7.0, 1.0],
    [-5.0, -5.0],
    [-1.0, -3.0],
    [3.0, -7.0],
    [5.0, -1.0],
    [7.0, 7.0],
    [1.0, 3.0],
    [-3.0, 5.0],
];

#[derive(Debug, Clone)]
pub struct JitterPattern {
    mats8: [Mat4; 8],
    mats16: [Mat4; 16],
}

impl JitterPattern {
    pub fn new(resolution: Resolution) -> Self {
        // Two NDC units span the whole target.
        let texel = Vec2::new(
            2.0 / resolution.width as f32,
            2.0 / resolution.height as f32,
        );

        Self {
            mats8: SAMPLE_LOCS_8.map(|loc| jitter_matrix(loc, texel)),
            mats16: SAMPLE_LOCS_16.map(|loc| jitter_matrix(loc, texel)),
        }
    }

    /// The 8-sample matrix for `frame`, cycling every eight frames.
    pub fn for_frame(&self, frame: u64) -> Mat4 {
        self.mats8[(frame & 7) as usize]
    }

    pub fn eight(&self) -> &[Mat4; 8] {
        &self.mats8
    }

    pub fn sixteen(&self) -> &[Mat4; 16] {
        &self.mats16
    }
}

fn jitter_matrix(loc: [f32; 2], texel: Vec2) -> Mat4 {
    // Offsets stay within half a texel.
    let sub_sample = Vec2::from(loc) / 8.0 * texel * 0.5;
    Mat4::from_translation(Vec3::new(sub_sample.x, sub_sample.y, 0.0))
}
