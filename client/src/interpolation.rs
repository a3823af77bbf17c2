//! Exponential smoothing of remote cars toward their latest known state
//!
//! Every frame the presented position and rotation of each remote entry move
//! a fraction `k` of the way to the target. The approach is asymptotic: the
//! presented value gets arbitrarily close but is never assigned the target.
//! Discrete fields are never smoothed. Euler angles are blended per component
//! along the shorter arc and kept within `[0, 360)`.

use crate::mirror::MirrorEntry;
use shared::Vec3;

/// Fraction covered per 60 Hz frame
pub const DEFAULT_FACTOR: f32 = 1.0 / 25.0;

const REFERENCE_FRAME: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    /// Fixed fraction per tick, independent of frame time
    PerTick { k: f32 },
    /// `k = 1 - exp(-dt / tau)`, independent of frame rate
    TimeScaled { tau: f32 },
}

impl Smoothing {
    /// Time-scaled smoothing that matches [`DEFAULT_FACTOR`] at 60 Hz
    pub fn time_scaled() -> Self {
        Smoothing::TimeScaled {
            tau: -REFERENCE_FRAME / (1.0 - DEFAULT_FACTOR).ln(),
        }
    }

    /// Blend factor for a frame lasting `dt` seconds, within `[0, 1]`
    pub fn factor(&self, dt: f32) -> f32 {
        let k = match *self {
            Smoothing::PerTick { k } => k,
            Smoothing::TimeScaled { tau } if tau <= 0.0 => 1.0,
            Smoothing::TimeScaled { tau } => 1.0 - (-dt.max(0.0) / tau).exp(),
        };
        k.clamp(0.0, 1.0)
    }

    pub fn step(&self, entry: &mut MirrorEntry, dt: f32) {
        let k = self.factor(dt);
        entry.presented_position = approach(entry.presented_position, entry.target.position, k);
        entry.presented_rotation = approach_angles(entry.presented_rotation, entry.target.rotation, k);
    }
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::PerTick { k: DEFAULT_FACTOR }
    }
}

pub fn approach(presented: Vec3, target: Vec3, k: f32) -> Vec3 {
    presented + (target - presented) * k
}

/// Like [`approach`] for Euler angles in degrees, turning through 0/360
/// whenever that is the shorter way
pub fn approach_angles(presented: Vec3, target: Vec3, k: f32) -> Vec3 {
    let turn = |from: f32, to: f32| (from + angle_delta(from, to) * k).rem_euclid(360.0);
    Vec3::new(
        turn(presented.x, target.x),
        turn(presented.y, target.y),
        turn(presented.z, target.z),
    )
}

/// Signed shortest turn from `from` to `to`, within `(-180, 180]`
pub fn angle_delta(from: f32, to: f32) -> f32 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}
