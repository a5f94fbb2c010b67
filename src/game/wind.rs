//! Wind model: a horizontal wind vector easing towards a target

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::Vec3;

/// Real-world speed of the wind at full normalised strength (m/s)
pub const MAX_WIND_SPEED: f32 = 12.0;

/// Knots per metre/second
pub const KNOTS_PER_METRE: f32 = 1.94384;

const SNAP_DISTANCE: f32 = 1.0e-4;

/// Display form of the wind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindState {
    /// Unit direction on the XZ plane
    pub direction: [f32; 2],
    /// Normalised strength in 0..=1
    pub strength: f32,
}

impl WindState {
    pub fn speed_mps(&self) -> f32 {
        self.strength * MAX_WIND_SPEED
    }

    pub fn speed_knots(&self) -> f32 {
        self.speed_mps() * KNOTS_PER_METRE
    }
}

/// Wind for one round. Each round owns its own instance.
#[derive(Debug, Clone)]
pub struct WindModel {
    /// Horizontal wind; length is the normalised strength
    current: Vec3,
    target: Vec3,
    blend_rate: f32,
    rng: ChaCha8Rng,
}

impl WindModel {
    /// Start calm, easing towards a random first target
    pub fn new(seed: u64, blend_rate: f32) -> Self {
        let mut model = Self::calm(blend_rate);
        model.rng = ChaCha8Rng::seed_from_u64(seed);
        model.target = model.random_target();
        model
    }

    /// No wind and no target; used by replicas until the host says otherwise
    pub fn calm(blend_rate: f32) -> Self {
        Self {
            current: Vec3::zeros(),
            target: Vec3::zeros(),
            blend_rate: blend_rate.max(0.0),
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    fn random_target(&mut self) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let strength = self.rng.gen_range(1..=10) as f32 / 10.0;
        Vec3::new(angle.cos(), 0.0, angle.sin()) * strength
    }

    /// Ease the current wind towards the target. The blend factor is clamped
    /// to 1 so the wind never passes its target.
    pub fn advance(&mut self, dt: f32) {
        let alpha = (self.blend_rate * dt).clamp(0.0, 1.0);
        let delta = self.target - self.current;
        if delta.norm() <= SNAP_DISTANCE {
            self.current = self.target;
        } else {
            self.current += delta * alpha;
        }
    }

    /// Pick a new random target immediately. Returns it in packed form.
    pub fn force_change(&mut self) -> Vec3 {
        self.target = self.random_target();
        Self::pack(&self.target)
    }

    /// Set the target from its packed form (as received over the wire)
    pub fn set_target(&mut self, packed: &Vec3) {
        self.target = Self::unpack(packed);
    }

    /// Overwrite the current wind from its packed form
    pub fn set_current(&mut self, packed: &Vec3) {
        self.current = Self::unpack(packed);
    }

    /// Current wind packed as (dir.x, strength, dir.z)
    pub fn vector(&self) -> Vec3 {
        Self::pack(&self.current)
    }

    /// Target wind packed as (dir.x, strength, dir.z)
    pub fn target_vector(&self) -> Vec3 {
        Self::pack(&self.target)
    }

    /// Current horizontal wind (direction scaled by strength)
    pub fn horizontal(&self) -> Vec3 {
        self.current
    }

    pub fn state(&self) -> WindState {
        let packed = self.vector();
        WindState {
            direction: [packed.x, packed.z],
            strength: packed.y,
        }
    }

    pub fn pack(horizontal: &Vec3) -> Vec3 {
        let strength = horizontal.norm();
        if strength <= f32::EPSILON {
            return Vec3::zeros();
        }
        Vec3::new(horizontal.x / strength, strength, horizontal.z / strength)
    }

    pub fn unpack(packed: &Vec3) -> Vec3 {
        Vec3::new(packed.x, 0.0, packed.z) * packed.y
    }
}
