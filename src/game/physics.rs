//! Ball physics tuning and club characteristics

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::terrain::Surface;
use super::BALL_RADIUS;

/// Clubs available to a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClubId {
    Driver,
    ThreeWood,
    FiveIron,
    NineIron,
    PitchingWedge,
    SandWedge,
    Putter,
}

impl Default for ClubId {
    fn default() -> Self {
        Self::Driver
    }
}

/// Launch characteristics per club
#[derive(Debug, Clone, Copy)]
pub struct ClubStats {
    /// Ball speed at full power (m/s)
    pub max_speed: f32,
    /// Launch angle above the horizontal (radians)
    pub launch_angle: f32,
    /// Multiplier on the shot's spin input
    pub spin_response: f32,
}

impl ClubStats {
    pub fn for_club(club: ClubId) -> Self {
        match club {
            ClubId::Driver => Self {
                max_speed: 55.0,
                launch_angle: 0.22,
                spin_response: 0.6,
            },
            ClubId::ThreeWood => Self {
                max_speed: 48.0,
                launch_angle: 0.26,
                spin_response: 0.7,
            },
            ClubId::FiveIron => Self {
                max_speed: 40.0,
                launch_angle: 0.33,
                spin_response: 0.85,
            },
            ClubId::NineIron => Self {
                max_speed: 31.0,
                launch_angle: 0.48,
                spin_response: 1.0,
            },
            ClubId::PitchingWedge => Self {
                max_speed: 26.0,
                launch_angle: 0.6,
                spin_response: 1.1,
            },
            ClubId::SandWedge => Self {
                max_speed: 20.0,
                launch_angle: 0.75,
                spin_response: 1.2,
            },
            ClubId::Putter => Self {
                max_speed: 8.0,
                launch_angle: 0.0,
                spin_response: 0.0,
            },
        }
    }

    pub fn is_putter(club: ClubId) -> bool {
        club == ClubId::Putter
    }
}

/// How a surface responds to impacts and rolling
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceResponse {
    /// Fraction of speed kept when bouncing off this surface
    pub restitution: f32,
    /// Proportional rolling friction (1/s)
    pub roll_friction: f32,
}

/// Per-surface response coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceTable {
    pub fairway: SurfaceResponse,
    pub rough: SurfaceResponse,
    pub bunker: SurfaceResponse,
    pub water: SurfaceResponse,
    pub green: SurfaceResponse,
    pub scrub: SurfaceResponse,
    pub out_of_bounds: SurfaceResponse,
    pub obstacle: SurfaceResponse,
}

impl SurfaceTable {
    pub fn response(&self, surface: Surface) -> &SurfaceResponse {
        match surface {
            Surface::Fairway => &self.fairway,
            Surface::Rough => &self.rough,
            Surface::Bunker => &self.bunker,
            Surface::Water => &self.water,
            Surface::Green => &self.green,
            Surface::Scrub => &self.scrub,
            Surface::OutOfBounds => &self.out_of_bounds,
            Surface::Obstacle => &self.obstacle,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &SurfaceResponse)> {
        [
            ("fairway", &self.fairway),
            ("rough", &self.rough),
            ("bunker", &self.bunker),
            ("water", &self.water),
            ("green", &self.green),
            ("scrub", &self.scrub),
            ("out_of_bounds", &self.out_of_bounds),
            ("obstacle", &self.obstacle),
        ]
        .into_iter()
    }
}

impl Default for SurfaceTable {
    fn default() -> Self {
        let dead = SurfaceResponse {
            restitution: 0.0,
            roll_friction: 50.0,
        };
        Self {
            fairway: SurfaceResponse {
                restitution: 0.33,
                roll_friction: 1.2,
            },
            rough: SurfaceResponse {
                restitution: 0.23,
                roll_friction: 3.5,
            },
            bunker: SurfaceResponse {
                restitution: 0.05,
                roll_friction: 8.0,
            },
            green: SurfaceResponse {
                restitution: 0.28,
                roll_friction: 0.6,
            },
            obstacle: SurfaceResponse {
                restitution: 0.45,
                roll_friction: 1.0,
            },
            water: dead,
            scrub: dead,
            out_of_bounds: dead,
        }
    }
}

/// Tunable simulation constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: f32,
    pub surfaces: SurfaceTable,
    /// Upward speed after a bounce below which the ball starts rolling (m/s)
    pub flight_resume_speed: f32,
    /// Speed below which a rolling ball counts as still (m/s)
    pub rest_speed: f32,
    /// Consecutive still ticks before the ball is at rest
    pub rest_ticks: u32,
    /// Constant rolling resistance (m/s²)
    pub roll_resistance: f32,
    /// Multiplier on gravity along a slope
    pub slope_factor: f32,
    /// Slope acceleration below which a still ball stays put (m/s²)
    pub static_slope: f32,
    /// Horizontal distance from the pin that counts as holed (m)
    pub hole_capture_radius: f32,
    /// Rolling faster than this over the hole skips across it (m/s)
    pub hole_capture_speed: f32,
    /// Wind pressure on the ball at full wind strength (N/m²)
    pub wind_pressure: f32,
    /// Flight time over which wind exposure ramps up to full (s)
    pub wind_ramp_secs: f32,
    /// Fraction of wind felt by a ball rolling on the ground
    pub ground_wind_factor: f32,
    /// Rate at which the wind eases towards its target (1/s)
    pub wind_blend_rate: f32,
    /// Lateral acceleration at full side spin (m/s²)
    pub spin_curve: f32,
    /// Lift at full backspin (m/s²)
    pub spin_lift: f32,
    /// Speed added along the shot line on landing at full topspin (m/s)
    pub spin_rollout: f32,
    /// Spin decay (1/s)
    pub spin_decay: f32,
    /// Simulated time after which a shot is forced to finish (s)
    pub max_shot_secs: f32,
    /// Fixed ticks advanced per fast-forward batch
    pub fast_forward_batch: u32,
}

/// Mass of a golf ball (kg)
pub const BALL_MASS: f32 = 0.0459;

/// Maximum hook/slice applied by a fully mistimed swing (radians)
pub const MAX_HOOK: f32 = 0.25;

/// Area the ball presents to the wind (m²)
pub fn ball_cross_section() -> f32 {
    PI * BALL_RADIUS * BALL_RADIUS
}

/// Out-of-range physics tuning
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsConfigError {
    #[error("{surface}: restitution must be within 0..=1")]
    Restitution { surface: &'static str },

    #[error("{surface}: roll_friction must be non-negative")]
    RollFriction { surface: &'static str },

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("{0} must be non-negative")]
    Negative(&'static str),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: super::GRAVITY,
            surfaces: SurfaceTable::default(),
            flight_resume_speed: 1.5,
            rest_speed: 0.1,
            rest_ticks: 10,
            roll_resistance: 0.3,
            slope_factor: 1.0,
            static_slope: 0.35,
            hole_capture_radius: 0.1,
            hole_capture_speed: 1.6,
            wind_pressure: 62.5,
            wind_ramp_secs: 1.0,
            ground_wind_factor: 0.06,
            wind_blend_rate: 0.25,
            spin_curve: 6.0,
            spin_lift: 2.0,
            spin_rollout: 4.0,
            spin_decay: 0.6,
            max_shot_secs: 60.0,
            fast_forward_batch: 8,
        }
    }
}

impl PhysicsConfig {
    /// Check ranges that the integrator relies on
    pub fn validate(&self) -> Result<(), PhysicsConfigError> {
        for (surface, response) in self.surfaces.iter() {
            if !(0.0..=1.0).contains(&response.restitution) {
                return Err(PhysicsConfigError::Restitution { surface });
            }
            if !(response.roll_friction >= 0.0) {
                return Err(PhysicsConfigError::RollFriction { surface });
            }
        }

        let positive = [
            ("gravity", self.gravity),
            ("rest_speed", self.rest_speed),
            ("hole_capture_radius", self.hole_capture_radius),
            ("max_shot_secs", self.max_shot_secs),
            ("wind_ramp_secs", self.wind_ramp_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(PhysicsConfigError::NotPositive(name));
        }
        if !(self.wind_pressure >= 0.0) {
            return Err(PhysicsConfigError::Negative("wind_pressure"));
        }

        if self.rest_ticks == 0 {
            return Err(PhysicsConfigError::ZeroCount("rest_ticks"));
        }
        if self.fast_forward_batch == 0 {
            return Err(PhysicsConfigError::ZeroCount("fast_forward_batch"));
        }

        Ok(())
    }

    /// Horizontal acceleration from a full-strength wind (m/s²)
    pub fn wind_acceleration(&self) -> f32 {
        self.wind_pressure * ball_cross_section() / BALL_MASS
    }

    pub fn response(&self, surface: Surface) -> &SurfaceResponse {
        self.surfaces.response(surface)
    }
}
