//! Round simulation modules

pub mod ball;
pub mod client;
pub mod events;
pub mod hole;
pub mod physics;
pub mod round;
pub mod scoring;
pub mod snapshot;
pub mod terrain;
pub mod turn;
pub mod wind;

pub use ball::{Authority, Ball, BallSimulator, BallState, BallSync, ShotCommand, ShotRejected};
pub use client::{ClientSession, SessionError, Swing};
pub use events::{BallEvent, BallEventKind, EventQueue};
pub use hole::{load_course, load_hole, Course, HoleData, HoleLoadError};
pub use physics::{ClubId, ClubStats, PhysicsConfig, PhysicsConfigError, SurfaceResponse};
pub use round::{GameRound, RoundCommand, RoundConfig, RoundError, RoundHandle, RoundPhase, RoundRegistry};
pub use scoring::{HoleResult, ScoringKind, ScoringPolicy};
pub use snapshot::{SnapshotBuilder, SnapshotFilter};
pub use terrain::{Surface, TerrainBuilder, TerrainHit, TerrainQuery};
pub use turn::{DirectorOutcome, HolePhase, Standing, Termination, TurnDirector, TurnRecord, MAX_STROKES};
pub use wind::{WindModel, WindState};

/// World-space vector (metres, Y up)
pub type Vec3 = nalgebra::Vector3<f32>;

/// Two-component vector; XZ plane for terrain, (side, top) for spin
pub type Vec2 = nalgebra::Vector2<f32>;

/// Standard gravity (m/s²)
pub const GRAVITY: f32 = 9.8;

/// Radius of a golf ball (metres)
pub const BALL_RADIUS: f32 = 0.0214;

/// Horizontal part of a vector
pub fn horizontal(v: &Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}
