//! Ball state machine and trajectory integrator
//!
//! A ball is `Idle` until a shot is applied, then integrates through
//! `Flight`, bounces into `Roll` (or starts directly in `Putt` for a putter
//! shot) and comes back to `Idle` once it has been still for long enough.
//! Only the authoritative simulator accepts shots and posts events; a replica
//! runs the same integrator purely to interpolate between snapshots.

use std::sync::Arc;

use nalgebra::Rotation3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{BallEvent, BallEventKind, EventQueue};
use super::hole::HoleData;
use super::physics::{ClubId, ClubStats, PhysicsConfig, MAX_HOOK};
use super::terrain::{Surface, TerrainHit};
use super::wind::WindModel;
use super::{horizontal, Vec2, Vec3};
use crate::util::time::tick_delta;

/// Drops from a hazard stop this far short of the pin (m)
const DROP_PIN_CLEARANCE: f32 = 10.0;

/// Spacing of drop candidates walked from the hazard towards the pin (m)
const DROP_STEP: f32 = 1.0;

/// Whether a simulator instance owns the outcome of a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Accepts shots and posts events
    Host,
    /// Interpolates only; driven by inbound snapshots and events
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallState {
    Idle,
    Flight,
    Putt,
    Roll,
}

impl BallState {
    pub fn is_moving(self) -> bool {
        !matches!(self, BallState::Idle)
    }
}

/// Player input for one stroke
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotCommand {
    pub club: ClubId,
    /// Fraction of the club's full speed, 0..=1
    pub power: f32,
    /// Yaw offset from the suggested heading (radians)
    #[serde(default)]
    pub aim: f32,
    /// (side, top) in -1..=1; negative top is backspin
    #[serde(default)]
    pub spin: [f32; 2],
    /// Swing timing error in -1..=1; bends the heading by up to `MAX_HOOK`
    #[serde(default)]
    pub accuracy: f32,
    /// Client-local sequence number
    pub sequence: u32,
}

impl ShotCommand {
    fn validate(&self) -> Result<(), ShotRejected> {
        if !(0.0..=1.0).contains(&self.power) {
            return Err(ShotRejected::InvalidInput("power must be within 0..=1"));
        }
        if !self.aim.is_finite() {
            return Err(ShotRejected::InvalidInput("aim must be finite"));
        }
        if !(-1.0..=1.0).contains(&self.accuracy) {
            return Err(ShotRejected::InvalidInput("accuracy must be within -1..=1"));
        }
        if self.spin.iter().any(|s| !(-1.0..=1.0).contains(s)) {
            return Err(ShotRejected::InvalidInput("spin must be within -1..=1"));
        }
        Ok(())
    }
}

/// Why a shot was not applied. Callers treat all of these as a silent no-op.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShotRejected {
    #[error("ball is not idle ({0:?})")]
    NotIdle(BallState),

    #[error("sequence {received} is not newer than {last}")]
    StaleSequence { received: u32, last: u32 },

    #[error("simulator is not authoritative")]
    NotAuthoritative,

    #[error("invalid shot: {0}")]
    InvalidInput(&'static str),
}

/// Kinematic state of one player's ball
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub id: Uuid,
    pub position: Vec3,
    pub velocity: Vec3,
    /// (side, top) spin; negative top is backspin
    pub spin: Vec2,
    pub state: BallState,
    /// Surface the ball last touched
    pub surface: Surface,
    /// Simulated time since the shot was struck (s)
    pub flight_time: f32,
    /// Where the current stroke was played from
    pub start_point: Vec3,
    pub start_surface: Surface,
    /// Last committed rest position; equal to `position` while idle
    pub rest_point: Vec3,
    /// Shot basis captured when the shot was applied
    pub initial_forward: Vec3,
    pub initial_side: Vec3,
    /// Sequence number of the last accepted shot
    pub last_sequence: Option<u32>,
    still_ticks: u32,
    landed: bool,
}

impl Ball {
    /// New idle ball resting at `position`
    pub fn new(id: Uuid, position: Vec3, surface: Surface) -> Self {
        Self {
            id,
            position,
            velocity: Vec3::zeros(),
            spin: Vec2::zeros(),
            state: BallState::Idle,
            surface,
            flight_time: 0.0,
            start_point: position,
            start_surface: surface,
            rest_point: position,
            initial_forward: Vec3::z(),
            initial_side: Vec3::z().cross(&Vec3::y()),
            last_sequence: None,
            still_ticks: 0,
            landed: false,
        }
    }

    /// Put the ball at rest at `position`, committing it as the rest point
    pub fn place(&mut self, position: Vec3, surface: Surface) {
        self.position = position;
        self.rest_point = position;
        self.velocity = Vec3::zeros();
        self.spin = Vec2::zeros();
        self.state = BallState::Idle;
        self.surface = surface;
        self.still_ticks = 0;
    }

    pub fn is_idle(&self) -> bool {
        self.state == BallState::Idle
    }

    pub fn sync(&self) -> BallSync {
        BallSync {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            spin: self.spin,
            state: self.state,
            surface: self.surface,
            forward: self.initial_forward,
            side: self.initial_side,
            flight_time: self.flight_time,
        }
    }

    /// Overwrite the kinematic state wholesale from an authoritative copy
    pub fn apply_sync(&mut self, sync: &BallSync) {
        self.position = sync.position;
        self.velocity = sync.velocity;
        self.spin = sync.spin;
        self.state = sync.state;
        self.surface = sync.surface;
        self.initial_forward = sync.forward;
        self.initial_side = sync.side;
        self.flight_time = sync.flight_time;
        self.still_ticks = 0;
        self.landed = sync.state != BallState::Flight;
        if sync.state == BallState::Idle {
            self.velocity = Vec3::zeros();
            self.rest_point = sync.position;
        }
    }
}

/// Authoritative ball state as carried by snapshots and turn events
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallSync {
    pub id: Uuid,
    pub position: Vec3,
    pub velocity: Vec3,
    pub spin: Vec2,
    pub state: BallState,
    pub surface: Surface,
    pub forward: Vec3,
    pub side: Vec3,
    pub flight_time: f32,
}

/// Integrates balls against a hole's terrain and the round's wind
#[derive(Debug, Clone)]
pub struct BallSimulator {
    authority: Authority,
    config: Arc<PhysicsConfig>,
    fixed_dt: f32,
    /// Distance from the pin inside which a ball at rest on the green is
    /// conceded; zero disables gimmes
    gimme_radius: f32,
}

impl BallSimulator {
    pub fn new(authority: Authority, config: Arc<PhysicsConfig>) -> Self {
        Self {
            authority,
            config,
            fixed_dt: tick_delta(),
            gimme_radius: 0.0,
        }
    }

    pub fn host(config: Arc<PhysicsConfig>) -> Self {
        Self::new(Authority::Host, config)
    }

    pub fn replica(config: Arc<PhysicsConfig>) -> Self {
        Self::new(Authority::Replica, config)
    }

    pub fn is_authoritative(&self) -> bool {
        self.authority == Authority::Host
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn gimme_radius(&self) -> f32 {
        self.gimme_radius
    }

    pub fn set_gimme_radius(&mut self, radius: f32) {
        self.gimme_radius = radius.max(0.0);
    }

    /// Fixed tick length used by `fast_forward`
    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    /// Strike an idle ball. On error the ball is left untouched.
    pub fn apply_shot(
        &self,
        ball: &mut Ball,
        cmd: &ShotCommand,
        hole: &HoleData,
    ) -> Result<(), ShotRejected> {
        if !self.is_authoritative() {
            return Err(ShotRejected::NotAuthoritative);
        }
        if ball.state != BallState::Idle {
            return Err(ShotRejected::NotIdle(ball.state));
        }
        if let Some(last) = ball.last_sequence {
            if cmd.sequence <= last {
                return Err(ShotRejected::StaleSequence {
                    received: cmd.sequence,
                    last,
                });
            }
        }
        cmd.validate()?;

        let is_putt = ClubStats::is_putter(cmd.club);
        let heading = self.shot_heading(ball, hole, is_putt);
        let yaw = cmd.aim + cmd.accuracy * MAX_HOOK;
        let forward = Rotation3::from_axis_angle(&Vec3::y_axis(), yaw) * heading;
        let side = forward.cross(&Vec3::y());

        let stats = ClubStats::for_club(cmd.club);
        let speed = stats.max_speed * cmd.power;

        if is_putt {
            ball.velocity = forward * speed;
            ball.spin = Vec2::zeros();
            ball.state = BallState::Putt;
        } else {
            let (sin, cos) = stats.launch_angle.sin_cos();
            ball.velocity = (forward * cos + Vec3::y() * sin) * speed;
            ball.spin = Vec2::new(cmd.spin[0], cmd.spin[1]) * stats.spin_response;
            ball.state = BallState::Flight;
        }

        ball.start_point = ball.position;
        ball.start_surface = ball.surface;
        ball.initial_forward = forward;
        ball.initial_side = side;
        ball.flight_time = 0.0;
        ball.still_ticks = 0;
        ball.landed = is_putt;
        ball.last_sequence = Some(cmd.sequence);

        tracing::debug!(
            ball_id = %ball.id,
            club = ?cmd.club,
            power = cmd.power,
            sequence = cmd.sequence,
            "Shot applied"
        );

        Ok(())
    }

    /// Towards the nominal target, or straight at the pin once the ball is
    /// on the green, past the target, or being putted
    fn shot_heading(&self, ball: &Ball, hole: &HoleData, is_putt: bool) -> Vec3 {
        let to_pin = horizontal(&(hole.pin - ball.position));
        let target_to_pin = horizontal(&(hole.pin - hole.target));
        let past_target = to_pin.norm() <= target_to_pin.norm();

        let aim_at = if is_putt || ball.surface == Surface::Green || past_target {
            hole.pin
        } else {
            hole.target
        };

        horizontal(&(aim_at - ball.position))
            .try_normalize(1.0e-6)
            .or_else(|| to_pin.try_normalize(1.0e-6))
            .unwrap_or_else(Vec3::z)
    }

    /// Advance one ball by one tick
    pub fn step(
        &self,
        ball: &mut Ball,
        dt: f32,
        hole: &HoleData,
        wind: &WindModel,
        events: &mut EventQueue,
    ) {
        if !ball.state.is_moving() {
            return;
        }

        ball.flight_time += dt;
        if ball.flight_time >= self.config.max_shot_secs {
            tracing::warn!(ball_id = %ball.id, state = ?ball.state, "Shot exceeded time limit");
            if ball.state == BallState::Flight {
                self.return_to_start(ball, events);
            } else {
                self.finish(ball, hole, events);
            }
            return;
        }

        match ball.state {
            BallState::Flight => self.step_flight(ball, dt, hole, wind, events),
            BallState::Roll | BallState::Putt => self.step_ground(ball, dt, hole, wind, events),
            BallState::Idle => {}
        }
    }

    /// Run the remaining shot to rest in batches of fixed ticks. Each sub-tick
    /// advances the wind and steps exactly as the tick loop does, so the
    /// outcome is identical to stepping normally. Returns the ticks run.
    pub fn fast_forward(
        &self,
        ball: &mut Ball,
        hole: &HoleData,
        wind: &mut WindModel,
        events: &mut EventQueue,
    ) -> u32 {
        let dt = self.fixed_dt;
        let batch = self.config.fast_forward_batch.max(1);
        let limit = (self.config.max_shot_secs / dt).ceil() as u32 + batch;

        let mut ticks = 0;
        while ball.state.is_moving() && ticks < limit {
            for _ in 0..batch {
                if !ball.state.is_moving() {
                    break;
                }
                wind.advance(dt);
                self.step(ball, dt, hole, wind, events);
                ticks += 1;
            }
        }
        ticks
    }

    fn step_flight(
        &self,
        ball: &mut Ball,
        dt: f32,
        hole: &HoleData,
        wind: &WindModel,
        events: &mut EventQueue,
    ) {
        let cfg = &*self.config;

        let exposure = (ball.flight_time / cfg.wind_ramp_secs).min(1.0);
        let mut accel = Vec3::new(0.0, -cfg.gravity, 0.0);
        accel += wind.horizontal() * (cfg.wind_acceleration() * exposure);
        accel += ball.initial_side * (ball.spin.x * cfg.spin_curve);
        accel.y -= ball.spin.y * cfg.spin_lift;

        ball.velocity += accel * dt;
        ball.spin *= (1.0 - cfg.spin_decay * dt).max(0.0);

        let next = ball.position + ball.velocity * dt;
        let Some(hit) = hole.terrain.intersect(&next) else {
            tracing::debug!(ball_id = %ball.id, "Ball left the collision bounds");
            self.return_to_start(ball, events);
            return;
        };

        if hit.penetration(&next) < 0.0 {
            ball.position = next;
            return;
        }

        ball.position = Vec3::new(next.x, hit.height, next.z);
        ball.surface = hit.surface;
        if !ball.landed {
            ball.landed = true;
            self.post(events, ball, BallEventKind::Landed);
        }

        if hit.surface.is_out_of_bounds() {
            self.return_to_start(ball, events);
            return;
        }
        if hit.surface.is_hazard() {
            self.drop_from_hazard(ball, hole, events);
            return;
        }

        ball.velocity = self.bounce_response(&ball.velocity, &hit);

        let normal_speed = ball.velocity.dot(&hit.normal);
        if normal_speed < cfg.flight_resume_speed {
            ball.velocity -= hit.normal * normal_speed;
            ball.velocity += ball.initial_forward * (ball.spin.y * cfg.spin_rollout);
            ball.spin = Vec2::zeros();
            ball.state = BallState::Roll;
            ball.still_ticks = 0;
        }
    }

    /// Velocity leaving an impact: reflected about the contact normal and
    /// scaled by the surface's restitution
    pub fn bounce_response(&self, velocity: &Vec3, hit: &TerrainHit) -> Vec3 {
        let restitution = self.config.response(hit.surface).restitution;
        let into = velocity.dot(&hit.normal);
        let reflected = if into < 0.0 {
            velocity - hit.normal * (2.0 * into)
        } else {
            *velocity
        };
        reflected * restitution
    }

    fn step_ground(
        &self,
        ball: &mut Ball,
        dt: f32,
        hole: &HoleData,
        wind: &WindModel,
        events: &mut EventQueue,
    ) {
        let cfg = &*self.config;

        let Some(ground) = hole.terrain.intersect(&ball.position) else {
            self.return_to_start(ball, events);
            return;
        };

        let gravity = Vec3::new(0.0, -cfg.gravity, 0.0);
        let slope = (gravity - ground.normal * gravity.dot(&ground.normal)) * cfg.slope_factor;
        let mut accel = Vec3::zeros();
        if slope.norm() > cfg.static_slope || ball.velocity.norm() > cfg.rest_speed {
            accel += slope;
        }
        if ball.state == BallState::Putt {
            accel += wind.horizontal() * (cfg.wind_acceleration() * cfg.ground_wind_factor);
        }
        ball.velocity += accel * dt;

        let friction = cfg.response(ground.surface).roll_friction;
        ball.velocity *= (1.0 - friction * dt).max(0.0);
        let speed = ball.velocity.norm();
        let resistance = cfg.roll_resistance * dt;
        if speed <= resistance {
            ball.velocity = Vec3::zeros();
        } else {
            ball.velocity *= (speed - resistance) / speed;
        }

        let next = ball.position + ball.velocity * dt;
        let Some(hit) = hole.terrain.intersect(&next) else {
            tracing::debug!(ball_id = %ball.id, "Ball rolled off the collision bounds");
            self.return_to_start(ball, events);
            return;
        };

        ball.position = Vec3::new(next.x, hit.height, next.z);
        ball.velocity -= hit.normal * ball.velocity.dot(&hit.normal);
        ball.surface = hit.surface;

        if hit.surface.is_out_of_bounds() {
            self.return_to_start(ball, events);
            return;
        }
        if hit.surface.is_hazard() {
            self.drop_from_hazard(ball, hole, events);
            return;
        }

        let to_pin = horizontal(&(hole.pin - ball.position)).norm();
        if to_pin <= cfg.hole_capture_radius && ball.velocity.norm() <= cfg.hole_capture_speed {
            self.finish(ball, hole, events);
            return;
        }

        if ball.velocity.norm() < cfg.rest_speed {
            ball.still_ticks += 1;
            if ball.still_ticks >= cfg.rest_ticks {
                self.finish(ball, hole, events);
            }
        } else {
            ball.still_ticks = 0;
        }
    }

    /// Bring the ball to rest and post the outcome of the stroke
    fn finish(&self, ball: &mut Ball, hole: &HoleData, events: &mut EventQueue) {
        let to_pin = horizontal(&(hole.pin - ball.position)).norm();
        if to_pin <= self.config.hole_capture_radius {
            ball.place(hole.pin, Surface::Green);
            self.post(events, ball, BallEventKind::Holed);
        } else if ball.surface == Surface::Green && to_pin <= self.gimme_radius {
            ball.place(hole.pin, Surface::Green);
            self.post(events, ball, BallEventKind::Gimme);
        } else {
            let (position, surface) = (ball.position, ball.surface);
            ball.place(position, surface);
            self.post(events, ball, BallEventKind::TurnEnded);
        }
    }

    fn return_to_start(&self, ball: &mut Ball, events: &mut EventQueue) {
        let (position, surface) = (ball.start_point, ball.start_surface);
        self.penalty_drop(ball, position, surface, events);
    }

    fn drop_from_hazard(&self, ball: &mut Ball, hole: &HoleData, events: &mut EventQueue) {
        let (position, surface) = self.hazard_drop_point(&ball.position, hole);
        self.penalty_drop(ball, position, surface, events);
    }

    fn penalty_drop(&self, ball: &mut Ball, position: Vec3, surface: Surface, events: &mut EventQueue) {
        ball.place(position, surface);
        self.post(events, ball, BallEventKind::Foul);
        self.post(events, ball, BallEventKind::TurnEnded);
    }

    /// First playable ground walking from `from` towards the pin, stopping
    /// short of it. Falls back to the tee.
    pub fn hazard_drop_point(&self, from: &Vec3, hole: &HoleData) -> (Vec3, Surface) {
        let offset = horizontal(&(hole.pin - from));
        let reach = offset.norm() - DROP_PIN_CLEARANCE;

        if let Some(dir) = offset.try_normalize(1.0e-6) {
            let probe_height = from.y.max(hole.pin.y);
            let mut distance = DROP_STEP;
            while distance <= reach {
                let mut probe = from + dir * distance;
                probe.y = probe_height;
                if let Some(hit) = hole.terrain.intersect(&probe) {
                    if hit.surface.is_playable() && hit.surface != Surface::Obstacle {
                        return (Vec3::new(probe.x, hit.height, probe.z), hit.surface);
                    }
                }
                distance += DROP_STEP;
            }
        }

        (hole.tee, hole.tee_surface())
    }

    fn post(&self, events: &mut EventQueue, ball: &Ball, kind: BallEventKind) {
        if !self.is_authoritative() {
            return;
        }
        events.post(BallEvent {
            ball_id: ball.id,
            kind,
            position: ball.position,
            surface: ball.surface,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::hole::HoleData;
    use crate::game::terrain::TerrainBuilder;

    fn config() -> Arc<PhysicsConfig> {
        Arc::new(PhysicsConfig::default())
    }

    /// 200 m wide fairway running 400 m up +Z with a green around the pin
    fn long_hole() -> HoleData {
        let mut builder = TerrainBuilder::new();
        builder
            .add_quad(Vec2::new(-100.0, -20.0), Vec2::new(100.0, 380.0), 0.0, Surface::Fairway)
            .add_quad(Vec2::new(-10.0, 290.0), Vec2::new(10.0, 310.0), 0.01, Surface::Green);
        HoleData::in_memory(
            4,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 300.0),
            Vec3::new(0.0, 0.0, 200.0),
            builder.build().unwrap(),
        )
    }

    fn drive(sequence: u32) -> ShotCommand {
        ShotCommand {
            club: ClubId::Driver,
            power: 1.0,
            aim: 0.0,
            spin: [0.0, 0.0],
            accuracy: 0.0,
            sequence,
        }
    }

    fn run_to_rest(
        sim: &BallSimulator,
        ball: &mut Ball,
        hole: &HoleData,
        wind: &mut WindModel,
        events: &mut EventQueue,
    ) -> u32 {
        let mut ticks = 0;
        while ball.state.is_moving() {
            wind.advance(sim.fixed_dt());
            sim.step(ball, sim.fixed_dt(), hole, wind, events);
            ticks += 1;
            assert!(ticks < 10_000, "ball never came to rest");
        }
        ticks
    }

    fn kinds(events: &mut EventQueue) -> Vec<BallEventKind> {
        events.drain().map(|e| e.kind).collect()
    }

    #[test]
    fn straight_drive_without_wind_stays_on_line() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let mut wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);

        sim.apply_shot(&mut ball, &drive(1), &hole).unwrap();
        assert_eq!(ball.state, BallState::Flight);
        run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);

        assert!(ball.is_idle());
        assert!(ball.position.x.abs() < 1.0e-3);
        assert!(ball.position.z > 100.0 && ball.position.z < 250.0);
        assert_eq!(ball.velocity, Vec3::zeros());
        assert_eq!(ball.position, ball.rest_point);
        assert_eq!(kinds(&mut events), vec![BallEventKind::Landed, BallEventKind::TurnEnded]);
    }

    #[test]
    fn identical_inputs_give_identical_rest_positions() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let shot = ShotCommand {
            spin: [0.4, -0.6],
            accuracy: 0.3,
            ..drive(1)
        };

        let mut results = Vec::new();
        for _ in 0..2 {
            let mut wind = WindModel::new(7, 0.25);
            let mut events = EventQueue::new();
            let mut ball = Ball::new(Uuid::nil(), hole.tee, Surface::Fairway);
            sim.apply_shot(&mut ball, &shot, &hole).unwrap();
            let ticks = run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);
            results.push((ball.position, ticks));
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn fast_forward_matches_fixed_stepping() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let shot = ShotCommand {
            club: ClubId::FiveIron,
            spin: [-0.5, 0.5],
            ..drive(1)
        };

        let mut stepped = Ball::new(Uuid::nil(), hole.tee, Surface::Fairway);
        let mut wind = WindModel::new(3, 0.25);
        sim.apply_shot(&mut stepped, &shot, &hole).unwrap();
        let mut skipped = stepped.clone();
        let mut skipped_wind = wind.clone();

        let mut stepped_events = EventQueue::new();
        let stepped_ticks = run_to_rest(&sim, &mut stepped, &hole, &mut wind, &mut stepped_events);

        let mut skipped_events = EventQueue::new();
        let skipped_ticks = sim.fast_forward(&mut skipped, &hole, &mut skipped_wind, &mut skipped_events);

        assert_eq!(stepped_ticks, skipped_ticks);
        assert_eq!(stepped.position, skipped.position);
        assert_eq!(kinds(&mut stepped_events), kinds(&mut skipped_events));
    }

    #[test]
    fn second_shot_while_moving_is_ignored() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);

        sim.apply_shot(&mut ball, &drive(1), &hole).unwrap();
        for _ in 0..5 {
            sim.step(&mut ball, sim.fixed_dt(), &hole, &wind, &mut events);
        }

        let before = ball.clone();
        for seq in [1, 2] {
            assert_eq!(
                sim.apply_shot(&mut ball, &drive(seq), &hole),
                Err(ShotRejected::NotIdle(BallState::Flight))
            );
        }
        assert_eq!(ball, before);
    }

    #[test]
    fn stale_sequence_is_rejected_after_rest() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let mut wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);

        sim.apply_shot(&mut ball, &drive(5), &hole).unwrap();
        run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);

        let before = ball.clone();
        assert_eq!(
            sim.apply_shot(&mut ball, &drive(5), &hole),
            Err(ShotRejected::StaleSequence { received: 5, last: 5 })
        );
        assert_eq!(ball, before);
        assert!(sim.apply_shot(&mut ball, &drive(6), &hole).is_ok());
    }

    #[test]
    fn invalid_input_is_rejected() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);
        let shot = ShotCommand {
            power: 1.5,
            ..drive(1)
        };
        assert!(matches!(
            sim.apply_shot(&mut ball, &shot, &hole),
            Err(ShotRejected::InvalidInput(_))
        ));
        assert!(ball.is_idle());
        assert_eq!(ball.last_sequence, None);
    }

    #[test]
    fn replica_neither_accepts_shots_nor_posts_events() {
        let hole = long_hole();
        let host = BallSimulator::host(config());
        let replica = BallSimulator::replica(config());
        let mut wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);

        assert_eq!(
            replica.apply_shot(&mut ball, &drive(1), &hole),
            Err(ShotRejected::NotAuthoritative)
        );

        host.apply_shot(&mut ball, &drive(1), &hole).unwrap();
        run_to_rest(&replica, &mut ball, &hole, &mut wind, &mut events);
        assert!(ball.is_idle());
        assert!(events.is_empty());
    }

    #[test]
    fn ball_inside_capture_radius_is_holed_once() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.pin + Vec3::new(0.05, 0.0, 0.0), Surface::Green);
        ball.state = BallState::Roll;
        ball.velocity = Vec3::new(-0.2, 0.0, 0.0);

        for _ in 0..30 {
            sim.step(&mut ball, sim.fixed_dt(), &hole, &wind, &mut events);
        }

        assert!(ball.is_idle());
        assert_eq!(ball.position, hole.pin);
        assert_eq!(kinds(&mut events), vec![BallEventKind::Holed]);
    }

    fn settle(sim: &BallSimulator, hole: &HoleData, at: Vec3, surface: Surface) -> (Ball, Vec<BallEventKind>) {
        let wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), at, surface);
        ball.state = BallState::Roll;
        for _ in 0..30 {
            sim.step(&mut ball, sim.fixed_dt(), hole, &wind, &mut events);
        }
        (ball, kinds(&mut events))
    }

    #[test]
    fn short_putt_left_on_the_green_is_conceded() {
        let hole = long_hole();
        let near = hole.pin - Vec3::new(0.0, 0.0, 0.5);

        let strict = BallSimulator::host(config());
        let (ball, events) = settle(&strict, &hole, near, Surface::Green);
        assert_eq!(events, vec![BallEventKind::TurnEnded]);
        assert_ne!(ball.position, hole.pin);

        let mut lenient = BallSimulator::host(config());
        lenient.set_gimme_radius(0.65);
        let (ball, events) = settle(&lenient, &hole, near, Surface::Green);
        assert!(ball.is_idle());
        assert_eq!(ball.position, hole.pin);
        assert_eq!(events, vec![BallEventKind::Gimme]);
    }

    #[test]
    fn gimme_only_applies_on_the_green() {
        let hole = long_hole();
        let mut sim = BallSimulator::host(config());
        sim.set_gimme_radius(20.0);

        let (ball, events) = settle(&sim, &hole, Vec3::new(0.0, 0.0, 285.0), Surface::Fairway);
        assert_eq!(ball.surface, Surface::Fairway);
        assert_eq!(events, vec![BallEventKind::TurnEnded]);

        sim.set_gimme_radius(-1.0);
        assert_eq!(sim.gimme_radius(), 0.0);
    }

    #[test]
    fn fast_putt_skips_over_the_hole() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let mut wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.pin - Vec3::new(0.0, 0.0, 2.0), Surface::Green);

        let putt = ShotCommand {
            club: ClubId::Putter,
            power: 1.0,
            ..drive(1)
        };
        sim.apply_shot(&mut ball, &putt, &hole).unwrap();
        assert_eq!(ball.state, BallState::Putt);
        run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);

        assert!(ball.position.z > hole.pin.z + 1.0);
        assert_eq!(kinds(&mut events), vec![BallEventKind::TurnEnded]);
    }

    #[test]
    fn firm_surfaces_return_more_speed() {
        let sim = BallSimulator::host(config());
        let incoming = Vec3::new(0.0, -12.0, 30.0);
        let speed_on = |surface| {
            let hit = TerrainHit {
                height: 0.0,
                normal: Vec3::y(),
                surface,
            };
            sim.bounce_response(&incoming, &hit).norm()
        };

        assert!(speed_on(Surface::Fairway) >= speed_on(Surface::Green));
        assert!(speed_on(Surface::Green) >= speed_on(Surface::Rough));
        assert!(speed_on(Surface::Rough) >= speed_on(Surface::Bunker));

        let reflected = sim.bounce_response(
            &incoming,
            &TerrainHit {
                height: 0.0,
                normal: Vec3::y(),
                surface: Surface::Fairway,
            },
        );
        assert!(reflected.y > 0.0);
    }

    #[test]
    fn leaving_the_mesh_returns_to_stroke_start() {
        let mut builder = TerrainBuilder::new();
        builder.add_quad(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 300.0), 0.0, Surface::Fairway);
        let hole = HoleData::in_memory(
            4,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 250.0),
            Vec3::new(0.0, 0.0, 150.0),
            builder.build().unwrap(),
        );
        let sim = BallSimulator::host(config());
        let mut wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let start = Vec3::new(0.0, 0.0, 20.0);
        let mut ball = Ball::new(Uuid::new_v4(), start, Surface::Fairway);

        let slice = ShotCommand {
            aim: std::f32::consts::FRAC_PI_2,
            ..drive(1)
        };
        sim.apply_shot(&mut ball, &slice, &hole).unwrap();
        run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);

        assert_eq!(ball.position, start);
        assert_eq!(kinds(&mut events), vec![BallEventKind::Foul, BallEventKind::TurnEnded]);
    }

    #[test]
    fn rolling_into_water_drops_towards_the_pin() {
        let mut builder = TerrainBuilder::new();
        builder
            .add_quad(Vec2::new(-20.0, -20.0), Vec2::new(20.0, 320.0), 0.0, Surface::Fairway)
            .add_quad(Vec2::new(-20.0, 140.0), Vec2::new(20.0, 170.0), 0.01, Surface::Water);
        let hole = HoleData::in_memory(
            4,
            Vec3::zeros(),
            Vec3::new(0.0, 0.0, 300.0),
            Vec3::new(0.0, 0.0, 200.0),
            builder.build().unwrap(),
        );
        let sim = BallSimulator::host(config());
        let wind = WindModel::calm(0.25);
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), Vec3::new(0.0, 0.0, 139.5), Surface::Fairway);
        ball.state = BallState::Roll;
        ball.velocity = Vec3::new(0.0, 0.0, 3.0);

        for _ in 0..20 {
            sim.step(&mut ball, sim.fixed_dt(), &hole, &wind, &mut events);
        }

        assert!(ball.is_idle());
        assert_eq!(ball.surface, Surface::Fairway);
        assert!(ball.position.z > 170.0 && ball.position.z < 172.5);
        assert_eq!(kinds(&mut events), vec![BallEventKind::Foul, BallEventKind::TurnEnded]);
    }

    #[test]
    fn crosswind_pushes_the_ball_downwind() {
        let hole = long_hole();
        let sim = BallSimulator::host(config());
        let mut wind = WindModel::calm(0.25);
        wind.set_current(&Vec3::new(1.0, 0.8, 0.0));
        wind.set_target(&Vec3::new(1.0, 0.8, 0.0));
        let mut events = EventQueue::new();
        let mut ball = Ball::new(Uuid::new_v4(), hole.tee, Surface::Fairway);

        sim.apply_shot(&mut ball, &drive(1), &hole).unwrap();
        run_to_rest(&sim, &mut ball, &hole, &mut wind, &mut events);
        assert!(ball.position.x > 1.0);
    }
}
