//! Client replica session
//!
//! Mirrors the host's round for rendering. Inbound messages are queued by
//! [`ClientSession::receive`] and applied in arrival order at the start of the
//! next [`ClientSession::tick`]; between authoritative updates the balls are
//! advanced by a non-authoritative simulator purely for interpolation. Every
//! snapshot or event overwrites the local ball wholesale.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::{send_message, Transport, TransportError};
use crate::util::time::{tick_delta, unix_millis};
use crate::ws::protocol::{ClientMsg, HoleView, ServerMsg, TurnEventKind};

use super::ball::{Ball, BallSimulator, ShotCommand};
use super::events::EventQueue;
use super::hole::{load_course, Course, HoleData, HoleLoadError};
use super::physics::{ClubId, PhysicsConfig};
use super::round::RoundPhase;
use super::terrain::Surface;
use super::snapshot::SnapshotFilter;
use super::turn::Standing;
use super::wind::WindModel;
use super::Vec3;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport to the host is gone; the session must be abandoned
    #[error("connection to host lost")]
    ConnectionLost,

    #[error(transparent)]
    Course(#[from] HoleLoadError),

    #[error("host sent hole {0} which the loaded course does not have")]
    UnknownHole(usize),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::ConnectionLost)
    }
}

impl From<TransportError> for SessionError {
    fn from(_: TransportError) -> Self {
        SessionError::ConnectionLost
    }
}

/// Input for one stroke, before the session numbers it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Swing {
    pub club: ClubId,
    pub power: f32,
    pub aim: f32,
    pub spin: [f32; 2],
    pub accuracy: f32,
}

/// Non-authoritative mirror of one round
pub struct ClientSession {
    transport: Box<dyn Transport>,
    simulator: BallSimulator,
    wind: WindModel,
    course_root: PathBuf,
    courses: HashMap<String, Course>,
    course: Option<String>,
    hole: Option<(usize, Arc<HoleData>)>,
    balls: HashMap<Uuid, Ball>,
    names: HashMap<Uuid, String>,
    filter: SnapshotFilter,
    inbound: VecDeque<ServerMsg>,
    /// Applied messages, kept for UI/audio collaborators
    notifications: Vec<ServerMsg>,
    player_id: Option<Uuid>,
    round_id: Option<Uuid>,
    owner: bool,
    phase: RoundPhase,
    active_player: Option<Uuid>,
    standings: Vec<Standing>,
    last_error: Option<String>,
    next_sequence: u32,
    latency_ms: Option<u64>,
}

impl ClientSession {
    pub fn new(transport: Box<dyn Transport>, physics: Arc<PhysicsConfig>, course_root: PathBuf) -> Self {
        let blend_rate = physics.wind_blend_rate;
        Self {
            transport,
            simulator: BallSimulator::replica(physics),
            wind: WindModel::calm(blend_rate),
            course_root,
            courses: HashMap::new(),
            course: None,
            hole: None,
            balls: HashMap::new(),
            names: HashMap::new(),
            filter: SnapshotFilter::new(),
            inbound: VecDeque::new(),
            notifications: Vec::new(),
            player_id: None,
            round_id: None,
            owner: false,
            phase: RoundPhase::Lobby,
            active_player: None,
            standings: Vec::new(),
            last_error: None,
            next_sequence: 0,
            latency_ms: None,
        }
    }

    /// Make a course available without reading it from disk
    pub fn preload(&mut self, course: Course) {
        self.courses.insert(course.id.clone(), course);
    }

    pub fn player_id(&self) -> Option<Uuid> {
        self.player_id
    }

    pub fn round_id(&self) -> Option<Uuid> {
        self.round_id
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn course_id(&self) -> Option<&str> {
        self.course.as_deref()
    }

    pub fn hole(&self) -> Option<&Arc<HoleData>> {
        self.hole.as_ref().map(|(_, hole)| hole)
    }

    pub fn hole_index(&self) -> Option<usize> {
        self.hole.as_ref().map(|(index, _)| *index)
    }

    pub fn ball(&self, id: Uuid) -> Option<&Ball> {
        self.balls.get(&id)
    }

    pub fn balls(&self) -> impl Iterator<Item = &Ball> {
        self.balls.values()
    }

    pub fn player_name(&self, id: Uuid) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn wind(&self) -> &WindModel {
        &self.wind
    }

    pub fn active_player(&self) -> Option<Uuid> {
        self.active_player
    }

    pub fn is_my_turn(&self) -> bool {
        self.player_id.is_some() && self.active_player == self.player_id
    }

    pub fn standings(&self) -> &[Standing] {
        &self.standings
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn dropped_snapshots(&self) -> u64 {
        self.filter.dropped()
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    /// Messages applied since the last call
    pub fn drain_notifications(&mut self) -> Vec<ServerMsg> {
        std::mem::take(&mut self.notifications)
    }

    /// Number of messages received but not yet applied
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    // ------------------------------------------------------------------
    // Upward traffic
    // ------------------------------------------------------------------

    /// Ask the host to switch course (owner, lobby only)
    pub fn select_course(&self, course: &str) -> Result<(), SessionError> {
        self.send(&ClientMsg::MapInfo {
            course: course.to_string(),
        })
    }

    pub fn start_round(&self) -> Result<(), SessionError> {
        self.send(&ClientMsg::StartRound)
    }

    /// Number and send a stroke. The host decides whether it is applied.
    pub fn take_shot(&mut self, swing: Swing) -> Result<ShotCommand, SessionError> {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let shot = ShotCommand {
            club: swing.club,
            power: swing.power,
            aim: swing.aim,
            spin: swing.spin,
            accuracy: swing.accuracy,
            sequence: self.next_sequence,
        };
        self.send(&ClientMsg::ShotInput { shot })?;
        Ok(shot)
    }

    /// Re-send an already numbered shot, e.g. after a suspected loss
    pub fn resend_shot(&self, shot: ShotCommand) -> Result<(), SessionError> {
        self.send(&ClientMsg::ShotInput { shot })
    }

    pub fn ping(&self) -> Result<(), SessionError> {
        self.send(&ClientMsg::Ping { t: unix_millis() })
    }

    pub fn leave(&self) -> Result<(), SessionError> {
        self.send(&ClientMsg::Leave)
    }

    fn send(&self, msg: &ClientMsg) -> Result<(), SessionError> {
        send_message(self.transport.as_ref(), msg).map_err(|e| match e {
            TransportError::Disconnected => SessionError::ConnectionLost,
            other => {
                warn!(error = %other, "Failed to send message");
                SessionError::ConnectionLost
            }
        })
    }

    // ------------------------------------------------------------------
    // Downward traffic
    // ------------------------------------------------------------------

    /// Poll the transport and queue everything received. Nothing is applied.
    pub fn receive(&mut self) -> Result<usize, SessionError> {
        let packets = match self.transport.poll() {
            Ok(packets) => packets,
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "Host connection lost");
                return Err(SessionError::ConnectionLost);
            }
            Err(e) => {
                warn!(error = %e, "Transport error");
                return Ok(0);
            }
        };

        let mut queued = 0;
        for packet in packets {
            match packet.decode::<ServerMsg>() {
                Ok(msg) => {
                    self.inbound.push_back(msg);
                    queued += 1;
                }
                Err(e) => warn!(error = %e, "Dropping bad packet"),
            }
        }
        Ok(queued)
    }

    /// Apply queued messages in order, then advance local interpolation by
    /// one fixed tick. Course load failures are reported after the whole
    /// queue has been applied.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        self.receive()?;
        let result = self.apply_queued(None);

        let dt = tick_delta();
        self.wind.advance(dt);
        if let Some((_, hole)) = &self.hole {
            // replica steps post nothing
            let mut events = EventQueue::new();
            for ball in self.balls.values_mut() {
                self.simulator.step(ball, dt, hole, &self.wind, &mut events);
            }
        }

        result
    }

    /// Skip visual playback of `ball_id`'s current shot.
    ///
    /// If the host's result for the shot is already queued, the queue is
    /// applied up to and including it. Otherwise the shot is played out
    /// locally to rest and snapshots for the ball are ignored until the
    /// host's result arrives. Returns whether the ball is now at rest.
    pub fn fast_forward(&mut self, ball_id: Uuid) -> Result<bool, SessionError> {
        self.receive()?;

        let result_queued = self.inbound.iter().position(
            |msg| matches!(msg, ServerMsg::TurnEvent { ball, .. } if ball.id == ball_id),
        );
        if let Some(index) = result_queued {
            self.apply_queued(Some(index + 1))?;
            return Ok(self.balls.get(&ball_id).is_some_and(|b| b.is_idle()));
        }

        let Some((_, hole)) = &self.hole else {
            return Ok(false);
        };
        let Some(ball) = self.balls.get_mut(&ball_id) else {
            return Ok(false);
        };
        if !ball.state.is_moving() {
            return Ok(true);
        }

        // Wind is played forward on a copy so the mirror stays in step with the host
        let mut wind = self.wind.clone();
        let mut events = EventQueue::new();
        let ticks = self.simulator.fast_forward(ball, hole, &mut wind, &mut events);
        self.filter.suspend(ball_id);
        debug!(ball_id = %ball_id, ticks, "Fast-forwarded locally");

        Ok(ball.is_idle())
    }

    fn apply_queued(&mut self, limit: Option<usize>) -> Result<(), SessionError> {
        let count = limit.unwrap_or(self.inbound.len()).min(self.inbound.len());
        let mut first_error = None;
        let batch: Vec<ServerMsg> = self.inbound.drain(..count).collect();
        for msg in batch {
            if let Err(e) = self.apply(&msg) {
                warn!(error = %e, "Failed to apply host message");
                first_error.get_or_insert(e);
            }
            self.notifications.push(msg);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn apply(&mut self, msg: &ServerMsg) -> Result<(), SessionError> {
        match msg {
            ServerMsg::Welcome {
                player_id,
                round_id,
                owner,
                ..
            } => {
                self.player_id = Some(*player_id);
                self.round_id = Some(*round_id);
                self.owner = *owner;
                info!(player_id = %player_id, round_id = %round_id, owner, "Joined round");
            }
            ServerMsg::MapInfo {
                course,
                gimme_radius,
                ..
            } => {
                self.simulator.set_gimme_radius(*gimme_radius);
                self.use_course(course)?;
            }
            ServerMsg::RoundState {
                phase,
                course,
                hole,
                players,
                active_player,
                wind,
                wind_target,
                seq,
                ..
            } => {
                self.use_course(course)?;
                self.phase = *phase;
                self.enter_hole(hole)?;
                self.balls.clear();
                for player in players {
                    let ball = self.ball_entry(player.player_id);
                    ball.apply_sync(&player.ball);
                    self.names.insert(player.player_id, player.name.clone());
                    self.filter.set_floor(player.player_id, *seq);
                }
                self.active_player = *active_player;
                self.wind.set_current(wind);
                self.wind.set_target(wind_target);
            }
            ServerMsg::PlayerJoined { player_id, name } => {
                self.names.insert(*player_id, name.clone());
                if let Some((_, hole)) = &self.hole {
                    let (tee, surface) = (hole.tee, hole.tee_surface());
                    self.balls
                        .entry(*player_id)
                        .or_insert_with(|| Ball::new(*player_id, tee, surface));
                }
            }
            ServerMsg::PlayerLeft { player_id, .. } => {
                self.names.remove(player_id);
                self.balls.remove(player_id);
            }
            ServerMsg::HoleChanged { hole, balls } => {
                self.phase = RoundPhase::Playing;
                self.enter_hole(hole)?;
                self.filter.reset();
                self.balls.clear();
                for sync in balls {
                    self.ball_entry(sync.id).apply_sync(sync);
                }
            }
            ServerMsg::TurnChanged { player_id } => {
                self.active_player = Some(*player_id);
            }
            ServerMsg::BallSnapshot { seq, ball: sync, .. } => {
                if self.filter.accept(sync.id, *seq) {
                    self.ball_entry(sync.id).apply_sync(sync);
                } else {
                    debug!(ball_id = %sync.id, seq, "Stale snapshot discarded");
                }
            }
            ServerMsg::TurnEvent {
                seq, kind, ball: sync, ..
            } => {
                self.ball_entry(sync.id).apply_sync(sync);
                self.filter.observe_event(sync.id, *seq);
                if matches!(kind, TurnEventKind::Holed | TurnEventKind::Gimme) {
                    debug!(ball_id = %sync.id, gimme = *kind == TurnEventKind::Gimme, "Ball holed");
                }
            }
            ServerMsg::WindTarget { target } => self.wind.set_target(target),
            ServerMsg::Wind { vector } => self.wind.set_current(vector),
            ServerMsg::RoundComplete { standings } => {
                self.standings = standings.clone();
                self.phase = RoundPhase::Complete;
                self.active_player = None;
            }
            ServerMsg::Error { code, message } => {
                warn!(code = %code, message = %message, "Host reported error");
                self.last_error = Some(format!("{code}: {message}"));
            }
            ServerMsg::Pong { t, .. } => {
                self.latency_ms = Some(unix_millis().saturating_sub(*t));
            }
            ServerMsg::Landed { .. }
            | ServerMsg::MaxStrokes { .. }
            | ServerMsg::Retired { .. }
            | ServerMsg::HoleResolved { .. } => {}
        }
        Ok(())
    }

    fn ball_entry(&mut self, id: Uuid) -> &mut Ball {
        let (tee, surface) = match &self.hole {
            Some((_, hole)) => (hole.tee, hole.tee_surface()),
            None => (Vec3::zeros(), Surface::Fairway),
        };
        self.balls
            .entry(id)
            .or_insert_with(|| Ball::new(id, tee, surface))
    }

    /// Load (or reuse) the course the host announced
    fn use_course(&mut self, id: &str) -> Result<(), SessionError> {
        if self.course.as_deref() == Some(id) {
            return Ok(());
        }
        if !self.courses.contains_key(id) {
            let course = load_course(&self.course_root, id)?;
            self.courses.insert(id.to_string(), course);
        }
        self.course = Some(id.to_string());
        self.hole = None;
        Ok(())
    }

    fn enter_hole(&mut self, view: &HoleView) -> Result<(), SessionError> {
        let hole = self
            .course
            .as_ref()
            .and_then(|id| self.courses.get(id))
            .and_then(|course| course.hole(view.index))
            .cloned()
            .ok_or(SessionError::UnknownHole(view.index))?;
        self.hole = Some((view.index, hole));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ball::BallState;
    use crate::game::terrain::TerrainBuilder;
    use crate::game::Vec2;
    use crate::net::{LoopbackEnd, Packet};

    fn course() -> Course {
        let mut builder = TerrainBuilder::new();
        builder.add_quad(Vec2::new(-50.0, -20.0), Vec2::new(50.0, 200.0), 0.0, Surface::Fairway);
        Course {
            id: "range".to_string(),
            title: "Range".to_string(),
            holes: vec![Arc::new(HoleData::in_memory(
                4,
                Vec3::zeros(),
                Vec3::new(0.0, 0.0, 180.0),
                Vec3::new(0.0, 0.0, 150.0),
                builder.build().unwrap(),
            ))],
        }
    }

    fn session() -> (ClientSession, LoopbackEnd) {
        let (host, client) = LoopbackEnd::pair(16);
        let mut session = ClientSession::new(
            Box::new(client),
            Arc::new(PhysicsConfig::default()),
            std::env::temp_dir(),
        );
        session.preload(course());
        (session, host)
    }

    fn push(host: &LoopbackEnd, msg: ServerMsg) {
        host.send_packet(Packet::encode(&msg).unwrap()).unwrap();
    }

    fn hole_view() -> HoleView {
        HoleView {
            index: 0,
            par: 4,
            tee: Vec3::zeros(),
            pin: Vec3::new(0.0, 0.0, 180.0),
            target: Vec3::new(0.0, 0.0, 150.0),
        }
    }

    fn sync(id: Uuid, z: f32, state: BallState) -> crate::game::BallSync {
        let mut ball = Ball::new(id, Vec3::new(0.0, 0.0, z), Surface::Fairway);
        ball.state = state;
        if state.is_moving() {
            ball.velocity = Vec3::new(0.0, 0.0, 5.0);
        }
        ball.sync()
    }

    fn start(session: &mut ClientSession, host: &LoopbackEnd, player: Uuid) {
        push(host, ServerMsg::MapInfo {
            course: "range".to_string(),
            title: "Range".to_string(),
            hole_count: 1,
            gimme_radius: 0.6,
        });
        push(host, ServerMsg::HoleChanged {
            hole: hole_view(),
            balls: vec![sync(player, 0.0, BallState::Idle)],
        });
        session.tick().unwrap();
    }

    #[test]
    fn receive_only_queues() {
        let (mut session, host) = session();
        push(&host, ServerMsg::TurnChanged {
            player_id: Uuid::new_v4(),
        });
        assert_eq!(session.receive().unwrap(), 1);
        assert_eq!(session.pending(), 1);
        assert!(session.active_player().is_none());

        session.tick().unwrap();
        assert!(session.active_player().is_some());
        assert_eq!(session.drain_notifications().len(), 1);
    }

    #[test]
    fn replica_uses_the_host_gimme_radius() {
        let (mut session, host) = session();
        assert_eq!(session.simulator.gimme_radius(), 0.0);
        start(&mut session, &host, Uuid::new_v4());
        assert_eq!(session.simulator.gimme_radius(), 0.6);
        assert_eq!(session.course_id(), Some("range"));
    }

    #[test]
    fn older_snapshot_never_overwrites_newer() {
        let (mut session, host) = session();
        let player = Uuid::new_v4();
        start(&mut session, &host, player);

        push(&host, ServerMsg::BallSnapshot {
            seq: 4,
            tick: 40,
            ball: sync(player, 20.0, BallState::Roll),
        });
        push(&host, ServerMsg::BallSnapshot {
            seq: 3,
            tick: 30,
            ball: sync(player, 10.0, BallState::Roll),
        });
        session.receive().unwrap();
        let applied_before_tick = session.ball(player).unwrap().position.z;
        assert_eq!(applied_before_tick, 0.0);

        session.tick().unwrap();
        assert!(session.ball(player).unwrap().position.z >= 20.0);
        assert_eq!(session.dropped_snapshots(), 1);
    }

    #[test]
    fn turn_event_overrides_local_prediction() {
        let (mut session, host) = session();
        let player = Uuid::new_v4();
        start(&mut session, &host, player);

        push(&host, ServerMsg::BallSnapshot {
            seq: 1,
            tick: 1,
            ball: sync(player, 5.0, BallState::Roll),
        });
        session.tick().unwrap();
        for _ in 0..30 {
            session.tick().unwrap();
        }

        let rest = sync(player, 42.5, BallState::Idle);
        push(&host, ServerMsg::TurnEvent {
            seq: 2,
            kind: TurnEventKind::TurnEnded,
            player_id: player,
            ball: rest,
            strokes: 1,
            score_delta: 1,
            penalty: false,
        });
        session.tick().unwrap();
        let ball = session.ball(player).unwrap();
        assert!(ball.is_idle());
        assert_eq!(ball.position, rest.position);
    }

    #[test]
    fn fast_forward_uses_queued_result() {
        let (mut session, host) = session();
        let player = Uuid::new_v4();
        start(&mut session, &host, player);

        push(&host, ServerMsg::BallSnapshot {
            seq: 1,
            tick: 1,
            ball: sync(player, 5.0, BallState::Roll),
        });
        session.tick().unwrap();

        let rest = sync(player, 61.0, BallState::Idle);
        push(&host, ServerMsg::TurnEvent {
            seq: 9,
            kind: TurnEventKind::TurnEnded,
            player_id: player,
            ball: rest,
            strokes: 1,
            score_delta: 1,
            penalty: false,
        });
        push(&host, ServerMsg::TurnChanged { player_id: player });

        assert!(session.fast_forward(player).unwrap());
        assert_eq!(session.ball(player).unwrap().position, rest.position);
        // messages after the result stay queued for the next tick
        assert_eq!(session.pending(), 1);
    }

    #[test]
    fn fast_forward_without_result_plays_out_locally() {
        let (mut session, host) = session();
        let player = Uuid::new_v4();
        start(&mut session, &host, player);

        push(&host, ServerMsg::BallSnapshot {
            seq: 1,
            tick: 1,
            ball: sync(player, 5.0, BallState::Roll),
        });
        session.tick().unwrap();
        assert!(session.fast_forward(player).unwrap());

        push(&host, ServerMsg::BallSnapshot {
            seq: 2,
            tick: 2,
            ball: sync(player, 6.0, BallState::Roll),
        });
        session.tick().unwrap();
        assert!(session.ball(player).unwrap().is_idle());
    }

    #[test]
    fn unknown_course_is_reported() {
        let (mut session, host) = session();
        push(&host, ServerMsg::MapInfo {
            course: "missing-course".to_string(),
            title: String::new(),
            hole_count: 1,
            gimme_radius: 0.0,
        });
        let err = session.tick().unwrap_err();
        assert!(matches!(err, SessionError::Course(HoleLoadError::Missing { .. })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn host_drop_is_fatal() {
        let (mut session, host) = session();
        drop(host);
        let err = session.tick().unwrap_err();
        assert!(err.is_fatal());
        assert!(session.take_shot(Swing {
            club: ClubId::Driver,
            power: 1.0,
            aim: 0.0,
            spin: [0.0, 0.0],
            accuracy: 0.0,
        })
        .is_err());
    }

    #[test]
    fn shots_are_numbered() {
        let (mut session, mut host) = session();
        let swing = Swing {
            club: ClubId::Putter,
            power: 0.3,
            aim: 0.0,
            spin: [0.0, 0.0],
            accuracy: 0.0,
        };
        assert_eq!(session.take_shot(swing).unwrap().sequence, 1);
        assert_eq!(session.take_shot(swing).unwrap().sequence, 2);

        let sent: Vec<ClientMsg> = host
            .poll()
            .unwrap()
            .iter()
            .map(|p| p.decode().unwrap())
            .collect();
        assert_eq!(sent.len(), 2);
    }
}
