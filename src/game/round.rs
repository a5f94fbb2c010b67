//! Round state and authoritative tick loop

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::net::{Packet, Transport, TransportError};
use crate::util::time::{tick_delta, tick_period, ticks_between, unix_millis, SNAPSHOT_TPS, WIND_SYNC_TPS};
use crate::ws::protocol::{
    ClientMsg, HoleView, PlayerScore, PlayerView, ServerMsg, TurnEventKind,
};

use super::ball::{BallSimulator, ShotCommand};
use super::events::EventQueue;
use super::hole::{load_course, Course, HoleData, HoleLoadError};
use super::physics::PhysicsConfig;
use super::scoring::ScoringKind;
use super::snapshot::SnapshotBuilder;
use super::terrain::TerrainHit;
use super::turn::{DirectorOutcome, HolePhase, TurnDirector};
use super::wind::WindModel;
use super::Vec3;

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Waiting for the owner to pick a course and start
    Lobby,
    /// Holes in play
    Playing,
    /// Round over
    Complete,
}

#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Directory course identifiers resolve under
    pub course_root: PathBuf,
    pub max_players: usize,
    pub scoring: ScoringKind,
    /// Seed for the round's wind
    pub seed: u64,
    /// Pause between a hole resolving and the next one starting (s)
    pub hole_transition_secs: f32,
    /// An empty round is shut down after this long (s)
    pub idle_timeout_secs: f32,
    /// Balls at rest on the green this close to the pin are conceded (m);
    /// zero plays every putt out
    pub gimme_radius: f32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            course_root: PathBuf::from("courses"),
            max_players: 8,
            scoring: ScoringKind::StrokePlay,
            seed: 0,
            hole_transition_secs: 3.0,
            idle_timeout_secs: 300.0,
            gimme_radius: 0.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error(transparent)]
    Course(#[from] HoleLoadError),

    #[error("round {0} not found")]
    NotFound(Uuid),

    #[error("round {0} has shut down")]
    Closed(Uuid),

    #[error("course load task failed: {0}")]
    LoadTask(#[from] tokio::task::JoinError),
}

/// Commands delivered to the round task
pub enum RoundCommand {
    Connect {
        player_id: Uuid,
        name: String,
        transport: Box<dyn Transport>,
    },
    /// Result of a lobby course selection, loaded off the tick
    CourseLoaded {
        requested_by: Uuid,
        course_id: String,
        result: Result<Course, RoundError>,
    },
}

/// Read a course directory on the blocking pool
pub async fn load_course_blocking(root: PathBuf, course_id: String) -> Result<Course, RoundError> {
    let course = tokio::task::spawn_blocking(move || load_course(&root, &course_id)).await??;
    Ok(course)
}

/// Handle to a running round
#[derive(Clone)]
pub struct RoundHandle {
    pub id: Uuid,
    command_tx: mpsc::Sender<RoundCommand>,
    player_count: Arc<AtomicUsize>,
    /// Current hole, replaced between holes; read by debug probes
    hole: Arc<RwLock<Arc<HoleData>>>,
}

impl RoundHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Hand a peer's transport to the round
    pub async fn connect(
        &self,
        player_id: Uuid,
        name: String,
        transport: Box<dyn Transport>,
    ) -> Result<(), RoundError> {
        self.command_tx
            .send(RoundCommand::Connect {
                player_id,
                name,
                transport,
            })
            .await
            .map_err(|_| RoundError::Closed(self.id))
    }

    /// Terrain under `position` on the hole currently in play
    pub fn probe_terrain(&self, position: &Vec3) -> Option<TerrainHit> {
        self.hole.read().terrain.intersect(position)
    }

    pub fn current_hole(&self) -> Arc<HoleData> {
        self.hole.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Registry of all active rounds
pub struct RoundRegistry {
    rounds: DashMap<Uuid, RoundHandle>,
}

impl RoundRegistry {
    pub fn new() -> Self {
        Self {
            rounds: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<RoundHandle> {
        self.rounds.get(id).map(|r| r.value().clone())
    }

    /// Like `get`, for callers that report a missing round as an error
    pub fn handle(&self, id: &Uuid) -> Result<RoundHandle, RoundError> {
        self.get(id).ok_or(RoundError::NotFound(*id))
    }

    pub fn insert(&self, handle: RoundHandle) {
        self.rounds.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<RoundHandle> {
        self.rounds.remove(id).map(|(_, h)| h)
    }

    pub fn active_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn total_players(&self) -> usize {
        self.rounds.iter().map(|r| r.value().player_count()).sum()
    }

    /// Load the course, spawn the round task and register it
    pub async fn launch(
        self: &Arc<Self>,
        course_id: &str,
        physics: Arc<PhysicsConfig>,
        config: RoundConfig,
    ) -> Result<RoundHandle, RoundError> {
        let course = load_course_blocking(config.course_root.clone(), course_id.to_string()).await?;
        let (round, handle) = GameRound::new(Uuid::new_v4(), course, physics, config);
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        let id = handle.id;
        tokio::spawn(async move {
            round.run().await;
            registry.remove(&id);
        });

        Ok(handle)
    }
}

impl Default for RoundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct Peer {
    player_id: Uuid,
    name: String,
    transport: Box<dyn Transport>,
    connected: bool,
}

/// The authoritative round
pub struct GameRound {
    id: Uuid,
    config: RoundConfig,
    phase: RoundPhase,
    tick: u64,
    course: Course,
    director: TurnDirector,
    simulator: BallSimulator,
    wind: WindModel,
    events: EventQueue,
    snapshots: SnapshotBuilder,
    wind_interval: u32,
    ticks_since_wind: u32,
    peers: Vec<Peer>,
    owner: Option<Uuid>,
    transition_timer: Option<f32>,
    idle_secs: f32,
    /// Latest course selection still loading
    pending_course: Option<String>,
    command_tx: mpsc::Sender<RoundCommand>,
    command_rx: mpsc::Receiver<RoundCommand>,
    player_count: Arc<AtomicUsize>,
    hole: Arc<RwLock<Arc<HoleData>>>,
}

impl GameRound {
    /// Create a new round in the lobby
    pub fn new(
        id: Uuid,
        course: Course,
        physics: Arc<PhysicsConfig>,
        config: RoundConfig,
    ) -> (Self, RoundHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));
        let director = TurnDirector::new(&course, config.scoring.policy());
        let hole = Arc::new(RwLock::new(director.hole().clone()));
        let mut simulator = BallSimulator::host(physics.clone());
        simulator.set_gimme_radius(config.gimme_radius);

        let handle = RoundHandle {
            id,
            command_tx: command_tx.clone(),
            player_count: player_count.clone(),
            hole: hole.clone(),
        };

        let round = Self {
            id,
            phase: RoundPhase::Lobby,
            tick: 0,
            director,
            simulator,
            wind: WindModel::new(config.seed, physics.wind_blend_rate),
            events: EventQueue::new(),
            snapshots: SnapshotBuilder::new(ticks_between(SNAPSHOT_TPS)),
            wind_interval: ticks_between(WIND_SYNC_TPS),
            ticks_since_wind: 0,
            peers: Vec::new(),
            owner: None,
            transition_timer: None,
            idle_secs: 0.0,
            pending_course: None,
            command_tx,
            command_rx,
            player_count,
            hole,
            course,
            config,
        };

        (round, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Ticks run since the round was created
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn director(&self) -> &TurnDirector {
        &self.director
    }

    pub fn wind(&self) -> &WindModel {
        &self.wind
    }

    /// Run the authoritative tick loop until the round completes or empties
    pub async fn run(mut self) {
        info!(round_id = %self.id, course = %self.course.id, "Round opened");

        let mut tick_interval = interval(tick_period());
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            self.tick();

            if self.phase == RoundPhase::Complete {
                info!(round_id = %self.id, "Round complete");
                break;
            }

            if self.idle_secs >= self.config.idle_timeout_secs {
                info!(round_id = %self.id, "Round idle, shutting down");
                break;
            }
        }
    }

    /// One fixed simulation tick
    pub fn tick(&mut self) {
        let dt = tick_delta();
        self.tick += 1;

        // Inbound traffic is applied at the start of the tick, never mid-step
        self.process_commands();
        let inbound = self.poll_peers();
        self.drop_disconnected();
        for (player_id, msg) in inbound {
            if self.peers.iter().any(|p| p.player_id == player_id && p.connected) {
                self.handle_message(player_id, msg);
            }
        }
        self.drop_disconnected();

        if self.peers.is_empty() {
            self.idle_secs += dt;
        } else {
            self.idle_secs = 0.0;
        }

        if self.phase != RoundPhase::Playing {
            return;
        }

        self.wind.advance(dt);
        let hole = self.director.hole().clone();
        for ball in self.director.balls_mut() {
            self.simulator.step(ball, dt, &hole, &self.wind, &mut self.events);
        }

        if !self.events.is_empty() {
            let events: Vec<_> = self.events.drain().collect();
            for event in &events {
                let outcomes = self.director.handle_event(event);
                self.apply_outcomes(outcomes);
            }
        }

        self.update_transition(dt);

        if self.snapshots.should_send() {
            let msgs = self.snapshots.build(self.tick, self.director.balls());
            for msg in &msgs {
                self.broadcast(msg);
            }
        }

        self.ticks_since_wind += 1;
        if self.ticks_since_wind >= self.wind_interval {
            self.ticks_since_wind = 0;
            let msg = ServerMsg::Wind {
                vector: self.wind.vector(),
            };
            self.broadcast(&msg);
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                RoundCommand::Connect {
                    player_id,
                    name,
                    transport,
                } => self.handle_connect(player_id, name, transport),
                RoundCommand::CourseLoaded {
                    requested_by,
                    course_id,
                    result,
                } => self.handle_course_loaded(requested_by, &course_id, result),
            }
        }
    }

    /// Receive-poll every peer once
    fn poll_peers(&mut self) -> Vec<(Uuid, ClientMsg)> {
        let mut inbound = Vec::new();
        for peer in &mut self.peers {
            match peer.transport.poll() {
                Ok(packets) => {
                    for packet in packets {
                        match packet.decode::<ClientMsg>() {
                            Ok(msg) => inbound.push((peer.player_id, msg)),
                            Err(e) => warn!(player_id = %peer.player_id, error = %e, "Dropping bad packet"),
                        }
                    }
                }
                Err(TransportError::Disconnected) => peer.connected = false,
                Err(e) => warn!(player_id = %peer.player_id, error = %e, "Transport error"),
            }
        }
        inbound
    }

    fn drop_disconnected(&mut self) {
        let gone: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|p| !p.connected)
            .map(|p| p.player_id)
            .collect();
        for player_id in gone {
            self.handle_leave(player_id, "disconnected");
        }
    }

    fn handle_connect(&mut self, player_id: Uuid, name: String, transport: Box<dyn Transport>) {
        let refuse = |transport: Box<dyn Transport>, code: &str, message: &str| {
            if let Ok(packet) = Packet::encode(&ServerMsg::error(code, message)) {
                let _ = transport.send_packet(packet);
            }
        };

        if self.phase == RoundPhase::Complete {
            refuse(transport, "round_over", "Round has finished");
            return;
        }
        if self.peers.iter().any(|p| p.player_id == player_id) {
            warn!(round_id = %self.id, player_id = %player_id, "Player already in round");
            refuse(transport, "already_joined", "Player is already in this round");
            return;
        }
        if self.peers.len() >= self.config.max_players {
            refuse(transport, "round_full", "Round is full");
            return;
        }

        let had_active = self.director.active_player();
        self.director.add_player(player_id, name.clone());
        self.owner.get_or_insert(player_id);
        self.peers.push(Peer {
            player_id,
            name: name.clone(),
            transport,
            connected: true,
        });
        self.player_count.store(self.peers.len(), Ordering::Relaxed);

        self.send_to(
            player_id,
            &ServerMsg::Welcome {
                player_id,
                round_id: self.id,
                server_time: unix_millis(),
                owner: self.owner == Some(player_id),
            },
        );
        let info = self.map_info();
        self.send_to(player_id, &info);
        if self.phase != RoundPhase::Lobby {
            let state = self.round_state();
            self.send_to(player_id, &state);
        }
        self.broadcast(&ServerMsg::PlayerJoined { player_id, name });

        if had_active.is_none() {
            if let Some(active) = self.director.active_player() {
                self.broadcast(&ServerMsg::TurnChanged { player_id: active });
            }
        }

        info!(
            round_id = %self.id,
            player_id = %player_id,
            player_count = self.peers.len(),
            "Player joined round"
        );
    }

    fn handle_leave(&mut self, player_id: Uuid, reason: &str) {
        let before = self.peers.len();
        self.peers.retain(|p| p.player_id != player_id);
        if self.peers.len() == before {
            return;
        }
        self.player_count.store(self.peers.len(), Ordering::Relaxed);

        if self.owner == Some(player_id) {
            self.owner = self.peers.first().map(|p| p.player_id);
        }

        self.broadcast(&ServerMsg::PlayerLeft {
            player_id,
            reason: reason.to_string(),
        });
        let outcomes = self.director.remove_player(player_id);
        self.apply_outcomes(outcomes);

        info!(round_id = %self.id, player_id = %player_id, reason, "Player left round");

        if self.peers.is_empty() && self.phase == RoundPhase::Playing {
            info!(round_id = %self.id, "All players left, ending round");
            self.phase = RoundPhase::Complete;
        }
    }

    fn handle_message(&mut self, player_id: Uuid, msg: ClientMsg) {
        match msg {
            ClientMsg::MapInfo { course } => self.handle_map_info(player_id, &course),
            ClientMsg::StartRound => self.handle_start(player_id),
            ClientMsg::ShotInput { shot } => self.handle_shot(player_id, &shot),
            ClientMsg::Ping { t } => {
                let pong = ServerMsg::Pong {
                    t,
                    server_time: unix_millis(),
                };
                self.send_to(player_id, &pong);
            }
            ClientMsg::Leave => {
                if let Some(peer) = self.peers.iter_mut().find(|p| p.player_id == player_id) {
                    peer.connected = false;
                }
            }
        }
    }

    fn owner_in_lobby(&mut self, player_id: Uuid) -> bool {
        if self.phase != RoundPhase::Lobby || self.owner != Some(player_id) {
            self.send_to(
                player_id,
                &ServerMsg::error("not_allowed", "Only the round owner can do that before the round starts"),
            );
            return false;
        }
        true
    }

    /// Start loading the owner's course choice; the result comes back as a
    /// `CourseLoaded` command on a later tick
    fn handle_map_info(&mut self, player_id: Uuid, course_id: &str) {
        if !self.owner_in_lobby(player_id) {
            return;
        }

        self.pending_course = Some(course_id.to_string());
        let root = self.config.course_root.clone();
        let course_id = course_id.to_string();
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            let result = load_course_blocking(root, course_id.clone()).await;
            let loaded = RoundCommand::CourseLoaded {
                requested_by: player_id,
                course_id,
                result,
            };
            // the round may have ended while the course was loading
            let _ = command_tx.send(loaded).await;
        });
    }

    fn handle_course_loaded(
        &mut self,
        player_id: Uuid,
        course_id: &str,
        result: Result<Course, RoundError>,
    ) {
        if self.pending_course.as_deref() != Some(course_id) {
            debug!(round_id = %self.id, course = %course_id, "Superseded course load dropped");
            return;
        }
        self.pending_course = None;

        let course = match result {
            Ok(course) => course,
            Err(e) => {
                warn!(round_id = %self.id, course = %course_id, error = %e, "Course load failed");
                self.send_to(player_id, &ServerMsg::error("course_load_failed", e.to_string()));
                return;
            }
        };
        if self.phase != RoundPhase::Lobby {
            debug!(round_id = %self.id, course = %course_id, "Round already started, course load dropped");
            return;
        }

        let mut director = TurnDirector::new(&course, self.config.scoring.policy());
        for peer in &self.peers {
            director.add_player(peer.player_id, peer.name.clone());
        }
        *self.hole.write() = director.hole().clone();
        self.director = director;
        self.course = course;

        let info = self.map_info();
        self.broadcast(&info);
    }

    fn handle_start(&mut self, player_id: Uuid) {
        if !self.owner_in_lobby(player_id) {
            return;
        }

        self.phase = RoundPhase::Playing;
        info!(round_id = %self.id, course = %self.course.id, players = self.peers.len(), "Round started");
        let outcomes = self.director.begin_round();
        self.apply_outcomes(outcomes);
    }

    fn handle_shot(&mut self, player_id: Uuid, shot: &ShotCommand) {
        if self.phase != RoundPhase::Playing || !self.director.can_shoot(player_id) {
            debug!(round_id = %self.id, player_id = %player_id, "Shot out of turn ignored");
            return;
        }

        let hole = self.director.hole().clone();
        let Some(ball) = self.director.ball_mut(player_id) else {
            return;
        };

        match self.simulator.apply_shot(ball, shot, &hole) {
            Ok(()) => {
                self.director.shot_taken(player_id);
                self.snapshots.force_next();
            }
            Err(rejected) => {
                debug!(
                    round_id = %self.id,
                    player_id = %player_id,
                    sequence = shot.sequence,
                    reason = %rejected,
                    "Shot rejected"
                );
            }
        }
    }

    fn apply_outcomes(&mut self, outcomes: Vec<DirectorOutcome>) {
        for outcome in outcomes {
            match outcome {
                DirectorOutcome::Landed {
                    player_id,
                    position,
                    surface,
                } => self.broadcast(&ServerMsg::Landed {
                    player_id,
                    position,
                    surface,
                }),
                DirectorOutcome::TurnEnded {
                    player_id,
                    ball,
                    strokes,
                    score_delta,
                    penalty,
                } => {
                    let msg = ServerMsg::TurnEvent {
                        seq: self.snapshots.next_sequence(),
                        kind: TurnEventKind::TurnEnded,
                        player_id,
                        ball,
                        strokes,
                        score_delta,
                        penalty,
                    };
                    self.broadcast(&msg);
                }
                DirectorOutcome::Holed {
                    player_id,
                    ball,
                    strokes,
                    score_delta,
                    gimme,
                } => {
                    info!(round_id = %self.id, player_id = %player_id, strokes, gimme, "Holed");
                    let kind = if gimme {
                        TurnEventKind::Gimme
                    } else {
                        TurnEventKind::Holed
                    };
                    let msg = ServerMsg::TurnEvent {
                        seq: self.snapshots.next_sequence(),
                        kind,
                        player_id,
                        ball,
                        strokes,
                        score_delta,
                        penalty: false,
                    };
                    self.broadcast(&msg);
                }
                DirectorOutcome::MaxStrokes { player_id } => {
                    self.broadcast(&ServerMsg::MaxStrokes { player_id })
                }
                DirectorOutcome::Retired { player_id, strokes } => {
                    self.broadcast(&ServerMsg::Retired { player_id, strokes })
                }
                DirectorOutcome::TurnChanged { player_id } => {
                    self.broadcast(&ServerMsg::TurnChanged { player_id })
                }
                DirectorOutcome::HoleResolved { hole, scores } => {
                    let scores = scores
                        .into_iter()
                        .map(|(player_id, score)| PlayerScore { player_id, score })
                        .collect();
                    self.broadcast(&ServerMsg::HoleResolved { hole, scores });
                    self.transition_timer = Some(self.config.hole_transition_secs);
                }
                DirectorOutcome::HoleStarted { hole } => self.start_hole(hole),
                DirectorOutcome::RoundComplete { standings } => {
                    self.broadcast(&ServerMsg::RoundComplete { standings });
                    self.phase = RoundPhase::Complete;
                }
            }
        }
    }

    fn start_hole(&mut self, index: usize) {
        let hole = self.director.hole().clone();
        *self.hole.write() = hole.clone();

        let balls = self.director.balls().map(|b| b.sync()).collect();
        self.broadcast(&ServerMsg::HoleChanged {
            hole: HoleView::new(index, &hole),
            balls,
        });

        let target = self.wind.force_change();
        self.broadcast(&ServerMsg::WindTarget { target });

        info!(round_id = %self.id, hole = index, par = hole.par, "Hole started");
    }

    /// Count down to the next hole once the current one resolves. The hole
    /// only changes once every ball is at rest.
    fn update_transition(&mut self, dt: f32) {
        let Some(remaining) = self.transition_timer.as_mut() else {
            return;
        };
        *remaining -= dt;
        if *remaining > 0.0 || self.director.phase() != HolePhase::Resolved {
            return;
        }

        if let Some(outcomes) = self.director.advance_hole() {
            self.transition_timer = None;
            self.apply_outcomes(outcomes);
        }
    }

    fn map_info(&self) -> ServerMsg {
        ServerMsg::MapInfo {
            course: self.course.id.clone(),
            title: self.course.title.clone(),
            hole_count: self.course.len(),
            gimme_radius: self.simulator.gimme_radius(),
        }
    }

    fn round_state(&self) -> ServerMsg {
        let players = self
            .peers
            .iter()
            .filter_map(|peer| {
                let record = self.director.record(peer.player_id)?.clone();
                let ball = self.director.ball(peer.player_id)?.sync();
                Some(PlayerView {
                    player_id: peer.player_id,
                    name: peer.name.clone(),
                    record,
                    ball,
                })
            })
            .collect();

        ServerMsg::RoundState {
            phase: self.phase,
            course: self.course.id.clone(),
            scoring: self.director.scoring_kind(),
            hole: HoleView::new(self.director.hole_index(), self.director.hole()),
            players,
            active_player: self.director.active_player(),
            wind: self.wind.vector(),
            wind_target: self.wind.target_vector(),
            seq: self.snapshots.current_sequence(),
        }
    }

    /// Fire-and-forget to every peer; a failed send marks the peer for removal
    fn broadcast(&mut self, msg: &ServerMsg) {
        let packet = match Packet::encode(msg) {
            Ok(packet) => packet,
            Err(e) => {
                error!(round_id = %self.id, error = %e, "Failed to encode message");
                return;
            }
        };
        for peer in self.peers.iter_mut().filter(|p| p.connected) {
            if let Err(TransportError::Disconnected) = peer.transport.send_packet(packet.clone()) {
                peer.connected = false;
            }
        }
    }

    fn send_to(&mut self, player_id: Uuid, msg: &ServerMsg) {
        let packet = match Packet::encode(msg) {
            Ok(packet) => packet,
            Err(e) => {
                error!(round_id = %self.id, error = %e, "Failed to encode message");
                return;
            }
        };
        if let Some(peer) = self.peers.iter_mut().find(|p| p.player_id == player_id) {
            if let Err(TransportError::Disconnected) = peer.transport.send_packet(packet) {
                peer.connected = false;
            }
        }
    }
}
