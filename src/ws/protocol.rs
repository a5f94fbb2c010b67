//! Wire message definitions
//! These are the payload types carried by transport packets

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::ball::BallSync;
use crate::game::round::RoundPhase;
use crate::game::turn::{Standing, TurnRecord};
use crate::game::{HoleData, ScoringKind, ShotCommand, Surface, Vec3};
use crate::net::transport::{
    PacketId, Reliability, WireMessage, CHANNEL_EVENTS, CHANNEL_STATE, CHANNEL_TEXT,
};

/// Messages sent from client to host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Round owner selects the course (lobby only)
    MapInfo {
        /// Course directory identifier
        course: String,
    },

    /// Round owner starts play (lobby only)
    StartRound,

    /// Strike the ball
    ShotInput { shot: ShotCommand },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the round
    Leave,
}

impl WireMessage for ClientMsg {
    fn packet_id(&self) -> PacketId {
        match self {
            ClientMsg::MapInfo { .. } => PacketId::MapInfo,
            ClientMsg::StartRound => PacketId::StartRound,
            ClientMsg::ShotInput { .. } => PacketId::ShotInput,
            ClientMsg::Ping { .. } => PacketId::Ping,
            ClientMsg::Leave => PacketId::Leave,
        }
    }

    fn channel(&self) -> u8 {
        match self {
            ClientMsg::MapInfo { .. } => CHANNEL_TEXT,
            _ => CHANNEL_EVENTS,
        }
    }
}

/// Messages sent from host to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// First message after connecting
    Welcome {
        player_id: Uuid,
        round_id: Uuid,
        server_time: u64,
        /// Whether this player may choose the course and start the round
        owner: bool,
    },

    /// Course selected for the round
    MapInfo {
        course: String,
        title: String,
        hole_count: usize,
        /// Balls at rest on the green this close to the pin are conceded (m)
        #[serde(default)]
        gimme_radius: f32,
    },

    /// Full round state for a player joining after setup
    RoundState {
        phase: RoundPhase,
        course: String,
        scoring: ScoringKind,
        hole: HoleView,
        players: Vec<PlayerView>,
        active_player: Option<Uuid>,
        /// Packed current wind (dir.x, strength, dir.z)
        wind: Vec3,
        wind_target: Vec3,
        /// Sequence the next snapshot will exceed
        seq: u32,
    },

    PlayerJoined {
        player_id: Uuid,
        name: String,
    },

    PlayerLeft {
        player_id: Uuid,
        reason: String,
    },

    /// A new hole is in play; every ball sits on the tee
    HoleChanged {
        hole: HoleView,
        balls: Vec<BallSync>,
    },

    TurnChanged {
        player_id: Uuid,
    },

    /// Throttled in-flight ball state
    BallSnapshot {
        seq: u32,
        tick: u64,
        ball: BallSync,
    },

    /// First ground contact of a shot
    Landed {
        player_id: Uuid,
        position: Vec3,
        surface: Surface,
    },

    /// A stroke finished; carries the full resulting ball state
    TurnEvent {
        seq: u32,
        kind: TurnEventKind,
        player_id: Uuid,
        ball: BallSync,
        strokes: u8,
        score_delta: i32,
        penalty: bool,
    },

    MaxStrokes {
        player_id: Uuid,
    },

    /// Player can no longer beat the best holed score and is out of the hole
    Retired {
        player_id: Uuid,
        strokes: u8,
    },

    /// Packed wind target, sent when it is forced to change
    WindTarget {
        target: Vec3,
    },

    /// Packed current wind for display
    Wind {
        vector: Vec3,
    },

    HoleResolved {
        hole: usize,
        scores: Vec<PlayerScore>,
    },

    RoundComplete {
        standings: Vec<Standing>,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl WireMessage for ServerMsg {
    fn packet_id(&self) -> PacketId {
        match self {
            ServerMsg::Welcome { .. } => PacketId::Welcome,
            ServerMsg::MapInfo { .. } => PacketId::MapInfo,
            ServerMsg::RoundState { .. } => PacketId::RoundState,
            ServerMsg::PlayerJoined { .. } => PacketId::PlayerJoined,
            ServerMsg::PlayerLeft { .. } => PacketId::PlayerLeft,
            ServerMsg::HoleChanged { .. } => PacketId::HoleChanged,
            ServerMsg::TurnChanged { .. } => PacketId::TurnChanged,
            ServerMsg::BallSnapshot { .. } => PacketId::BallSnapshot,
            ServerMsg::Landed { .. } => PacketId::Landed,
            ServerMsg::TurnEvent { .. } => PacketId::TurnEvent,
            ServerMsg::MaxStrokes { .. } => PacketId::MaxStrokes,
            ServerMsg::Retired { .. } => PacketId::Retired,
            ServerMsg::WindTarget { .. } => PacketId::WindTarget,
            ServerMsg::Wind { .. } => PacketId::Wind,
            ServerMsg::HoleResolved { .. } => PacketId::HoleResolved,
            ServerMsg::RoundComplete { .. } => PacketId::RoundComplete,
            ServerMsg::Error { .. } => PacketId::Error,
            ServerMsg::Pong { .. } => PacketId::Pong,
        }
    }

    fn reliability(&self) -> Reliability {
        match self {
            ServerMsg::BallSnapshot { .. } | ServerMsg::Wind { .. } => Reliability::Unreliable,
            _ => Reliability::Reliable,
        }
    }

    fn channel(&self) -> u8 {
        match self {
            ServerMsg::BallSnapshot { .. } | ServerMsg::Wind { .. } => CHANNEL_STATE,
            ServerMsg::Welcome { .. }
            | ServerMsg::MapInfo { .. }
            | ServerMsg::PlayerJoined { .. }
            | ServerMsg::PlayerLeft { .. }
            | ServerMsg::Error { .. } => CHANNEL_TEXT,
            _ => CHANNEL_EVENTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEventKind {
    TurnEnded,
    Holed,
    /// Holed by concession from inside the gimme radius
    Gimme,
}

/// Static hole data a client needs alongside its own copy of the geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoleView {
    pub index: usize,
    pub par: u8,
    pub tee: Vec3,
    pub pin: Vec3,
    pub target: Vec3,
}

impl HoleView {
    pub fn new(index: usize, hole: &HoleData) -> Self {
        Self {
            index,
            par: hole.par,
            tee: hole.tee,
            pin: hole.pin,
            target: hole.target,
        }
    }
}

/// One player as seen by a late joiner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub record: TurnRecord,
    pub ball: BallSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: Uuid,
    pub score: i32,
}
