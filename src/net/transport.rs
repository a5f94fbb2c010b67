//! Transport contract between the authoritative host and its peers
//!
//! Packets carry a message id, a serialized payload, a reliability class and
//! an opaque channel number. Reliable packets arrive once and in send order;
//! unreliable packets may be dropped or reordered.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Ball snapshots and wind display
pub const CHANNEL_STATE: u8 = 0;
/// Discrete game events
pub const CHANNEL_EVENTS: u8 = 1;
/// String payloads (course identifiers, diagnostics, names)
pub const CHANNEL_TEXT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Packet catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketId {
    // client -> host
    StartRound,
    ShotInput,
    Ping,
    Leave,
    // both directions
    MapInfo,
    // host -> client
    Welcome,
    RoundState,
    PlayerJoined,
    PlayerLeft,
    HoleChanged,
    TurnChanged,
    BallSnapshot,
    Landed,
    TurnEvent,
    MaxStrokes,
    Retired,
    WindTarget,
    Wind,
    HoleResolved,
    RoundComplete,
    Error,
    Pong,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("failed to encode {id:?}: {source}")]
    Encode {
        id: PacketId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {id:?}: {source}")]
    Decode {
        id: PacketId,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Only a lost connection ends the session; codec failures drop one packet
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

/// A message that knows how it travels
pub trait WireMessage: Serialize + DeserializeOwned {
    fn packet_id(&self) -> PacketId;

    fn reliability(&self) -> Reliability {
        Reliability::Reliable
    }

    fn channel(&self) -> u8 {
        CHANNEL_EVENTS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: PacketId,
    pub payload: Vec<u8>,
    pub reliability: Reliability,
    pub channel: u8,
}

impl Packet {
    pub fn encode<M: WireMessage>(msg: &M) -> Result<Self, TransportError> {
        let id = msg.packet_id();
        let payload = serde_json::to_vec(msg).map_err(|source| TransportError::Encode { id, source })?;
        Ok(Self {
            id,
            payload,
            reliability: msg.reliability(),
            channel: msg.channel(),
        })
    }

    pub fn decode<M: WireMessage>(&self) -> Result<M, TransportError> {
        serde_json::from_slice(&self.payload).map_err(|source| TransportError::Decode {
            id: self.id,
            source,
        })
    }
}

/// Send is fire-and-forget and receive is a non-blocking poll, so neither
/// can stall a simulation tick.
pub trait Transport: Send {
    fn send_packet(&self, packet: Packet) -> Result<(), TransportError>;

    /// Everything received since the last poll, in arrival order. Returns
    /// `Disconnected` once the peer is gone and nothing is left queued.
    fn poll(&mut self) -> Result<Vec<Packet>, TransportError>;
}

/// Encode and send one message
pub fn send_message<M: WireMessage>(transport: &dyn Transport, msg: &M) -> Result<(), TransportError> {
    transport.send_packet(Packet::encode(msg)?)
}
