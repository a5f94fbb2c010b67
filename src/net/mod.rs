//! Packet transport used between the round host and its peers

pub mod loopback;
pub mod transport;

pub use loopback::{LoopbackEnd, LoopbackReceiver, LoopbackSender};
pub use transport::{
    send_message, Packet, PacketId, Reliability, Transport, TransportError, WireMessage,
};
