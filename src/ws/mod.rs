//! WebSocket protocol and session bridge

pub mod handler;
pub mod protocol;
