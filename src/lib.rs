//! Golf round server - authoritative ball simulation and client sync
//!
//! The library holds everything the host binary and remote clients share:
//! - Terrain queries against per-hole collision geometry
//! - Wind model and the deterministic ball simulator
//! - Turn direction and scoring for a round of holes
//! - The wire protocol, transport contract and the client replica session

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod util;
pub mod ws;
