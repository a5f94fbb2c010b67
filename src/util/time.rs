//! Clocks and tick rates shared by the host loop and client replicas

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Fixed simulation rate of every round (Hz)
pub const SIMULATION_TPS: u32 = 60;

/// Ball snapshots per second while a ball is moving
pub const SNAPSHOT_TPS: u32 = 10;

/// Current-wind broadcasts per second
pub const WIND_SYNC_TPS: u32 = 1;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Wall clock in milliseconds; stamps welcomes and pings
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Mark process start for `/health`
pub fn init_server_time() {
    STARTED.get_or_init(Instant::now);
}

pub fn uptime_secs() -> u64 {
    STARTED.get().map_or(0, |start| start.elapsed().as_secs())
}

/// Simulated seconds per tick
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Wall-clock period of a round's tick loop
pub fn tick_period() -> Duration {
    Duration::from_secs(1) / SIMULATION_TPS
}

/// Ticks between two sends of a stream running at `rate` Hz
pub fn ticks_between(rate: u32) -> u32 {
    (SIMULATION_TPS / rate.max(1)).max(1)
}
