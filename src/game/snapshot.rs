//! Snapshot throttling on the host and stale-snapshot filtering on clients

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::ball::Ball;

/// Builds ball snapshots for network transmission.
///
/// Snapshots and turn events draw from one sequence counter so a receiver can
/// discard any snapshot that predates the last event it applied.
#[derive(Debug)]
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
    sequence: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            sequence: 0,
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used when a shot starts)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Allocate the next sequence number
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    pub fn current_sequence(&self) -> u32 {
        self.sequence
    }

    /// One snapshot per moving ball
    pub fn build<'a>(&mut self, tick: u64, balls: impl Iterator<Item = &'a Ball>) -> Vec<ServerMsg> {
        balls
            .filter(|ball| ball.state.is_moving())
            .map(|ball| ServerMsg::BallSnapshot {
                seq: self.next_sequence(),
                tick,
                ball: ball.sync(),
            })
            .collect()
    }
}

/// Client-side ordering guard for unreliable snapshots
#[derive(Debug, Default)]
pub struct SnapshotFilter {
    last_applied: HashMap<Uuid, u32>,
    /// Balls being played out locally; snapshots are ignored until the next event
    suspended: HashSet<Uuid>,
    dropped: u64,
}

impl SnapshotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot for `ball` with `seq` should be applied
    pub fn accept(&mut self, ball: Uuid, seq: u32) -> bool {
        if self.suspended.contains(&ball) {
            self.dropped += 1;
            return false;
        }
        if let Some(&last) = self.last_applied.get(&ball) {
            if seq <= last {
                self.dropped += 1;
                return false;
            }
        }
        self.last_applied.insert(ball, seq);
        true
    }

    /// A reliable event for `ball` was applied at `seq`
    pub fn observe_event(&mut self, ball: Uuid, seq: u32) {
        self.suspended.remove(&ball);
        let last = self.last_applied.entry(ball).or_insert(seq);
        *last = (*last).max(seq);
    }

    pub fn suspend(&mut self, ball: Uuid) {
        self.suspended.insert(ball);
    }

    /// Raise the floor for every ball (e.g. from a full state message)
    pub fn set_floor(&mut self, ball: Uuid, seq: u32) {
        self.last_applied.insert(ball, seq);
    }

    pub fn reset(&mut self) {
        self.suspended.clear();
    }

    /// Snapshots discarded as stale or suspended
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{BallState, Surface, Vec3};

    #[test]
    fn throttles_to_interval() {
        let mut builder = SnapshotBuilder::new(6);
        let sent = (0..60).filter(|_| builder.should_send()).count();
        assert_eq!(sent, 10);

        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn only_moving_balls_are_snapshotted() {
        let mut builder = SnapshotBuilder::new(1);
        let idle = Ball::new(Uuid::new_v4(), Vec3::zeros(), Surface::Fairway);
        let mut moving = idle.clone();
        moving.id = Uuid::new_v4();
        moving.state = BallState::Flight;

        let msgs = builder.build(12, [&idle, &moving].into_iter());
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            &msgs[0],
            ServerMsg::BallSnapshot { seq: 1, tick: 12, ball } if ball.id == moving.id
        ));
    }

    #[test]
    fn stale_and_duplicate_snapshots_are_discarded() {
        let ball = Uuid::new_v4();
        let mut filter = SnapshotFilter::new();
        assert!(filter.accept(ball, 5));
        assert!(!filter.accept(ball, 5));
        assert!(!filter.accept(ball, 3));
        assert!(filter.accept(ball, 6));

        filter.observe_event(ball, 9);
        assert!(!filter.accept(ball, 8));
        assert!(filter.accept(ball, 10));
        assert_eq!(filter.dropped(), 3);
    }

    #[test]
    fn suspended_ball_waits_for_next_event() {
        let ball = Uuid::new_v4();
        let mut filter = SnapshotFilter::new();
        filter.suspend(ball);
        assert!(!filter.accept(ball, 1));
        filter.observe_event(ball, 2);
        assert!(filter.accept(ball, 3));
    }
}
