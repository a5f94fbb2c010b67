//! Typed ball events, queued during a tick and drained by the turn director

use std::collections::VecDeque;

use uuid::Uuid;

use super::terrain::Surface;
use super::Vec3;

/// What happened to a ball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallEventKind {
    /// First ground contact after leaving the tee/lie
    Landed,
    /// Ball went into a hazard or out of bounds and was dropped (one penalty stroke)
    Foul,
    /// Ball came to rest somewhere other than the hole
    TurnEnded,
    /// Ball came to rest in the hole
    Holed,
    /// Ball stopped on the green inside the round's gimme radius; holed
    /// with one conceded stroke
    Gimme,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BallEvent {
    pub ball_id: Uuid,
    pub kind: BallEventKind,
    pub position: Vec3,
    pub surface: Surface,
}

/// FIFO of events raised by the simulator during one tick
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<BallEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, event: BallEvent) {
        self.events.push_back(event);
    }

    /// Remove and yield all queued events in posting order
    pub fn drain(&mut self) -> impl Iterator<Item = BallEvent> + '_ {
        self.events.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
