//! Turn and hole sequencing for a round
//!
//! The director owns every player's ball and per-hole record. It consumes
//! ball events drained from the tick's event queue, decides who plays next
//! and when a hole resolves, and consults the scoring policy at resolution.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ball::{Ball, BallSync};
use super::events::{BallEvent, BallEventKind};
use super::hole::{Course, HoleData};
use super::scoring::{HoleResult, ScoringKind, ScoringPolicy};
use super::terrain::Surface;
use super::Vec3;

/// Hard cap on strokes per hole for every scoring policy
pub const MAX_STROKES: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolePhase {
    TeeOffPending,
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Holed,
    /// Reached the stroke limit
    Forfeited,
    /// Could no longer beat a score already holed
    Retired,
}

/// One player's progress on one hole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub player_id: Uuid,
    pub hole: usize,
    pub strokes: u8,
    /// Provisional score under the round's policy; final once resolved
    pub score: i32,
    pub terminal: Option<Termination>,
    pub distance_to_pin: f32,
    pub last_surface: Surface,
}

impl TurnRecord {
    fn open(player_id: Uuid, hole: usize, data: &HoleData) -> Self {
        Self {
            player_id,
            hole,
            strokes: 0,
            score: 0,
            terminal: None,
            distance_to_pin: data.distance_to_pin(&data.tee),
            last_surface: data.tee_surface(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }
}

/// Running total for the leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: Uuid,
    pub name: String,
    pub total: i32,
    pub strokes: u32,
}

#[derive(Debug)]
struct PlayerSlot {
    id: Uuid,
    name: String,
    ball: Ball,
    record: TurnRecord,
    history: Vec<TurnRecord>,
    total: i32,
    join_order: u64,
}

impl PlayerSlot {
    fn total_strokes(&self) -> u32 {
        self.history.iter().map(|r| r.strokes as u32).sum::<u32>() + self.record.strokes as u32
    }

    fn previous_hole_strokes(&self) -> u8 {
        self.history.last().map(|r| r.strokes).unwrap_or(0)
    }
}

/// What the round loop needs to tell connected players
#[derive(Debug, Clone, PartialEq)]
pub enum DirectorOutcome {
    Landed {
        player_id: Uuid,
        position: Vec3,
        surface: Surface,
    },
    TurnEnded {
        player_id: Uuid,
        ball: BallSync,
        strokes: u8,
        score_delta: i32,
        penalty: bool,
    },
    Holed {
        player_id: Uuid,
        ball: BallSync,
        strokes: u8,
        score_delta: i32,
        gimme: bool,
    },
    MaxStrokes {
        player_id: Uuid,
    },
    Retired {
        player_id: Uuid,
        strokes: u8,
    },
    TurnChanged {
        player_id: Uuid,
    },
    HoleResolved {
        hole: usize,
        scores: Vec<(Uuid, i32)>,
    },
    HoleStarted {
        hole: usize,
    },
    RoundComplete {
        standings: Vec<Standing>,
    },
}

#[derive(Debug)]
pub struct TurnDirector {
    holes: Vec<Arc<HoleData>>,
    current_hole: usize,
    phase: HolePhase,
    players: Vec<PlayerSlot>,
    active: Option<Uuid>,
    scoring: Box<dyn ScoringPolicy>,
    /// Players whose ball fouled since its last rest
    penalised: HashSet<Uuid>,
    next_join: u64,
    started: bool,
    complete: bool,
    /// Scoring settled the round before its last hole
    decided: bool,
}

impl TurnDirector {
    pub fn new(course: &Course, scoring: Box<dyn ScoringPolicy>) -> Self {
        Self {
            holes: course.holes.clone(),
            current_hole: 0,
            phase: HolePhase::TeeOffPending,
            players: Vec::new(),
            active: None,
            scoring,
            penalised: HashSet::new(),
            next_join: 0,
            started: false,
            complete: false,
            decided: false,
        }
    }

    pub fn hole(&self) -> &Arc<HoleData> {
        &self.holes[self.current_hole]
    }

    pub fn hole_index(&self) -> usize {
        self.current_hole
    }

    pub fn hole_count(&self) -> usize {
        self.holes.len()
    }

    pub fn phase(&self) -> HolePhase {
        self.phase
    }

    pub fn scoring_kind(&self) -> ScoringKind {
        self.scoring.kind()
    }

    pub fn active_player(&self) -> Option<Uuid> {
        self.active
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn has_player(&self, id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn player_name(&self, id: Uuid) -> Option<&str> {
        self.slot(id).map(|p| p.name.as_str())
    }

    /// Stroke limit for the current hole
    pub fn max_strokes(&self) -> u8 {
        self.scoring
            .max_strokes(self.hole().par)
            .map_or(MAX_STROKES, |cap| cap.min(MAX_STROKES))
    }

    pub fn ball(&self, id: Uuid) -> Option<&Ball> {
        self.slot(id).map(|p| &p.ball)
    }

    pub fn ball_mut(&mut self, id: Uuid) -> Option<&mut Ball> {
        self.players.iter_mut().find(|p| p.id == id).map(|p| &mut p.ball)
    }

    pub fn balls(&self) -> impl Iterator<Item = &Ball> {
        self.players.iter().map(|p| &p.ball)
    }

    pub fn balls_mut(&mut self) -> impl Iterator<Item = &mut Ball> {
        self.players.iter_mut().map(|p| &mut p.ball)
    }

    pub fn any_ball_moving(&self) -> bool {
        self.balls().any(|b| b.state.is_moving())
    }

    pub fn record(&self, id: Uuid) -> Option<&TurnRecord> {
        self.slot(id).map(|p| &p.record)
    }

    pub fn records(&self) -> impl Iterator<Item = &TurnRecord> {
        self.players.iter().map(|p| &p.record)
    }

    fn slot(&self, id: Uuid) -> Option<&PlayerSlot> {
        self.players.iter().find(|p| p.id == id)
    }

    fn slot_mut(&mut self, id: Uuid) -> Option<&mut PlayerSlot> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Add a player with a ball on the current tee. Returns false if the
    /// player is already in the round.
    pub fn add_player(&mut self, id: Uuid, name: String) -> bool {
        if self.has_player(id) {
            return false;
        }

        let hole = self.hole().clone();
        self.players.push(PlayerSlot {
            id,
            name,
            ball: Ball::new(id, hole.tee, hole.tee_surface()),
            record: TurnRecord::open(id, self.current_hole, &hole),
            history: Vec::new(),
            total: 0,
            join_order: self.next_join,
        });
        self.next_join += 1;

        if self.started && !self.complete && self.active.is_none() && self.phase != HolePhase::Resolved {
            self.active = Some(id);
        }
        true
    }

    /// Remove a player; passes the turn or resolves the hole if needed
    pub fn remove_player(&mut self, id: Uuid) -> Vec<DirectorOutcome> {
        let before = self.players.len();
        self.players.retain(|p| p.id != id);
        self.penalised.remove(&id);
        if self.players.len() == before {
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        if self.started && !self.complete && self.active == Some(id) {
            self.active = None;
            self.pass_turn(&mut outcomes);
        }
        outcomes
    }

    /// Open the first hole. The first player to join has the honour.
    pub fn begin_round(&mut self) -> Vec<DirectorOutcome> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        self.phase = HolePhase::TeeOffPending;
        self.active = self
            .players
            .iter()
            .min_by_key(|p| p.join_order)
            .map(|p| p.id);

        let mut outcomes = vec![DirectorOutcome::HoleStarted {
            hole: self.current_hole,
        }];
        if let Some(player_id) = self.active {
            outcomes.push(DirectorOutcome::TurnChanged { player_id });
        }
        outcomes
    }

    /// Whether `id` may strike their ball now
    pub fn can_shoot(&self, id: Uuid) -> bool {
        self.started
            && !self.complete
            && self.phase != HolePhase::Resolved
            && self.active == Some(id)
            && self.record(id).is_some_and(|r| !r.is_finished())
    }

    /// Note that the active player's shot was accepted
    pub fn shot_taken(&mut self, id: Uuid) {
        if self.active == Some(id) && self.phase == HolePhase::TeeOffPending {
            self.phase = HolePhase::InProgress;
        }
    }

    /// Apply one ball event and report what changed
    pub fn handle_event(&mut self, event: &BallEvent) -> Vec<DirectorOutcome> {
        let mut outcomes = Vec::new();
        if self.phase == HolePhase::Resolved || !self.has_player(event.ball_id) {
            return outcomes;
        }

        let par = self.hole().par;
        let limit = self.max_strokes();
        let pin_distance = self.hole().distance_to_pin(&event.position);
        let player_id = event.ball_id;

        match event.kind {
            BallEventKind::Landed => {
                outcomes.push(DirectorOutcome::Landed {
                    player_id,
                    position: event.position,
                    surface: event.surface,
                });
                return outcomes;
            }
            BallEventKind::Foul => {
                self.penalised.insert(player_id);
                return outcomes;
            }
            BallEventKind::TurnEnded | BallEventKind::Holed | BallEventKind::Gimme => {}
        }

        let penalty = self.penalised.remove(&player_id);
        let scoring = &self.scoring;
        let Some(slot) = self.players.iter_mut().find(|p| p.id == player_id) else {
            return outcomes;
        };

        let gimme = event.kind == BallEventKind::Gimme;
        let holed = gimme || event.kind == BallEventKind::Holed;
        // a gimme concedes the next putt
        let added = 1 + u8::from(penalty) + u8::from(gimme);
        let record = &mut slot.record;
        let previous_score = record.score;
        record.strokes = record.strokes.saturating_add(added);
        record.distance_to_pin = pin_distance;
        record.last_surface = event.surface;

        if holed {
            record.terminal = Some(Termination::Holed);
        } else if record.strokes >= limit {
            record.terminal = Some(Termination::Forfeited);
            record.strokes = record.strokes.saturating_add(scoring.forfeit_penalty());
        }
        record.score = scoring.hole_score(par, record.strokes);

        let strokes = record.strokes;
        let score_delta = record.score - previous_score;
        let forfeited = record.terminal == Some(Termination::Forfeited);
        let ball = slot.ball.sync();

        if holed {
            outcomes.push(DirectorOutcome::Holed {
                player_id,
                ball,
                strokes,
                score_delta,
                gimme,
            });
        } else {
            outcomes.push(DirectorOutcome::TurnEnded {
                player_id,
                ball,
                strokes,
                score_delta,
                penalty,
            });
        }
        if forfeited {
            tracing::info!(player_id = %player_id, strokes, "Stroke limit reached");
            outcomes.push(DirectorOutcome::MaxStrokes { player_id });
        }
        if self.scoring.retires_beaten_players() {
            self.retire_beaten(&mut outcomes);
        }

        if self.active == Some(player_id) {
            self.pass_turn(&mut outcomes);
        }
        outcomes
    }

    /// Retire every unfinished player whose strokes already match the best
    /// holed score; they take one more stroke and can no longer win the hole
    fn retire_beaten(&mut self, outcomes: &mut Vec<DirectorOutcome>) {
        let Some(best) = self
            .players
            .iter()
            .filter(|p| p.record.terminal == Some(Termination::Holed))
            .map(|p| p.record.strokes)
            .min()
        else {
            return;
        };

        let par = self.hole().par;
        for slot in &mut self.players {
            let record = &mut slot.record;
            if record.is_finished() || record.strokes < best {
                continue;
            }
            record.terminal = Some(Termination::Retired);
            record.strokes = record.strokes.saturating_add(1);
            record.score = self.scoring.hole_score(par, record.strokes);
            tracing::debug!(player_id = %slot.id, strokes = record.strokes, best, "Player retired from hole");
            outcomes.push(DirectorOutcome::Retired {
                player_id: slot.id,
                strokes: record.strokes,
            });
        }
    }

    /// Next player is the unfinished one furthest from the pin
    fn pass_turn(&mut self, outcomes: &mut Vec<DirectorOutcome>) {
        let next = self
            .players
            .iter()
            .filter(|p| !p.record.is_finished())
            .max_by(|a, b| {
                a.record
                    .distance_to_pin
                    .total_cmp(&b.record.distance_to_pin)
                    .then(b.join_order.cmp(&a.join_order))
            })
            .map(|p| p.id);

        match next {
            Some(player_id) => {
                self.active = Some(player_id);
                outcomes.push(DirectorOutcome::TurnChanged { player_id });
            }
            None => {
                self.active = None;
                self.resolve_hole(outcomes);
            }
        }
    }

    fn resolve_hole(&mut self, outcomes: &mut Vec<DirectorOutcome>) {
        let par = self.hole().par;
        let results: Vec<_> = self
            .players
            .iter()
            .map(|p| HoleResult {
                player_id: p.id,
                strokes: p.record.strokes,
                forfeited: p.record.terminal != Some(Termination::Holed),
            })
            .collect();

        let scores = self.scoring.resolve_hole(par, &results);
        for (player_id, score) in &scores {
            if let Some(slot) = self.slot_mut(*player_id) {
                slot.record.score = *score;
                slot.total += *score;
            }
        }

        let holes_left = self.holes.len() - self.current_hole - 1;
        let totals: Vec<i32> = self.players.iter().map(|p| p.total).collect();
        if holes_left > 0 && self.scoring.round_decided(&totals, holes_left) {
            tracing::info!(hole = self.current_hole, holes_left, "Round decided early");
            self.decided = true;
        }

        self.phase = HolePhase::Resolved;
        tracing::info!(hole = self.current_hole, "Hole resolved");
        outcomes.push(DirectorOutcome::HoleResolved {
            hole: self.current_hole,
            scores,
        });
    }

    /// Move to the next hole, or finish the round after the last one.
    ///
    /// Returns `None` while the hole is unresolved or any ball is still
    /// moving; the terrain must not change under a ball in play.
    pub fn advance_hole(&mut self) -> Option<Vec<DirectorOutcome>> {
        if self.phase != HolePhase::Resolved || self.any_ball_moving() || self.complete {
            return None;
        }

        if self.decided || self.current_hole + 1 >= self.holes.len() {
            self.complete = true;
            return Some(vec![DirectorOutcome::RoundComplete {
                standings: self.standings(),
            }]);
        }

        self.current_hole += 1;
        let hole = self.hole().clone();
        let index = self.current_hole;
        for slot in &mut self.players {
            let finished = std::mem::replace(&mut slot.record, TurnRecord::open(slot.id, index, &hole));
            slot.history.push(finished);
            slot.ball.place(hole.tee, hole.tee_surface());
        }
        self.penalised.clear();
        self.phase = HolePhase::TeeOffPending;

        // honour: lowest score on the previous hole
        self.active = self
            .players
            .iter()
            .min_by_key(|p| (p.previous_hole_strokes(), p.join_order))
            .map(|p| p.id);

        let mut outcomes = vec![DirectorOutcome::HoleStarted { hole: index }];
        if let Some(player_id) = self.active {
            outcomes.push(DirectorOutcome::TurnChanged { player_id });
        }
        Some(outcomes)
    }

    /// Leaderboard, best first
    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<_> = self
            .players
            .iter()
            .map(|p| Standing {
                player_id: p.id,
                name: p.name.clone(),
                total: p.total,
                strokes: p.total_strokes(),
            })
            .collect();

        if self.scoring.lower_is_better() {
            standings.sort_by_key(|s| s.total);
        } else {
            standings.sort_by_key(|s| std::cmp::Reverse(s.total));
        }
        standings
    }
}
