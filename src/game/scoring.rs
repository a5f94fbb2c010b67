//! Pluggable scoring policies, consulted when a hole resolves

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One player's finished hole
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoleResult {
    pub player_id: Uuid,
    pub strokes: u8,
    pub forfeited: bool,
}

pub trait ScoringPolicy: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ScoringKind;

    /// Ranking direction of accumulated totals
    fn lower_is_better(&self) -> bool;

    /// Stroke count at which a player forfeits the hole, if the policy caps it
    fn max_strokes(&self, _par: u8) -> Option<u8> {
        None
    }

    /// Strokes added on top of the limit when a player forfeits
    fn forfeit_penalty(&self) -> u8 {
        0
    }

    /// Whether a player who can no longer beat a score already holed is
    /// retired from the hole
    fn retires_beaten_players(&self) -> bool {
        false
    }

    /// Whether the round is settled with `holes_left` still unplayed
    fn round_decided(&self, _totals: &[i32], _holes_left: usize) -> bool {
        false
    }

    /// Provisional score for `strokes` taken so far on a hole
    fn hole_score(&self, par: u8, strokes: u8) -> i32;

    /// Final per-player scores once every player has finished the hole
    fn resolve_hole(&mut self, par: u8, results: &[HoleResult]) -> Vec<(Uuid, i32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringKind {
    #[default]
    StrokePlay,
    Stableford,
    Skins,
    MatchPlay,
}

impl ScoringKind {
    pub fn policy(self) -> Box<dyn ScoringPolicy> {
        match self {
            ScoringKind::StrokePlay => Box::new(StrokePlay),
            ScoringKind::Stableford => Box::new(Stableford),
            ScoringKind::Skins => Box::new(Skins::default()),
            ScoringKind::MatchPlay => Box::new(MatchPlay),
        }
    }
}

/// Total strokes, lowest wins
#[derive(Debug, Default)]
pub struct StrokePlay;

impl ScoringPolicy for StrokePlay {
    fn kind(&self) -> ScoringKind {
        ScoringKind::StrokePlay
    }

    fn lower_is_better(&self) -> bool {
        true
    }

    fn hole_score(&self, _par: u8, strokes: u8) -> i32 {
        strokes as i32
    }

    fn resolve_hole(&mut self, par: u8, results: &[HoleResult]) -> Vec<(Uuid, i32)> {
        results
            .iter()
            .map(|r| (r.player_id, self.hole_score(par, r.strokes)))
            .collect()
    }
}

/// Points relative to par; a player who can no longer score picks up
#[derive(Debug, Default)]
pub struct Stableford;

impl ScoringPolicy for Stableford {
    fn kind(&self) -> ScoringKind {
        ScoringKind::Stableford
    }

    fn lower_is_better(&self) -> bool {
        false
    }

    fn max_strokes(&self, par: u8) -> Option<u8> {
        Some(par.saturating_add(1))
    }

    fn forfeit_penalty(&self) -> u8 {
        1
    }

    fn hole_score(&self, par: u8, strokes: u8) -> i32 {
        (2 + par as i32 - strokes as i32).max(0)
    }

    fn resolve_hole(&mut self, par: u8, results: &[HoleResult]) -> Vec<(Uuid, i32)> {
        results
            .iter()
            .map(|r| {
                let points = if r.forfeited {
                    0
                } else {
                    self.hole_score(par, r.strokes)
                };
                (r.player_id, points)
            })
            .collect()
    }
}

/// Outright lowest score on a hole wins the pot; a tie carries it over
#[derive(Debug)]
pub struct Skins {
    pot: i32,
}

impl Default for Skins {
    fn default() -> Self {
        Self { pot: 1 }
    }
}

impl Skins {
    pub fn pot(&self) -> i32 {
        self.pot
    }
}

impl ScoringPolicy for Skins {
    fn kind(&self) -> ScoringKind {
        ScoringKind::Skins
    }

    fn lower_is_better(&self) -> bool {
        false
    }

    fn retires_beaten_players(&self) -> bool {
        true
    }

    fn hole_score(&self, _par: u8, _strokes: u8) -> i32 {
        0
    }

    fn resolve_hole(&mut self, _par: u8, results: &[HoleResult]) -> Vec<(Uuid, i32)> {
        let winner = outright_winner(results);
        let scores = results
            .iter()
            .map(|r| {
                let won = if Some(r.player_id) == winner { self.pot } else { 0 };
                (r.player_id, won)
            })
            .collect();

        if winner.is_some() {
            self.pot = 1;
        } else {
            self.pot += 1;
        }
        scores
    }
}

/// One point per hole won outright; the round ends once the leader cannot
/// be caught
#[derive(Debug, Default)]
pub struct MatchPlay;

impl ScoringPolicy for MatchPlay {
    fn kind(&self) -> ScoringKind {
        ScoringKind::MatchPlay
    }

    fn lower_is_better(&self) -> bool {
        false
    }

    fn retires_beaten_players(&self) -> bool {
        true
    }

    fn round_decided(&self, totals: &[i32], holes_left: usize) -> bool {
        let mut ranked = totals.to_vec();
        ranked.sort_unstable_by(|a, b| b.cmp(a));
        match ranked.as_slice() {
            [leader, second, ..] => (*second as i64) + (holes_left as i64) < *leader as i64,
            _ => false,
        }
    }

    fn hole_score(&self, _par: u8, _strokes: u8) -> i32 {
        0
    }

    fn resolve_hole(&mut self, _par: u8, results: &[HoleResult]) -> Vec<(Uuid, i32)> {
        let winner = outright_winner(results);
        results
            .iter()
            .map(|r| (r.player_id, i32::from(Some(r.player_id) == winner)))
            .collect()
    }
}

/// Sole player with the fewest strokes among those who did not forfeit
fn outright_winner(results: &[HoleResult]) -> Option<Uuid> {
    let best = results
        .iter()
        .filter(|r| !r.forfeited)
        .map(|r| r.strokes)
        .min()?;

    let mut winners = results
        .iter()
        .filter(|r| !r.forfeited && r.strokes == best);
    match (winners.next(), winners.next()) {
        (Some(only), None) => Some(only.player_id),
        _ => None,
    }
}
