//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{PhysicsConfig, RoundConfig, RoundRegistry, ScoringKind};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub physics: Arc<PhysicsConfig>,
    pub rounds: Arc<RoundRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let physics = Arc::new(config.physics.clone());

        Self {
            config: Arc::new(config),
            physics,
            rounds: Arc::new(RoundRegistry::new()),
        }
    }

    /// Round settings for a new round with the given scoring policy
    pub fn round_config(&self, scoring: ScoringKind) -> RoundConfig {
        RoundConfig {
            course_root: self.config.course_root.clone(),
            max_players: self.config.max_players,
            scoring,
            seed: rand::random(),
            ..RoundConfig::default()
        }
    }
}
