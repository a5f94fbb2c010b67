//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::game::physics::PhysicsConfigError;
use crate::game::PhysicsConfig;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Directory course identifiers resolve under
    pub course_root: PathBuf,
    /// Allowed client origins for CORS (comma separated, `*` for any)
    pub client_origin: String,
    /// Players per round
    pub max_players: usize,

    /// Physics tuning, defaults unless PHYSICS_CONFIG names a JSON file
    pub physics: PhysicsConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for hosted deployments
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let max_players = match env::var("MAX_PLAYERS") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid("MAX_PLAYERS"))?,
            Err(_) => 8,
        };

        let physics = match env::var("PHYSICS_CONFIG") {
            Ok(path) => load_physics(&PathBuf::from(path))?,
            Err(_) => PhysicsConfig::default(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            course_root: env::var("COURSE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("courses")),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            max_players,

            physics,
        })
    }
}

/// Read and validate a physics tuning file. Missing fields keep their defaults.
pub fn load_physics(path: &PathBuf) -> Result<PhysicsConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::PhysicsFile {
        path: path.clone(),
        source,
    })?;
    let physics: PhysicsConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::PhysicsMalformed(e.to_string()))?;
    physics.validate()?;
    Ok(physics)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Cannot read physics config {}: {source}", .path.display())]
    PhysicsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed physics config: {0}")]
    PhysicsMalformed(String),

    #[error("Invalid physics config: {0}")]
    PhysicsInvalid(#[from] PhysicsConfigError),
}
