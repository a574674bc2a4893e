// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::tracking::Chirality;

/// Environment variable consulted when no `--config` path is given.
pub const CONFIG_ENV_VAR: &str = "ROLL_A_BALL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hand: HandTrackingConfig,
    pub keyboard: KeyboardConfig,
    pub ball: BallConfig,
    pub session: SessionConfig,
    pub export: ExportConfig,
    pub sim: SimConfig,
}

/// Gesture and pointing tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandTrackingConfig {
    /// Hand that picks the ball up. The other hand points.
    pub pinching_hand: Chirality,
    pub move_force: f64,
    pub max_force: f64,
    pub pinch_threshold: f64,
    /// Must stay below `pinch_threshold` to keep a hysteresis band.
    pub pinch_release_threshold: f64,
    /// Meters between palm and ball for a pickup.
    pub pinch_distance: f64,
    /// Distance-only release happens beyond `pinch_distance * release_distance_factor`.
    pub release_distance_factor: f64,
    pub follow_smoothness: f64,
    pub required_present_frames: u32,
    pub hand_lost_frames_tolerance: u32,
    pub pointing_lost_frames_tolerance: u32,
    pub slowdown_rate: f64,
    pub stop_speed_epsilon: f64,
    /// Seconds after a release during which pointing is suppressed.
    pub release_grace_period: f64,
    pub drag_gain: f64,
    pub drag_speed_threshold: f64,
}

impl Default for HandTrackingConfig {
    fn default() -> Self {
        Self {
            pinching_hand: Chirality::Left,
            move_force: 8.0,
            max_force: 10.0,
            pinch_threshold: 0.5,          // Lowered from 0.8 for easier pinching
            pinch_release_threshold: 0.2,
            pinch_distance: 0.25,
            release_distance_factor: 1.5,
            follow_smoothness: 10.0,
            required_present_frames: 5,
            hand_lost_frames_tolerance: 30,
            pointing_lost_frames_tolerance: 15,
            slowdown_rate: 0.95,
            stop_speed_epsilon: 0.1,
            release_grace_period: 0.5,
            drag_gain: 0.05,
            drag_speed_threshold: 0.05,
        }
    }
}

impl HandTrackingConfig {
    pub fn pointing_hand(&self) -> Chirality {
        self.pinching_hand.opposite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub move_force: f64,
    /// Planar speed above which no more force is applied.
    pub max_speed: f64,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            move_force: 4.0,   // reduced from 8.0
            max_speed: 8.0,    // reduced from 15.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BallConfig {
    pub radius: f64,
    pub mass: f64,
    pub gravity: f64,
    /// Fraction of velocity lost per second, like a rigid body's drag.
    pub linear_damping: f64,
    pub spawn: [f64; 3],
}

impl Default for BallConfig {
    fn default() -> Self {
        Self {
            radius: 0.5,
            mass: 1.0,
            gravity: -9.81,
            linear_damping: 0.5,
            spawn: [0.0, 0.5, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    Manual,
    Random,
    Grid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub collectible_count: usize,
    pub placement: PlacementStrategy,
    pub manual_positions: Vec<[f64; 3]>,
    pub arena_radius: f64,
    pub min_collectible_spacing: f64,
    pub collectible_height: f64,
    /// Ball-to-collectible distance that counts as a pickup.
    pub pickup_radius: f64,
    /// Seeds placement and study order; a fresh seed is drawn when unset.
    pub seed: Option<u64>,
    pub study_time_limit_s: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            collectible_count: 12,
            placement: PlacementStrategy::Random,
            manual_positions: Vec::new(),
            arena_radius: 4.0,
            min_collectible_spacing: 1.5,
            collectible_height: 0.5,
            pickup_radius: 0.75,
            seed: None,
            study_time_limit_s: Some(180.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub output_directory: PathBuf,
    pub session_name: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_directory: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("RollABall")))
                .unwrap_or_else(|| PathBuf::from("./output")),
            session_name: None,
        }
    }
}

/// Headless driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub tick_rate_hz: f64,
    /// Drop the synthetic hand for `dropout_length_frames` every this many frames (0 disables).
    pub dropout_every_frames: u32,
    pub dropout_length_frames: u32,
    /// Hard stop for a phase that never completes.
    pub max_phase_seconds: f64,
    /// Carry every other collectible with a pinch instead of pointing at it.
    pub pinch_carry: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            dropout_every_frames: 90,
            dropout_length_frames: 6,
            max_phase_seconds: 240.0,
            pinch_carry: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Explicit path first, then `ROLL_A_BALL_CONFIG`, then defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(p) => Self::load(Path::new(&p)),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Returns the first invalid field, if any.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hand = &self.hand;
        if hand.pinch_release_threshold >= hand.pinch_threshold {
            return Err(ConfigError::Invalid(format!(
                "pinch_release_threshold ({}) must be below pinch_threshold ({})",
                hand.pinch_release_threshold, hand.pinch_threshold
            )));
        }
        if hand.pinch_distance <= 0.0 || hand.release_distance_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "pinch_distance must be > 0 and release_distance_factor >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&hand.slowdown_rate) {
            return Err(ConfigError::Invalid(format!(
                "slowdown_rate must be within [0, 1], got {}",
                hand.slowdown_rate
            )));
        }
        if hand.max_force <= 0.0 || hand.follow_smoothness <= 0.0 {
            return Err(ConfigError::Invalid(
                "max_force and follow_smoothness must be > 0".to_string(),
            ));
        }
        if self.keyboard.max_speed <= 0.0 {
            return Err(ConfigError::Invalid("keyboard.max_speed must be > 0".to_string()));
        }
        if self.ball.mass <= 0.0 || self.ball.radius <= 0.0 {
            return Err(ConfigError::Invalid("ball mass and radius must be > 0".to_string()));
        }
        if self.session.arena_radius <= 1.0 {
            return Err(ConfigError::Invalid("arena_radius must be > 1".to_string()));
        }
        if self.sim.tick_rate_hz <= 0.0 {
            return Err(ConfigError::Invalid("sim.tick_rate_hz must be > 0".to_string()));
        }
        if self.session.placement == PlacementStrategy::Manual
            && self.session.manual_positions.len() < self.session.collectible_count
        {
            warn!(
                "Manual placement with {} of {} positions, random placement will be used",
                self.session.manual_positions.len(),
                self.session.collectible_count
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hand.pointing_hand(), Chirality::Right);
        assert_eq!(config.hand.required_present_frames, 5);
    }

    #[test]
    fn test_inverted_hysteresis_rejected() {
        let mut config = Config::default();
        config.hand.pinch_release_threshold = 0.6;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "hand": { "pinch_threshold": 0.7 } }"#).unwrap();
        assert_eq!(config.hand.pinch_threshold, 0.7);
        assert_eq!(config.hand.pinch_release_threshold, 0.2);
        assert_eq!(config.keyboard.max_speed, 8.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.session.seed = Some(7);
        config.hand.pinching_hand = Chirality::Right;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.session.seed, Some(7));
        assert_eq!(loaded.hand.pointing_hand(), Chirality::Left);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Config::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
