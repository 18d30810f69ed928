use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    chassis::{DrivetrainGeometry, MotionSettings, TeleopSettings},
    control::{ControllerGains, millis},
    sim::SimulationSettings,
};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "HELM";

/// Everything the runner reads from configuration. Every section falls back
/// to the reference robot when omitted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub drivetrain: DrivetrainGeometry,
    pub lateral: ControllerGains,
    pub angular: ControllerGains,
    pub motion: MotionSettings,
    pub teleop: TeleopSettings,
    pub simulation: SimulationSettings,
    /// Motions run in order during the autonomous period.
    pub route: Vec<RouteStep>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            drivetrain: DrivetrainGeometry::default(),
            lateral: ControllerGains::lateral(),
            angular: ControllerGains::angular(),
            motion: MotionSettings::default(),
            teleop: TeleopSettings::default(),
            simulation: SimulationSettings::default(),
            route: Vec::new(),
        }
    }
}

/// One motion of an autonomous route.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteStep {
    MoveTo {
        x: f64,
        y: f64,
        #[serde(rename = "timeout_ms", deserialize_with = "millis")]
        timeout: Duration,
        max_speed: Option<f64>,
        #[serde(default)]
        reversed: bool,
    },
    TurnTo {
        x: f64,
        y: f64,
        #[serde(rename = "timeout_ms", deserialize_with = "millis")]
        timeout: Duration,
        max_speed: Option<f64>,
        #[serde(default)]
        reversed: bool,
    },
}

/// Load settings from `config/default.toml` (if present), overridden by
/// `HELM__SECTION__KEY` environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let settings = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__").try_parsing(true))
        .build()
        .and_then(|config| config.try_deserialize::<Settings>());

    match settings {
        Ok(settings) => {
            info!(route_steps = settings.route.len(), "Successfully loaded configuration");
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

/// Parse settings from a TOML document.
pub fn from_toml_str(toml: &str) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?
        .try_deserialize()
}
