//! Control primitives shared by every motion algorithm.
//!
//! - [`settle`]: the PD evaluator with large/small error exit bands that
//!   decides when a motion is done.
//! - [`slew`]: the per-tick acceleration limiter.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub mod settle;
pub mod slew;

pub use settle::{SettleReason, SettlingController};
pub use slew::slew;

/// Gains and exit conditions for one control axis.
///
/// Timeouts are written in milliseconds in configuration files
/// (`small_error_timeout_ms`, `large_error_timeout_ms`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ControllerGains {
    pub kp: f64,
    pub kd: f64,
    /// Half-width of the fine convergence band.
    pub small_error: f64,
    /// How long the error must stay inside the small band.
    #[serde(rename = "small_error_timeout_ms", deserialize_with = "millis")]
    pub small_error_timeout: Duration,
    /// Half-width of the coarse convergence band.
    pub large_error: f64,
    /// How long the error must stay inside the large band.
    #[serde(rename = "large_error_timeout_ms", deserialize_with = "millis")]
    pub large_error_timeout: Duration,
    /// Largest change of output power per tick; 0 disables limiting.
    pub slew: f64,
}

impl ControllerGains {
    /// Gains for the distance-to-target axis of the reference robot.
    pub const fn lateral() -> Self {
        Self {
            kp: 10.0,
            kd: 30.0,
            small_error: 1.0,
            small_error_timeout: Duration::from_millis(100),
            large_error: 3.0,
            large_error_timeout: Duration::from_millis(500),
            slew: 20.0,
        }
    }

    /// Gains for the heading axis of the reference robot.
    pub const fn angular() -> Self {
        Self {
            kp: 2.0,
            kd: 10.0,
            small_error: 1.0,
            small_error_timeout: Duration::from_millis(100),
            large_error: 3.0,
            large_error_timeout: Duration::from_millis(500),
            slew: 3.0,
        }
    }
}

pub(crate) fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
