//! Heading and angle utilities.
//!
//! Headings on the field follow the compass bearing convention: 0 faces +y
//! and angles grow clockwise. Raw headings coming from sensors are not
//! normalized, so everything here reduces its inputs before comparing them.

use core::f64::consts::PI;
use libm::fmod;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The unit an angle is expressed in.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngleUnit {
    /// Degrees; one revolution is 360.
    #[default]
    Degrees,
    /// Radians; one revolution is 2π.
    Radians,
}

impl AngleUnit {
    /// Selects radians when `radians` is true, degrees otherwise.
    pub const fn from_flag(radians: bool) -> Self {
        if radians { AngleUnit::Radians } else { AngleUnit::Degrees }
    }

    /// One full revolution in this unit.
    pub const fn full_turn(self) -> f64 {
        match self {
            AngleUnit::Degrees => 360.0,
            AngleUnit::Radians => 2.0 * PI,
        }
    }

    /// Half a revolution in this unit.
    pub const fn half_turn(self) -> f64 {
        match self {
            AngleUnit::Degrees => 180.0,
            AngleUnit::Radians => PI,
        }
    }
}

/// Convert radians to degrees.
pub fn rad_to_deg(rad: f64) -> f64 {
    rad * 180.0 / PI
}

/// Convert degrees to radians.
pub fn deg_to_rad(deg: f64) -> f64 {
    deg * PI / 180.0
}

/// Reduce an angle into `[0, full turn)`.
///
/// # Arguments
///
/// * `angle`: The angle to reduce.
/// * `unit`: The unit `angle` is expressed in.
pub fn wrap_angle(angle: f64, unit: AngleUnit) -> f64 {
    let full = unit.full_turn();
    let a = fmod(angle, full);
    let a = if a < 0.0 { a + full } else { a };
    // `a + full` can round up to exactly one full turn for tiny negative inputs
    if a >= full { 0.0 } else { a }
}

/// Signed shortest angular difference `angle1 - angle2`.
///
/// The raw difference is reduced modulo one revolution and folded into the
/// half-turn interval, so the magnitude never exceeds 180° (π).
///
/// # Arguments
///
/// * `angle1`: The angle being measured.
/// * `angle2`: The reference angle.
/// * `unit`: The unit both angles are expressed in.
pub fn angle_error(angle1: f64, angle2: f64, unit: AngleUnit) -> f64 {
    let full = unit.full_turn();
    let half = unit.half_turn();
    let mut error = fmod(angle1 - angle2, full);
    if error > half {
        error -= full;
    } else if error < -half {
        error += full;
    }
    error
}

/// Compass bearing from `(x, y)` towards `(target_x, target_y)`, in `[0, 360)` degrees.
pub fn bearing_to(x: f64, y: f64, target_x: f64, target_y: f64) -> f64 {
    let dx = target_x - x;
    let dy = target_y - y;
    wrap_angle(rad_to_deg(PI / 2.0 - libm::atan2(dy, dx)), AngleUnit::Degrees)
}
