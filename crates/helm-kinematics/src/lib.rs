#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library for 2D differential-drive pose math."]
#![doc = ""]
#![doc = "This crate provides the field pose type, compass-convention angle utilities,"]
#![doc = "and forward kinematics with dead reckoning for a differential drive."]

use core::f64::consts::PI;
use core::fmt;
use libm::{cos, hypot, sin};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod angle;
pub mod error;
pub use angle::{AngleUnit, angle_error, bearing_to, deg_to_rad, rad_to_deg, wrap_angle};
pub use error::KinematicsError;

/// A 2‑D field pose `(x, y, θ)`.
///
/// Positions are in field units (inches). The heading follows the compass
/// convention (0 faces +y, clockwise positive) and is expressed in degrees
/// unless a caller explicitly asks for radians. The heading is never
/// normalized here; consumers reduce it before use.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// Field‑frame x position.
    pub x: f64,
    /// Field‑frame y position.
    pub y: f64,
    /// Heading, possibly accumulated past one revolution.
    pub theta: f64,
}

impl Pose {
    /// Construct a new pose.
    ///
    /// # Arguments
    ///
    /// * `x`: Field-frame x position.
    /// * `y`: Field-frame y position.
    /// * `theta`: Heading.
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }

    /// Straight-line distance between the positions of two poses.
    pub fn distance(&self, other: &Pose) -> f64 {
        hypot(other.x - self.x, other.y - self.y)
    }

    /// The same pose with its heading converted from degrees to radians.
    pub fn to_radians(self) -> Self {
        Pose { theta: deg_to_rad(self.theta), ..self }
    }

    /// The same pose with its heading converted from radians to degrees.
    pub fn to_degrees(self) -> Self {
        Pose { theta: rad_to_deg(self.theta), ..self }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x: {:.2}, y: {:.2}, θ: {:.2})", self.x, self.y, self.theta)
    }
}

/// Left and right wheel angular velocities.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelSpeeds {
    /// Left wheel angular velocity (rad/s).
    pub omega_l: f64,
    /// Right wheel angular velocity (rad/s).
    pub omega_r: f64,
}

impl WheelSpeeds {
    /// Construct wheel speeds.
    ///
    /// # Arguments
    ///
    /// * `omega_l`: Left wheel angular velocity (rad/s).
    /// * `omega_r`: Right wheel angular velocity (rad/s).
    pub const fn new(omega_l: f64, omega_r: f64) -> Self {
        WheelSpeeds { omega_l, omega_r }
    }
}

impl fmt::Display for WheelSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(ωL: {:.2} rad/s, ωR: {:.2} rad/s)", self.omega_l, self.omega_r)
    }
}

/// Linear and angular chassis velocities.
///
/// `omega` is a heading rate and, like the heading, is positive clockwise.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisSpeeds {
    /// Forward speed of the chassis center (in/s).
    pub v: f64,
    /// Clockwise turn rate of the chassis (rad/s).
    pub omega: f64,
}

impl ChassisSpeeds {
    /// Construct chassis speeds.
    ///
    /// # Arguments
    ///
    /// * `v`: Forward speed of the chassis center (in/s).
    /// * `omega`: Clockwise turn rate of the chassis (rad/s).
    pub const fn new(v: f64, omega: f64) -> Self {
        ChassisSpeeds { v, omega }
    }
}

impl fmt::Display for ChassisSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(v: {:.2} in/s, ω: {:.2} rad/s)", self.v, self.omega)
    }
}

/// Differential‑drive kinematics helper.
///
/// This struct encapsulates the physical parameters of a differential-drive robot
/// (wheel diameter and track width) and provides methods for kinematic calculations.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialDrive {
    /// Wheel diameter (in).
    wheel_diameter: f64,
    /// Distance between the left and right wheels (in).
    track_width: f64,
}

impl DifferentialDrive {
    /// Construct a new differential‑drive kinematics helper.
    ///
    /// # Arguments
    ///
    /// * `wheel_diameter`: The diameter of the drive wheels.
    /// * `track_width`: The distance between the left and right wheels.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::InvalidWheelDiameter)` if `wheel_diameter` is not positive.
    /// Returns `Err(KinematicsError::InvalidTrackWidth)` if `track_width` is not positive.
    pub const fn new(wheel_diameter: f64, track_width: f64) -> Result<Self, KinematicsError> {
        if wheel_diameter <= 0.0 {
            return Err(KinematicsError::InvalidWheelDiameter("must be positive"));
        }
        if track_width <= 0.0 {
            return Err(KinematicsError::InvalidTrackWidth("must be positive"));
        }
        Ok(DifferentialDrive {
            wheel_diameter,
            track_width,
        })
    }

    /// Returns the wheel diameter.
    pub fn wheel_diameter(&self) -> f64 {
        self.wheel_diameter
    }

    /// Returns the track width.
    pub fn track_width(&self) -> f64 {
        self.track_width
    }

    /// Distance covered by the wheel rim for one full wheel revolution.
    pub fn wheel_circumference(&self) -> f64 {
        self.wheel_diameter * PI
    }

    /// Calculates the chassis speeds from the wheel speeds (forward kinematics).
    ///
    /// A left wheel faster than the right turns the robot clockwise, which is
    /// a positive heading rate.
    pub fn forward_kinematics(&self, wheel_speeds: WheelSpeeds) -> ChassisSpeeds {
        let radius = self.wheel_diameter / 2.0;
        let v_l = wheel_speeds.omega_l * radius;
        let v_r = wheel_speeds.omega_r * radius;

        let v = (v_r + v_l) / 2.0;
        let omega = (v_l - v_r) / self.track_width;

        ChassisSpeeds::new(v, omega)
    }

    /// Integrates chassis speeds over `dt` seconds starting from `current_pose`.
    ///
    /// The heading of `current_pose` is in radians. It is integrated as a
    /// continuous rotation and is not wrapped.
    ///
    /// # Errors
    ///
    /// Returns `Err(KinematicsError::NegativeTimeDelta)` if `dt` is negative.
    pub fn update_pose(
        &self,
        current_pose: Pose,
        chassis_speeds: ChassisSpeeds,
        dt: f64,
    ) -> Result<Pose, KinematicsError> {
        if dt < 0.0 {
            return Err(KinematicsError::NegativeTimeDelta("must be non-negative"));
        }

        // Midpoint heading keeps arcs from drifting outward at coarse steps.
        let delta_theta = chassis_speeds.omega * dt;
        let mid_theta = current_pose.theta + delta_theta / 2.0;
        let distance = chassis_speeds.v * dt;

        Ok(Pose {
            x: current_pose.x + distance * sin(mid_theta),
            y: current_pose.y + distance * cos(mid_theta),
            theta: current_pose.theta + delta_theta,
        })
    }
}

impl fmt::Display for DifferentialDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DifferentialDrive (d: {:.2} in, track: {:.2} in)",
            self.wheel_diameter, self.track_width
        )
    }
}
