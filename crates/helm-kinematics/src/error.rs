//! Error types for the kinematics library.
//!
//! This module defines error types that can occur while constructing a drive
//! model or integrating a pose.

use core::fmt;

/// Errors that can occur in kinematic calculations.
#[derive(Debug, Clone, PartialEq)]
pub enum KinematicsError {
    /// Error for invalid wheel diameter.
    /// This variant is returned when a wheel diameter is provided that is not positive.
    InvalidWheelDiameter(&'static str),
    /// Error for invalid track width.
    /// This variant is returned when a track width is provided that is not positive.
    InvalidTrackWidth(&'static str),
    /// Error for negative time delta.
    /// This variant is returned when a negative time delta is used for pose updates.
    NegativeTimeDelta(&'static str),
}

impl fmt::Display for KinematicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KinematicsError::InvalidWheelDiameter(msg) => write!(f, "Invalid wheel diameter: {}", msg),
            KinematicsError::InvalidTrackWidth(msg) => write!(f, "Invalid track width: {}", msg),
            KinematicsError::NegativeTimeDelta(msg) => write!(f, "Negative time delta: {}", msg),
        }
    }
}

impl core::error::Error for KinematicsError {}
