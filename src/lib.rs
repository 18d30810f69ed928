//! Closed-loop motion control for a differential-drive robot.
//!
//! A [`Chassis`] owns the drivetrain and its sensors. After
//! [calibration](Chassis::calibrate) it drives to points and turns to face
//! them, each motion a blocking 10 ms loop over a pose estimate published by
//! some other task through a [`PoseSource`]. Between motions it offers manual
//! tank drive with active braking.
//!
//! The [`sim`] module provides a simulated drivetrain that plays the role of
//! the motors, the heading sensor and the pose estimator.

pub mod blackboard;
pub mod bus;
pub mod calibration;
pub mod chassis;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod sensors;
pub mod sim;

pub use blackboard::PoseSource;
pub use chassis::{Chassis, DriveMode, DrivetrainConfig, DrivetrainGeometry, MotionOutcome};
pub use control::{ControllerGains, SettleReason};
pub use error::ChassisError;
pub use helm_kinematics::Pose;
