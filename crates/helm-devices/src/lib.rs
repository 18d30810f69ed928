#![warn(missing_docs)]
//! Device interfaces consumed by the chassis controller.
//!
//! Raw drivers live outside this workspace. The controller only talks to the
//! hardware through the traits defined here, which keeps the control loops
//! testable against simulated or mocked devices.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod error;
pub use error::DeviceError;

/// A device shared between the control loop and the pose estimator.
pub type Shared<T> = Arc<Mutex<T>>;

/// Shared handle to one side of the drivetrain.
pub type SharedActuator = Shared<dyn ActuatorGroup + Send>;

/// Shared handle to a heading sensor.
pub type SharedHeadingSensor = Shared<dyn HeadingSensor + Send>;

/// Shared handle to a dedicated tracking encoder.
pub type SharedEncoder = Shared<dyn RotaryEncoder + Send>;

/// Wraps a concrete device in a shared handle.
pub fn shared<T>(device: T) -> Shared<T> {
    Arc::new(Mutex::new(device))
}

/// The largest magnitude accepted by [`ActuatorGroup::set_power`].
pub const MAX_POWER: f64 = 127.0;

/// How the motors behave when commanded to zero power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrakeMode {
    /// Let the motors spin freely.
    #[default]
    Coast,
    /// Short the windings for a quick stop.
    Brake,
    /// Actively hold the current position.
    Hold,
}

/// Progress of a heading sensor's self-calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStatus {
    /// The sensor is still calibrating and its readings are not usable.
    Calibrating,
    /// The sensor has finished calibrating.
    Ready,
}

/// Snapshot of the field control state.
///
/// The controller treats this as an opaque token: it records the value seen
/// when a motion starts and aborts the motion as soon as a different value is
/// observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompetitionStatus {
    /// The robot is disabled by field control.
    pub disabled: bool,
    /// The autonomous period is active.
    pub autonomous: bool,
    /// A field or competition switch is connected.
    pub connected: bool,
}

impl CompetitionStatus {
    /// Enabled in the autonomous period.
    pub const AUTONOMOUS: Self = Self { disabled: false, autonomous: true, connected: true };
    /// Enabled in the driver control period.
    pub const DRIVER: Self = Self { disabled: false, autonomous: false, connected: true };
    /// Disabled by field control.
    pub const DISABLED: Self = Self { disabled: true, autonomous: false, connected: true };
}

/// One side of a differential drivetrain: a group of motors commanded together.
pub trait ActuatorGroup {
    /// Command every motor in the group.
    ///
    /// `power` ranges over `[-127, 127]`; out-of-range values are clamped by
    /// implementations.
    fn set_power(&mut self, power: f64) -> Result<(), DeviceError>;

    /// Set the brake mode applied when the group is commanded to zero.
    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), DeviceError>;

    /// Zero the integrated encoder of every motor in the group.
    fn tare_position(&mut self) -> Result<(), DeviceError>;

    /// Motor shaft positions in degrees since the last tare, one per motor.
    fn positions(&self) -> Result<Vec<f64>, DeviceError>;

    /// Free speed of the motor cartridge, used to turn shaft rotation into
    /// wheel rotation.
    fn cartridge_rpm(&self) -> f64;
}

/// An inertial sensor providing the robot heading.
pub trait HeadingSensor {
    /// Restart the sensor's self-calibration.
    fn reset(&mut self) -> Result<(), DeviceError>;

    /// Whether the sensor is still calibrating.
    fn calibration_status(&self) -> Result<CalibrationStatus, DeviceError>;

    /// Heading in `[0, 360)` degrees, clockwise positive.
    fn heading(&self) -> Result<f64, DeviceError>;

    /// Unbounded accumulated rotation in degrees, clockwise positive.
    fn rotation(&self) -> Result<f64, DeviceError>;

    /// Overwrite the heading reference frame.
    fn set_heading(&mut self, heading: f64) -> Result<(), DeviceError>;

    /// Overwrite the accumulated rotation reference frame.
    fn set_rotation(&mut self, rotation: f64) -> Result<(), DeviceError>;

    /// Overwrite the roll reference frame.
    fn set_roll(&mut self, roll: f64) -> Result<(), DeviceError>;

    /// Overwrite the pitch reference frame.
    fn set_pitch(&mut self, pitch: f64) -> Result<(), DeviceError>;

    /// Overwrite the yaw reference frame.
    fn set_yaw(&mut self, yaw: f64) -> Result<(), DeviceError>;
}

/// A dedicated encoder on an unpowered tracking wheel.
pub trait RotaryEncoder {
    /// Shaft position in degrees since the last reset.
    fn position(&self) -> Result<f64, DeviceError>;

    /// Zero the shaft position.
    fn reset(&mut self) -> Result<(), DeviceError>;
}

/// Source of the field control state.
pub trait CompetitionState {
    /// The current competition status.
    fn status(&self) -> CompetitionStatus;
}

/// A robot that is never connected to field control always reports the same
/// status, so nothing ever aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFieldControl;

impl CompetitionState for NoFieldControl {
    fn status(&self) -> CompetitionStatus {
        CompetitionStatus::default()
    }
}
