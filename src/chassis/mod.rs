//! The chassis: one owned object holding the drivetrain, its sensors and the
//! controller settings.
//!
//! Motion calls ([`Chassis::move_to`], [`Chassis::turn_to`]) and manual drive
//! ([`Chassis::drive`], [`Chassis::set_tank`]) all take `&mut self`, so two of
//! them can never overlap on one chassis. On top of that the chassis tracks a
//! [`DriveMode`]; motion calls only run in [`DriveMode::Autonomous`] and manual
//! drive only in [`DriveMode::Driver`].

use std::{sync::Arc, time::Duration};

use helm_devices::{BrakeMode, CompetitionState, DeviceError, NoFieldControl, SharedActuator};
use helm_kinematics::{DifferentialDrive, Pose};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    blackboard::PoseSource,
    calibration::{CalibrationReport, CalibrationSequencer},
    clock::{Clock, SystemClock},
    control::ControllerGains,
    error::ChassisError,
    sensors::{CalibratedSensors, SensorBundle},
};

pub mod assist;
pub mod motion;

pub use assist::TeleopSettings;
pub use motion::{DriveCommand, MotionOutcome, MotionSettings, ReverseHandling};

/// Period of every control loop.
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Physical parameters of the drivetrain.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DrivetrainGeometry {
    /// Distance between the left and right wheels.
    pub track_width: f64,
    pub wheel_diameter: f64,
    /// Wheel speed at the motors' free speed.
    pub rpm: f64,
}

impl Default for DrivetrainGeometry {
    fn default() -> Self {
        Self {
            track_width: 10.0,
            wheel_diameter: 3.25,
            rpm: 360.0,
        }
    }
}

/// Actuator handles and geometry of a differential drivetrain.
#[derive(Clone)]
pub struct DrivetrainConfig {
    pub left: SharedActuator,
    pub right: SharedActuator,
    geometry: DrivetrainGeometry,
}

impl DrivetrainConfig {
    /// # Errors
    ///
    /// Returns [`ChassisError::Geometry`] if the wheel diameter or track width
    /// is not positive.
    pub fn new(
        left: SharedActuator,
        right: SharedActuator,
        geometry: DrivetrainGeometry,
    ) -> Result<Self, ChassisError> {
        DifferentialDrive::new(geometry.wheel_diameter, geometry.track_width)?;
        Ok(Self { left, right, geometry })
    }

    pub fn geometry(&self) -> DrivetrainGeometry {
        self.geometry
    }
}

/// Who is currently allowed to command the drivetrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    Disabled,
    /// Motion calls may run.
    Autonomous,
    /// Manual drive may run.
    Driver,
}

enum SensorState {
    Pending(SensorBundle),
    Ready(CalibratedSensors),
}

pub struct Chassis {
    drivetrain: DrivetrainConfig,
    lateral: ControllerGains,
    angular: ControllerGains,
    motion: MotionSettings,
    teleop: TeleopSettings,
    sensors: SensorState,
    pose: PoseSource,
    competition: Arc<dyn CompetitionState + Send + Sync>,
    clock: Arc<dyn Clock>,
    mode: DriveMode,
}

impl Chassis {
    /// Builds a chassis that still has to be [calibrated](Self::calibrate).
    ///
    /// The chassis starts disabled, with its own pose source, the system clock
    /// and no field control; use the `with_*` methods to share those.
    pub fn new(
        drivetrain: DrivetrainConfig,
        lateral: ControllerGains,
        angular: ControllerGains,
        sensors: SensorBundle,
    ) -> Self {
        Self {
            drivetrain,
            lateral,
            angular,
            motion: MotionSettings::default(),
            teleop: TeleopSettings::default(),
            sensors: SensorState::Pending(sensors),
            pose: PoseSource::new(),
            competition: Arc::new(NoFieldControl),
            clock: Arc::new(SystemClock::new()),
            mode: DriveMode::Disabled,
        }
    }

    pub fn with_pose_source(mut self, pose: PoseSource) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_competition(mut self, competition: Arc<dyn CompetitionState + Send + Sync>) -> Self {
        self.competition = competition;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_motion_settings(mut self, motion: MotionSettings) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_teleop_settings(mut self, teleop: TeleopSettings) -> Self {
        self.teleop = teleop;
        self
    }

    /// Bring every sensor into a known state.
    ///
    /// Blocks for up to a few seconds while the heading sensor calibrates.
    /// Calling it again recalibrates the same sensors.
    pub fn calibrate(&mut self) -> CalibrationReport {
        let bundle = match std::mem::replace(&mut self.sensors, SensorState::Pending(SensorBundle::default())) {
            SensorState::Pending(bundle) => bundle,
            SensorState::Ready(sensors) => sensors.into_bundle(),
        };
        let mut sequencer = CalibrationSequencer::new(self.clock.as_ref())
            .with_blackboard(self.pose.blackboard().clone());
        let (sensors, report) = sequencer.run(bundle, &self.drivetrain);
        self.sensors = SensorState::Ready(sensors);
        report
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.sensors, SensorState::Ready(_))
    }

    pub fn sensors(&self) -> Option<&CalibratedSensors> {
        match &self.sensors {
            SensorState::Ready(sensors) => Some(sensors),
            SensorState::Pending(_) => None,
        }
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn pose_source(&self) -> &PoseSource {
        &self.pose
    }

    pub fn drivetrain(&self) -> &DrivetrainConfig {
        &self.drivetrain
    }

    /// Hand the drivetrain to motion calls: zero every drive sensor and hold
    /// position when idle.
    pub fn enter_autonomous(&mut self) -> Result<(), ChassisError> {
        self.reset_drive_sensors()?;
        self.set_drive_brake(BrakeMode::Hold)?;
        self.switch_mode(DriveMode::Autonomous);
        Ok(())
    }

    /// Hand the drivetrain to manual drive, coasting when idle.
    pub fn enter_driver(&mut self) -> Result<(), ChassisError> {
        self.set_drive_brake(BrakeMode::Coast)?;
        self.switch_mode(DriveMode::Driver);
        Ok(())
    }

    /// Stop both sides and refuse every command until a mode is entered again.
    pub fn disable(&mut self) -> Result<(), ChassisError> {
        self.switch_mode(DriveMode::Disabled);
        self.stop()?;
        Ok(())
    }

    /// Current pose; heading in radians when `radians` is set, else degrees.
    pub fn get_pose(&self, radians: bool) -> Pose {
        self.pose.get_pose(radians)
    }

    /// Overwrite the pose estimate.
    pub fn set_pose(&self, pose: Pose, radians: bool) {
        self.pose.set_pose(pose, radians);
    }

    pub fn set_drive_brake(&self, mode: BrakeMode) -> Result<(), ChassisError> {
        self.drivetrain.left.lock().set_brake_mode(mode)?;
        self.drivetrain.right.lock().set_brake_mode(mode)?;
        Ok(())
    }

    /// Tare both motor groups, reset every tracking wheel and zero the heading
    /// sensor's reference frames.
    pub fn reset_drive_sensors(&self) -> Result<(), ChassisError> {
        let sensors = self.sensors().ok_or(ChassisError::NotCalibrated)?;
        self.drivetrain.left.lock().tare_position()?;
        self.drivetrain.right.lock().tare_position()?;
        sensors.reset_all()?;
        Ok(())
    }

    fn switch_mode(&mut self, mode: DriveMode) {
        if self.mode != mode {
            info!(from = ?self.mode, to = ?mode, "Drive mode changed");
            self.mode = mode;
        }
    }

    fn require_mode(&self, operation: &'static str, required: DriveMode) -> Result<(), ChassisError> {
        if self.mode != required {
            warn!(operation, ?required, current = ?self.mode, "Rejected command in wrong drive mode");
            return Err(ChassisError::ModeConflict {
                operation,
                required,
                current: self.mode,
            });
        }
        Ok(())
    }

    fn command(&self, command: DriveCommand) -> Result<(), DeviceError> {
        self.drivetrain.left.lock().set_power(command.left)?;
        self.drivetrain.right.lock().set_power(command.right)?;
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        // Try both sides even if the first one fails.
        let left = self.drivetrain.left.lock().set_power(0.0);
        let right = self.drivetrain.right.lock().set_power(0.0);
        left.and(right)
    }
}
