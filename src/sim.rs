//! Simulated drivetrain used by the runner and by closed-loop tests.
//!
//! The plant stands in for the real motors, heading sensor and pose
//! estimator: it integrates motor power into wheel travel with
//! [`DifferentialDrive`] and publishes the resulting pose through a
//! [`PoseSource`], exactly where an odometry task would.

use std::{sync::Arc, time::Duration};

use helm_devices::{
    ActuatorGroup, BrakeMode, CalibrationStatus, CompetitionState, CompetitionStatus, DeviceError, HeadingSensor,
    MAX_POWER, Shared, SharedActuator, SharedHeadingSensor, shared,
};
use helm_kinematics::{AngleUnit, DifferentialDrive, KinematicsError, WheelSpeeds, wrap_angle};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::debug;

use crate::{
    blackboard::PoseSource,
    chassis::{DrivetrainConfig, DrivetrainGeometry},
    clock::Clock,
    control::millis,
    error::ChassisError,
};

/// Integration step of the plant.
const SUBSTEP: Duration = Duration::from_millis(1);

/// Time constant of a braking motor settling to rest.
const BRAKE_TIME_CONSTANT: f64 = 0.010;

/// Time constant of a coasting motor spinning down.
const COAST_TIME_CONSTANT: f64 = 0.200;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub motors_per_side: usize,
    /// Free speed of each simulated motor.
    pub cartridge_rpm: f64,
    /// How quickly a motor reaches its commanded speed.
    #[serde(rename = "motor_time_constant_ms", deserialize_with = "millis")]
    pub motor_time_constant: Duration,
    /// Self-calibration time of the simulated heading sensor.
    #[serde(rename = "imu_calibration_ms", deserialize_with = "millis")]
    pub imu_calibration: Duration,
    /// Whether the heading sensor answers at all.
    pub imu_connected: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            motors_per_side: 3,
            cartridge_rpm: 600.0,
            motor_time_constant: Duration::from_millis(40),
            imu_calibration: Duration::from_millis(2200),
            imu_connected: true,
        }
    }
}

/// One side of the simulated drivetrain.
///
/// Shaft speed follows the commanded power with a first-order lag.
#[derive(Debug, Clone)]
pub struct SimMotorGroup {
    name: &'static str,
    power: f64,
    brake: BrakeMode,
    /// Shaft speed in rpm, shared by every motor of the group.
    velocity: f64,
    positions: Vec<f64>,
    cartridge_rpm: f64,
    time_constant: f64,
    connected: bool,
}

impl SimMotorGroup {
    pub fn new(name: &'static str, motors: usize, cartridge_rpm: f64, time_constant: Duration) -> Self {
        Self {
            name,
            power: 0.0,
            brake: BrakeMode::Coast,
            velocity: 0.0,
            positions: vec![0.0; motors],
            cartridge_rpm,
            time_constant: time_constant.as_secs_f64(),
            connected: true,
        }
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn brake_mode(&self) -> BrakeMode {
        self.brake
    }

    /// Shaft speed in rpm.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Unplug (or replug) the group; every call fails while unplugged.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn check(&self) -> Result<(), DeviceError> {
        if self.connected { Ok(()) } else { Err(DeviceError::Disconnected(self.name)) }
    }

    fn step(&mut self, dt: f64) {
        let (target, tau) = if self.power != 0.0 {
            (self.power / MAX_POWER * self.cartridge_rpm, self.time_constant)
        } else if self.brake == BrakeMode::Coast {
            (0.0, COAST_TIME_CONSTANT)
        } else {
            (0.0, BRAKE_TIME_CONSTANT)
        };
        self.velocity += (target - self.velocity) * (dt / tau).min(1.0);
        let travel = self.velocity / 60.0 * 360.0 * dt;
        self.positions.iter_mut().for_each(|p| *p += travel);
    }
}

impl ActuatorGroup for SimMotorGroup {
    fn set_power(&mut self, power: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.power = power.clamp(-MAX_POWER, MAX_POWER);
        Ok(())
    }

    fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), DeviceError> {
        self.check()?;
        self.brake = mode;
        Ok(())
    }

    fn tare_position(&mut self) -> Result<(), DeviceError> {
        self.check()?;
        self.positions.iter_mut().for_each(|p| *p = 0.0);
        Ok(())
    }

    fn positions(&self) -> Result<Vec<f64>, DeviceError> {
        self.check()?;
        Ok(self.positions.clone())
    }

    fn cartridge_rpm(&self) -> f64 {
        self.cartridge_rpm
    }
}

/// Simulated inertial sensor.
///
/// Reports [`CalibrationStatus::Calibrating`] until `calibration_time` of
/// plant time has passed since the last reset.
#[derive(Debug, Clone)]
pub struct SimHeadingSensor {
    connected: bool,
    calibration_time: Duration,
    since_reset: Duration,
    /// True accumulated rotation of the robot.
    rotation: f64,
    rotation_offset: f64,
    heading_offset: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
}

impl SimHeadingSensor {
    pub fn new(calibration_time: Duration) -> Self {
        Self {
            connected: true,
            calibration_time,
            since_reset: Duration::ZERO,
            rotation: 0.0,
            rotation_offset: 0.0,
            heading_offset: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        }
    }

    /// A sensor that never answers.
    pub fn unplugged() -> Self {
        Self { connected: false, ..Self::new(Duration::ZERO) }
    }

    fn check(&self) -> Result<(), DeviceError> {
        if self.connected { Ok(()) } else { Err(DeviceError::Disconnected("imu")) }
    }

    fn step(&mut self, dt: Duration, rotation: f64) {
        self.since_reset += dt;
        self.rotation += rotation;
    }

    /// The roll, pitch and yaw frames, for inspection.
    pub fn frames(&self) -> (f64, f64, f64) {
        (self.roll, self.pitch, self.yaw)
    }
}

impl HeadingSensor for SimHeadingSensor {
    fn reset(&mut self) -> Result<(), DeviceError> {
        self.check()?;
        self.since_reset = Duration::ZERO;
        Ok(())
    }

    fn calibration_status(&self) -> Result<CalibrationStatus, DeviceError> {
        self.check()?;
        Ok(if self.since_reset < self.calibration_time {
            CalibrationStatus::Calibrating
        } else {
            CalibrationStatus::Ready
        })
    }

    fn heading(&self) -> Result<f64, DeviceError> {
        self.check()?;
        Ok(wrap_angle(self.rotation + self.heading_offset, AngleUnit::Degrees))
    }

    fn rotation(&self) -> Result<f64, DeviceError> {
        self.check()?;
        Ok(self.rotation + self.rotation_offset)
    }

    fn set_heading(&mut self, heading: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.heading_offset = heading - self.rotation;
        Ok(())
    }

    fn set_rotation(&mut self, rotation: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.rotation_offset = rotation - self.rotation;
        Ok(())
    }

    fn set_roll(&mut self, roll: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.roll = roll;
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.pitch = pitch;
        Ok(())
    }

    fn set_yaw(&mut self, yaw: f64) -> Result<(), DeviceError> {
        self.check()?;
        self.yaw = yaw;
        Ok(())
    }
}

/// Field control whose status can be flipped by the test or the runner.
#[derive(Debug, Clone, Default)]
pub struct SimFieldControl {
    status: Arc<RwLock<CompetitionStatus>>,
}

impl SimFieldControl {
    pub fn new(status: CompetitionStatus) -> Self {
        Self { status: Arc::new(RwLock::new(status)) }
    }

    pub fn set_status(&self, status: CompetitionStatus) {
        *self.status.write() = status;
    }
}

impl CompetitionState for SimFieldControl {
    fn status(&self) -> CompetitionStatus {
        *self.status.read()
    }
}

struct PlantState {
    time: Duration,
    scheduled: Vec<(Duration, CompetitionStatus)>,
}

/// The simulated robot: two motor groups, a heading sensor and field control,
/// integrated together.
pub struct SimDrivetrain {
    left: Shared<SimMotorGroup>,
    right: Shared<SimMotorGroup>,
    imu: Shared<SimHeadingSensor>,
    field: SimFieldControl,
    geometry: DrivetrainGeometry,
    kinematics: DifferentialDrive,
    pose: PoseSource,
    state: Mutex<PlantState>,
}

impl SimDrivetrain {
    /// # Errors
    ///
    /// Returns a [`KinematicsError`] for a non-positive wheel diameter or
    /// track width.
    pub fn new(
        geometry: DrivetrainGeometry,
        settings: SimulationSettings,
        pose: PoseSource,
    ) -> Result<Self, KinematicsError> {
        let kinematics = DifferentialDrive::new(geometry.wheel_diameter, geometry.track_width)?;
        let group = |name| {
            shared(SimMotorGroup::new(
                name,
                settings.motors_per_side,
                settings.cartridge_rpm,
                settings.motor_time_constant,
            ))
        };
        let imu = if settings.imu_connected {
            SimHeadingSensor::new(settings.imu_calibration)
        } else {
            SimHeadingSensor::unplugged()
        };
        Ok(Self {
            left: group("left drive"),
            right: group("right drive"),
            imu: shared(imu),
            field: SimFieldControl::new(CompetitionStatus::AUTONOMOUS),
            geometry,
            kinematics,
            pose,
            state: Mutex::new(PlantState {
                time: Duration::ZERO,
                scheduled: Vec::new(),
            }),
        })
    }

    pub fn left(&self) -> &Shared<SimMotorGroup> {
        &self.left
    }

    pub fn right(&self) -> &Shared<SimMotorGroup> {
        &self.right
    }

    pub fn imu(&self) -> &Shared<SimHeadingSensor> {
        &self.imu
    }

    pub fn heading_sensor(&self) -> SharedHeadingSensor {
        self.imu.clone()
    }

    pub fn field(&self) -> &SimFieldControl {
        &self.field
    }

    pub fn pose_source(&self) -> &PoseSource {
        &self.pose
    }

    /// Plant time since construction.
    pub fn time(&self) -> Duration {
        self.state.lock().time
    }

    /// Actuator handles and geometry for building a chassis on this plant.
    ///
    /// # Errors
    ///
    /// Returns [`ChassisError::Geometry`] for invalid geometry.
    pub fn drivetrain_config(&self) -> Result<DrivetrainConfig, ChassisError> {
        let left: SharedActuator = self.left.clone();
        let right: SharedActuator = self.right.clone();
        DrivetrainConfig::new(left, right, self.geometry)
    }

    /// Change the field control status once the plant reaches `at`.
    pub fn schedule_status(&self, at: Duration, status: CompetitionStatus) {
        let mut state = self.state.lock();
        state.scheduled.push((at, status));
        state.scheduled.sort_by_key(|(at, _)| *at);
    }

    /// Advance the plant by `dt`.
    pub fn step(&self, dt: Duration) {
        let mut remaining = dt;
        while !remaining.is_zero() {
            let h = remaining.min(SUBSTEP);
            self.substep(h);
            remaining -= h;
        }
    }

    fn substep(&self, h: Duration) {
        let dt = h.as_secs_f64();
        let (left_rpm, right_rpm) = {
            let mut left = self.left.lock();
            let mut right = self.right.lock();
            left.step(dt);
            right.step(dt);
            (left.velocity / left.cartridge_rpm, right.velocity / right.cartridge_rpm)
        };

        // Shaft speed as a fraction of free speed, times the wheel's free rpm.
        let to_wheel = |fraction: f64| fraction * self.geometry.rpm / 60.0 * 2.0 * std::f64::consts::PI;
        let wheels = WheelSpeeds::new(to_wheel(left_rpm), to_wheel(right_rpm));
        let speeds = self.kinematics.forward_kinematics(wheels);

        let kinematics = self.kinematics;
        self.pose.update(|pose| {
            kinematics
                .update_pose(pose.to_radians(), speeds, dt)
                .map(|p| p.to_degrees())
                .unwrap_or(pose)
        });
        self.imu.lock().step(h, speeds.omega.to_degrees() * dt);

        let mut state = self.state.lock();
        state.time += h;
        let now = state.time;
        while state.scheduled.first().is_some_and(|(at, _)| *at <= now) {
            let (_, status) = state.scheduled.remove(0);
            debug!(?now, ?status, "Field control status changed");
            self.field.set_status(status);
        }
    }
}

/// Simulated time.
///
/// A manual clock only moves when [`advance`](Self::advance) or
/// [`Clock::sleep`] is called. A lock-step clock also steps a plant through
/// every sleep, so a blocking control loop drives the simulation forward.
pub struct SimClock {
    now: Mutex<Duration>,
    plant: Option<Arc<SimDrivetrain>>,
}

impl SimClock {
    pub fn manual() -> Self {
        Self { now: Mutex::new(Duration::ZERO), plant: None }
    }

    pub fn lockstep(plant: Arc<SimDrivetrain>) -> Self {
        Self {
            now: Mutex::new(plant.time()),
            plant: Some(plant),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Some(plant) = &self.plant {
            plant.step(duration);
        }
        *self.now.lock() += duration;
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant() -> SimDrivetrain {
        SimDrivetrain::new(DrivetrainGeometry::default(), SimulationSettings::default(), PoseSource::new()).unwrap()
    }

    #[test]
    fn test_equal_power_drives_straight_along_heading() {
        let plant = plant();
        plant.left().lock().set_power(100.0).unwrap();
        plant.right().lock().set_power(100.0).unwrap();
        plant.step(Duration::from_millis(500));

        let pose = plant.pose_source().get_pose(false);
        assert!(pose.y > 15.0);
        assert!(pose.x.abs() < 1e-9);
        assert!(pose.theta.abs() < 1e-9);
    }

    #[test]
    fn test_left_faster_turns_clockwise_and_imu_follows() {
        let plant = plant();
        plant.left().lock().set_power(50.0).unwrap();
        plant.right().lock().set_power(-50.0).unwrap();
        plant.step(Duration::from_millis(200));

        let pose = plant.pose_source().get_pose(false);
        assert!(pose.theta > 0.0);
        let rotation = plant.imu().lock().rotation().unwrap();
        assert!((rotation - pose.theta).abs() < 1e-6);
    }

    #[test]
    fn test_hold_stops_faster_than_coast() {
        let coast = plant();
        let hold = plant();
        hold.left().lock().set_brake_mode(BrakeMode::Hold).unwrap();
        for p in [&coast, &hold] {
            p.left().lock().set_power(127.0).unwrap();
            p.step(Duration::from_millis(300));
            p.left().lock().set_power(0.0).unwrap();
            p.step(Duration::from_millis(50));
        }
        assert!(hold.left().lock().velocity().abs() < coast.left().lock().velocity().abs());
    }

    #[test]
    fn test_imu_calibrates_after_configured_time() {
        let plant = plant();
        plant.imu().lock().reset().unwrap();
        plant.step(Duration::from_millis(2190));
        assert_eq!(plant.imu().lock().calibration_status(), Ok(CalibrationStatus::Calibrating));
        plant.step(Duration::from_millis(10));
        assert_eq!(plant.imu().lock().calibration_status(), Ok(CalibrationStatus::Ready));
    }

    #[test]
    fn test_scheduled_status_applies_at_plant_time() {
        let plant = Arc::new(plant());
        plant.schedule_status(Duration::from_millis(100), CompetitionStatus::DISABLED);
        let clock = SimClock::lockstep(plant.clone());

        clock.sleep(Duration::from_millis(90));
        assert_eq!(plant.field().status(), CompetitionStatus::AUTONOMOUS);
        clock.sleep(Duration::from_millis(10));
        assert_eq!(plant.field().status(), CompetitionStatus::DISABLED);
        assert_eq!(clock.now(), Duration::from_millis(100));
    }

    #[test]
    fn test_unplugged_devices_report_disconnected() {
        let imu = SimHeadingSensor::unplugged();
        assert_eq!(imu.calibration_status(), Err(DeviceError::Disconnected("imu")));
        let mut group = SimMotorGroup::new("left drive", 2, 600.0, Duration::from_millis(40));
        group.set_connected(false);
        assert_eq!(group.set_power(10.0), Err(DeviceError::Disconnected("left drive")));
    }
}
