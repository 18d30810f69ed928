//! Manual drive: raw tank commands and joystick drive with active braking.

use std::time::Duration;

use helm_devices::{DeviceError, SharedActuator};
use serde::Deserialize;
use tracing::trace;

use super::{Chassis, DriveCommand, DriveMode};
use crate::error::ChassisError;

/// Tank commands issued before the chassis clock reaches this are dropped.
pub const STARTUP_LOCKOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TeleopSettings {
    /// Stick magnitude at or below which the driver is considered idle.
    pub deadband: f64,
    /// Gain of the position hold applied while idle; 0 disables it.
    pub active_brake_kp: f64,
}

impl Default for TeleopSettings {
    fn default() -> Self {
        Self {
            deadband: 15.0,
            active_brake_kp: 0.1,
        }
    }
}

impl Chassis {
    pub fn teleop_settings(&self) -> TeleopSettings {
        self.teleop
    }

    /// Command both sides directly.
    ///
    /// Ignored (and reported as success) during the first
    /// [`STARTUP_LOCKOUT`] after the chassis clock started.
    pub fn set_tank(&mut self, left: f64, right: f64) -> Result<(), ChassisError> {
        self.require_mode("set_tank", DriveMode::Driver)?;
        if self.clock.now() < STARTUP_LOCKOUT {
            trace!(left, right, "Tank command ignored during start-up lockout");
            return Ok(());
        }
        self.command(DriveCommand::new(left, right))?;
        Ok(())
    }

    /// Joystick drive with active braking.
    ///
    /// Sticks outside the dead-band are passed through to [`set_tank`] and,
    /// with a non-zero `active_brake_kp`, re-zero both groups so the hold
    /// position follows the robot. Inside the dead-band each side is pushed
    /// back towards that position with `-position * active_brake_kp`.
    ///
    /// Only the motor groups are re-zeroed. Tracking wheels and the heading
    /// sensor are left alone; [`reset_drive_sensors`] resets those.
    ///
    /// [`reset_drive_sensors`]: Self::reset_drive_sensors
    /// [`set_tank`]: Self::set_tank
    pub fn drive(&mut self, left: f64, right: f64, active_brake_kp: f64) -> Result<(), ChassisError> {
        self.require_mode("drive", DriveMode::Driver)?;
        let deadband = self.teleop.deadband;

        if left.abs() > deadband || right.abs() > deadband {
            self.set_tank(left, right)?;
            if active_brake_kp != 0.0 {
                self.drivetrain.left.lock().tare_position()?;
                self.drivetrain.right.lock().tare_position()?;
            }
            return Ok(());
        }

        let left_hold = -first_position(&self.drivetrain.left)? * active_brake_kp;
        let right_hold = -first_position(&self.drivetrain.right)? * active_brake_kp;
        self.command(DriveCommand::new(left_hold, right_hold))?;
        Ok(())
    }
}

fn first_position(group: &SharedActuator) -> Result<f64, DeviceError> {
    Ok(group.lock().positions()?.first().copied().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helm_devices::{ActuatorGroup, BrakeMode, shared};
    use mockall::{Sequence, mock, predicate::eq};

    use super::*;
    use crate::{
        chassis::{DrivetrainConfig, DrivetrainGeometry},
        control::ControllerGains,
        sensors::SensorBundle,
        sim::SimClock,
    };

    mock! {
        Actuator {}

        impl ActuatorGroup for Actuator {
            fn set_power(&mut self, power: f64) -> Result<(), DeviceError>;
            fn set_brake_mode(&mut self, mode: BrakeMode) -> Result<(), DeviceError>;
            fn tare_position(&mut self) -> Result<(), DeviceError>;
            fn positions(&self) -> Result<Vec<f64>, DeviceError>;
            fn cartridge_rpm(&self) -> f64;
        }
    }

    fn permissive() -> MockActuator {
        let mut mock = MockActuator::new();
        mock.expect_set_brake_mode().returning(|_| Ok(()));
        mock.expect_cartridge_rpm().return_const(600.0);
        mock
    }

    fn chassis(left: MockActuator, right: MockActuator, clock: Arc<SimClock>) -> Chassis {
        let drivetrain = DrivetrainConfig::new(shared(left), shared(right), DrivetrainGeometry::default()).unwrap();
        Chassis::new(drivetrain, ControllerGains::lateral(), ControllerGains::angular(), SensorBundle::default())
            .with_clock(clock)
    }

    fn started_clock() -> Arc<SimClock> {
        let clock = Arc::new(SimClock::manual());
        clock.advance(STARTUP_LOCKOUT);
        clock
    }

    #[test]
    fn test_idle_sticks_hold_position() {
        let mut left = permissive();
        left.expect_positions().returning(|| Ok(vec![50.0, 10.0]));
        left.expect_set_power().with(eq(-5.0)).times(1).returning(|_| Ok(()));
        let mut right = permissive();
        right.expect_positions().returning(|| Ok(vec![-20.0]));
        right.expect_set_power().with(eq(2.0)).times(1).returning(|_| Ok(()));

        let mut chassis = chassis(left, right, started_clock());
        chassis.enter_driver().unwrap();
        chassis.drive(3.0, -15.0, 0.1).unwrap();
    }

    #[test]
    fn test_zero_gain_commands_zero() {
        let mut left = permissive();
        left.expect_positions().returning(|| Ok(vec![120.0]));
        left.expect_set_power().with(eq(0.0)).times(1).returning(|_| Ok(()));
        let mut right = permissive();
        right.expect_positions().returning(|| Ok(vec![]));
        right.expect_set_power().with(eq(0.0)).times(1).returning(|_| Ok(()));

        let mut chassis = chassis(left, right, started_clock());
        chassis.enter_driver().unwrap();
        chassis.drive(0.0, 0.0, 0.0).unwrap();
    }

    #[test]
    fn test_active_sticks_pass_through_and_rezero() {
        let mut seq = Sequence::new();
        let mut left = permissive();
        left.expect_set_power()
            .with(eq(80.0))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut right = permissive();
        right.expect_set_power()
            .with(eq(10.0))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        left.expect_tare_position().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        right.expect_tare_position().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let mut chassis = chassis(left, right, started_clock());
        chassis.enter_driver().unwrap();
        chassis.drive(80.0, 10.0, 0.1).unwrap();
    }

    #[test]
    fn test_active_sticks_without_brake_do_not_tare() {
        let mut left = permissive();
        left.expect_set_power().returning(|_| Ok(()));
        left.expect_tare_position().never();
        let mut right = permissive();
        right.expect_set_power().returning(|_| Ok(()));
        right.expect_tare_position().never();

        let mut chassis = chassis(left, right, started_clock());
        chassis.enter_driver().unwrap();
        chassis.drive(-100.0, 100.0, 0.0).unwrap();
    }

    #[test]
    fn test_set_tank_ignored_during_startup_lockout() {
        let mut left = permissive();
        left.expect_set_power().with(eq(60.0)).times(1).returning(|_| Ok(()));
        let mut right = permissive();
        right.expect_set_power().with(eq(60.0)).times(1).returning(|_| Ok(()));

        let clock = Arc::new(SimClock::manual());
        let mut chassis = chassis(left, right, clock.clone());
        chassis.enter_driver().unwrap();

        clock.advance(Duration::from_millis(1490));
        chassis.set_tank(60.0, 60.0).unwrap();
        clock.advance(Duration::from_millis(10));
        chassis.set_tank(60.0, 60.0).unwrap();
    }

    #[test]
    fn test_manual_drive_rejected_outside_driver_mode() {
        let mut left = permissive();
        left.expect_set_power().never();
        left.expect_tare_position().never();
        let mut right = permissive();
        right.expect_set_power().never();

        let mut chassis = chassis(left, right, started_clock());
        let err = chassis.drive(100.0, 100.0, 0.1).unwrap_err();
        assert!(matches!(
            err,
            ChassisError::ModeConflict {
                operation: "drive",
                required: DriveMode::Driver,
                current: DriveMode::Disabled,
            }
        ));
        assert!(matches!(chassis.set_tank(1.0, 1.0), Err(ChassisError::ModeConflict { .. })));
    }

    #[test]
    fn test_device_error_propagates() {
        let mut left = permissive();
        left.expect_positions().returning(|| Err(DeviceError::Disconnected("left drive")));
        let right = permissive();

        let mut chassis = chassis(left, right, started_clock());
        chassis.enter_driver().unwrap();
        let err = chassis.drive(0.0, 0.0, 0.1).unwrap_err();
        assert!(matches!(err, ChassisError::Device(DeviceError::Disconnected("left drive"))));
    }
}
