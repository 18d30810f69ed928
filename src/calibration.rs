//! Start-up sequence that turns a [`SensorBundle`] into [`CalibratedSensors`].
//!
//! ```text
//! AwaitHeadingSensor ──► BuildDefaultTrackers ──► ResetAll ──► Done
//! ```
//!
//! Waiting on the heading sensor is bounded: its status is ignored for the
//! first [`SETTLE_WINDOW`] and the wait is abandoned at [`CALIBRATION_CUTOFF`].
//! Nothing in the sequence is fatal; degraded outcomes are reported in the
//! [`CalibrationReport`], logged and raised as blackboard faults.

use std::time::Duration;

use helm_devices::{CalibrationStatus, DeviceError, SharedActuator, SharedHeadingSensor};
use tracing::{debug, info, warn};

use crate::{
    blackboard::{self, Blackboard},
    chassis::DrivetrainConfig,
    clock::Clock,
    sensors::{CalibratedSensors, SensorBundle, TrackingWheel},
};

/// Interval between heading sensor status polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The heading sensor reports "not calibrating" for a moment right after a
/// reset, so its status is not trusted before this.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(2000);

/// Give up waiting on the heading sensor after this.
pub const CALIBRATION_CUTOFF: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    AwaitHeadingSensor,
    BuildDefaultTrackers,
    ResetAll,
    Done,
}

/// How waiting on the heading sensor ended.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadingCalibration {
    Calibrated { took: Duration },
    TimedOut { waited: Duration },
    /// The sensor rejected the reset request.
    ResetFailed(DeviceError),
    /// No heading sensor is configured.
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub heading: HeadingCalibration,
    /// Names of the tracking wheel slots filled in from the drive motors.
    pub synthesized: Vec<&'static str>,
    /// First error hit while zeroing the sensors, if any.
    pub reset_error: Option<DeviceError>,
}

impl CalibrationReport {
    /// Every sensor calibrated and reset without a problem.
    pub fn is_clean(&self) -> bool {
        matches!(self.heading, HeadingCalibration::Calibrated { .. }) && self.reset_error.is_none()
    }
}

pub struct CalibrationSequencer<'a> {
    clock: &'a dyn Clock,
    bb: Option<Blackboard>,
    phase: CalibrationPhase,
}

impl<'a> CalibrationSequencer<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            bb: None,
            phase: CalibrationPhase::AwaitHeadingSensor,
        }
    }

    /// Raise faults for degraded outcomes on this blackboard.
    pub fn with_blackboard(mut self, bb: Blackboard) -> Self {
        self.bb = Some(bb);
        self
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Run the whole sequence. Blocks for up to [`CALIBRATION_CUTOFF`].
    pub fn run(&mut self, bundle: SensorBundle, drivetrain: &DrivetrainConfig) -> (CalibratedSensors, CalibrationReport) {
        info!("Calibrating chassis sensors");

        self.enter(CalibrationPhase::AwaitHeadingSensor);
        let heading = match &bundle.imu {
            Some(imu) => self.await_heading_sensor(imu),
            None => {
                warn!("No heading sensor configured");
                self.fault("heading sensor absent");
                HeadingCalibration::Absent
            }
        };

        self.enter(CalibrationPhase::BuildDefaultTrackers);
        let (sensors, synthesized) = build_default_trackers(bundle, drivetrain);

        self.enter(CalibrationPhase::ResetAll);
        let reset_error = sensors.reset_all().err();
        if let Some(e) = &reset_error {
            warn!(error = %e, "Failed to zero every sensor");
            self.fault("sensor reset failed");
        }

        self.enter(CalibrationPhase::Done);
        let report = CalibrationReport {
            heading,
            synthesized,
            reset_error,
        };
        info!(heading = ?report.heading, synthesized = ?report.synthesized, "Calibration finished");
        (sensors, report)
    }

    fn await_heading_sensor(&self, imu: &SharedHeadingSensor) -> HeadingCalibration {
        if let Err(e) = imu.lock().reset() {
            warn!(error = %e, "Heading sensor rejected reset");
            self.fault("heading sensor reset failed");
            return HeadingCalibration::ResetFailed(e);
        }

        let start = self.clock.now();
        loop {
            self.clock.sleep(POLL_INTERVAL);
            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed < SETTLE_WINDOW {
                continue;
            }
            match imu.lock().calibration_status() {
                Ok(CalibrationStatus::Ready) => {
                    info!(took = ?elapsed, "Heading sensor calibrated");
                    return HeadingCalibration::Calibrated { took: elapsed };
                }
                Ok(CalibrationStatus::Calibrating) => {}
                Err(e) => debug!(error = %e, "Heading sensor status unavailable"),
            }
            if elapsed >= CALIBRATION_CUTOFF {
                warn!(waited = ?elapsed, "Heading sensor calibration timed out");
                self.fault("heading sensor calibration timed out");
                return HeadingCalibration::TimedOut { waited: elapsed };
            }
        }
    }

    fn enter(&mut self, phase: CalibrationPhase) {
        debug!(?phase, "Calibration phase");
        self.phase = phase;
    }

    fn fault(&self, msg: &str) {
        if let Some(bb) = &self.bb {
            blackboard::raise_fault(bb, msg);
        }
    }
}

/// Fill any missing vertical tracking wheel from the drive motor group on
/// its side.
fn build_default_trackers(
    bundle: SensorBundle,
    drivetrain: &DrivetrainConfig,
) -> (CalibratedSensors, Vec<&'static str>) {
    let geometry = drivetrain.geometry();
    let mut synthesized = Vec::new();
    let mut from_motors = |slot: &'static str, group: SharedActuator, offset: f64| {
        info!(slot, offset, "Tracking wheel synthesized from drive motors");
        synthesized.push(slot);
        TrackingWheel::from_motor_group(group, geometry.wheel_diameter, offset, geometry.rpm)
    };

    let vertical1 = match bundle.vertical1 {
        Some(wheel) => wheel,
        None => from_motors("vertical1", drivetrain.left.clone(), -geometry.track_width / 2.0),
    };
    let vertical2 = match bundle.vertical2 {
        Some(wheel) => wheel,
        None => from_motors("vertical2", drivetrain.right.clone(), geometry.track_width / 2.0),
    };

    let sensors = CalibratedSensors {
        vertical1,
        vertical2,
        horizontal1: bundle.horizontal1,
        horizontal2: bundle.horizontal2,
        imu: bundle.imu,
    };
    (sensors, synthesized)
}
