//! Position-tracking sensors owned by the chassis.
//!
//! A [`SensorBundle`] is what the user hands to the chassis: every slot is
//! optional. Calibration turns it into [`CalibratedSensors`], where both
//! vertical (longitudinal) tracking wheels are guaranteed to exist because any
//! missing one is synthesized from the drive motors.

use std::f64::consts::PI;

use helm_devices::{DeviceError, SharedActuator, SharedEncoder, SharedHeadingSensor};
use tracing::warn;

/// Where a tracking wheel reads its rotation from.
#[derive(Clone)]
pub enum TrackingSource {
    /// A dedicated encoder on an unpowered wheel.
    Encoder(SharedEncoder),
    /// The integrated encoders of a drive motor group.
    MotorGroup(SharedActuator),
}

/// A wheel whose rotation is converted into travelled distance.
#[derive(Clone)]
pub struct TrackingWheel {
    source: TrackingSource,
    diameter: f64,
    offset: f64,
    /// Encoder: encoder turns per wheel turn. Motor group: wheel rpm at the
    /// motors' free speed.
    gearing: f64,
}

impl TrackingWheel {
    /// A tracking wheel on a dedicated encoder.
    ///
    /// # Arguments
    ///
    /// * `encoder`: The encoder measuring the wheel.
    /// * `diameter`: Wheel diameter.
    /// * `offset`: Signed distance from the tracking center; negative is left
    ///   (or back, for horizontal wheels).
    /// * `gear_ratio`: Encoder turns per wheel turn.
    pub fn new(encoder: SharedEncoder, diameter: f64, offset: f64, gear_ratio: f64) -> Self {
        Self {
            source: TrackingSource::Encoder(encoder),
            diameter,
            offset,
            gearing: gear_ratio,
        }
    }

    /// A tracking wheel derived from a drive motor group.
    ///
    /// `rpm` is the wheel speed at the motors' free speed, which gives the
    /// external gearing between motor shaft and wheel.
    pub fn from_motor_group(group: SharedActuator, diameter: f64, offset: f64, rpm: f64) -> Self {
        Self {
            source: TrackingSource::MotorGroup(group),
            diameter,
            offset,
            gearing: rpm,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn is_motor_group(&self) -> bool {
        matches!(self.source, TrackingSource::MotorGroup(_))
    }

    /// Distance travelled by the wheel since the last reset.
    pub fn distance_traveled(&self) -> Result<f64, DeviceError> {
        let circumference = self.diameter * PI;
        match &self.source {
            TrackingSource::Encoder(encoder) => {
                let turns = encoder.lock().position()? / 360.0;
                Ok(turns / self.gearing * circumference)
            }
            TrackingSource::MotorGroup(group) => {
                let group = group.lock();
                let ratio = self.gearing / group.cartridge_rpm();
                let positions = group.positions()?;
                if positions.is_empty() {
                    return Ok(0.0);
                }
                let total: f64 = positions.iter().map(|deg| deg / 360.0 * circumference * ratio).sum();
                Ok(total / positions.len() as f64)
            }
        }
    }

    pub fn reset(&self) -> Result<(), DeviceError> {
        match &self.source {
            TrackingSource::Encoder(encoder) => encoder.lock().reset(),
            TrackingSource::MotorGroup(group) => group.lock().tare_position(),
        }
    }
}

/// Sensors as supplied by the user; any slot may be empty.
#[derive(Clone, Default)]
pub struct SensorBundle {
    pub vertical1: Option<TrackingWheel>,
    pub vertical2: Option<TrackingWheel>,
    pub horizontal1: Option<TrackingWheel>,
    pub horizontal2: Option<TrackingWheel>,
    pub imu: Option<SharedHeadingSensor>,
}

impl SensorBundle {
    /// A bundle with only a heading sensor; both vertical wheels will come
    /// from the drive motors.
    pub fn with_imu(imu: SharedHeadingSensor) -> Self {
        Self { imu: Some(imu), ..Self::default() }
    }
}

/// Sensors after calibration.
#[derive(Clone)]
pub struct CalibratedSensors {
    pub vertical1: TrackingWheel,
    pub vertical2: TrackingWheel,
    pub horizontal1: Option<TrackingWheel>,
    pub horizontal2: Option<TrackingWheel>,
    pub imu: Option<SharedHeadingSensor>,
}

impl CalibratedSensors {
    pub fn tracking_wheels(&self) -> impl Iterator<Item = &TrackingWheel> {
        [Some(&self.vertical1), Some(&self.vertical2), self.horizontal1.as_ref(), self.horizontal2.as_ref()]
            .into_iter()
            .flatten()
    }

    /// Zero every tracking wheel and every reference frame of the heading
    /// sensor.
    ///
    /// Every device is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn reset_all(&self) -> Result<(), DeviceError> {
        let mut first_err = None;
        for wheel in self.tracking_wheels() {
            if let Err(e) = wheel.reset() {
                warn!(error = %e, offset = wheel.offset(), "Failed to reset tracking wheel");
                first_err.get_or_insert(e);
            }
        }
        if let Some(imu) = &self.imu {
            let mut imu = imu.lock();
            let frames = [
                imu.set_heading(0.0),
                imu.set_rotation(0.0),
                imu.set_roll(0.0),
                imu.set_pitch(0.0),
                imu.set_yaw(0.0),
            ];
            for result in frames {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to zero heading sensor frame");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Give the sensors back as a bundle, e.g. to calibrate again.
    pub fn into_bundle(self) -> SensorBundle {
        SensorBundle {
            vertical1: Some(self.vertical1),
            vertical2: Some(self.vertical2),
            horizontal1: self.horizontal1,
            horizontal2: self.horizontal2,
            imu: self.imu,
        }
    }
}
