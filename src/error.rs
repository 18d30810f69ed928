use helm_devices::DeviceError;
use helm_kinematics::KinematicsError;
use thiserror::Error;

use crate::chassis::DriveMode;

#[derive(Debug, Error)]
pub enum ChassisError {
    #[error("chassis sensors have not been calibrated")]
    NotCalibrated,

    #[error("{operation} requires {required:?} mode, chassis is in {current:?} mode")]
    ModeConflict {
        operation: &'static str,
        required: DriveMode,
        current: DriveMode,
    },

    #[error("invalid drivetrain geometry: {0}")]
    Geometry(#[from] KinematicsError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
