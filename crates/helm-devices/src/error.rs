//! Error types reported by device drivers.

use core::fmt;

/// Errors a device can report when it is read or commanded.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The device is not plugged in or stopped responding.
    Disconnected(&'static str),
    /// The device is busy (for example still calibrating) and rejected the request.
    Busy(&'static str),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Disconnected(device) => write!(f, "Device disconnected: {}", device),
            DeviceError::Busy(device) => write!(f, "Device busy: {}", device),
        }
    }
}

impl std::error::Error for DeviceError {}
