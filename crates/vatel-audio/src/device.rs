use crate::error::DeviceError;
use std::fmt;

/// A running capture or render stream.
///
/// The session only needs to stop devices in a fixed order during shutdown;
/// opening them is backend specific.
pub trait AudioDevice: Send {
    fn name(&self) -> &str;

    /// Stops the stream. Calling it again is a no-op.
    fn stop(&mut self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

impl fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDirection::Input => f.write_str("input"),
            DeviceDirection::Output => f.write_str("output"),
        }
    }
}

/// One host device, as listed for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Whether the device can run at the session sample rate.
    pub supports_session_rate: bool,
}
