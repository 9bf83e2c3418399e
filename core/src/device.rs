//! Device identity as seen by the invocation core.
//!
//! Device communication lives outside this workspace; the core only needs a stable
//! identity to bind allocated devices to their configuration names.

use std::fmt;

/// A device allocated to an invocation.
pub trait TestDevice: Send + Sync + fmt::Debug {
    /// Serial number uniquely identifying the device on this host.
    fn serial_number(&self) -> &str;
}

/// Placeholder device for invocations that do not need hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullDevice {
    serial: String,
}

impl NullDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl TestDevice for NullDevice {
    fn serial_number(&self) -> &str {
        &self.serial
    }
}
