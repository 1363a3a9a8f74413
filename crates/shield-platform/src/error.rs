//! Platform-specific errors

use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Device node missing or the kernel lacks TUN support
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device creation or configuration failed
    #[error("Device initialization failed: {0}")]
    DeviceInitFailed(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Reading a packet failed
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Writing a packet failed
    #[error("Injection error: {0}")]
    InjectionError(String),

    /// The interface was closed
    #[error("Interface closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PlatformError> for shield_core::Error {
    fn from(err: PlatformError) -> Self {
        shield_core::Error::Interface(err.to_string())
    }
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;
