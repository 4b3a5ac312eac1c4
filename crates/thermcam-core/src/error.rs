//! Camera error taxonomy.
//!
//! Every fallible call in the workspace returns [`CameraError`]. Each variant
//! carries a stable numeric status code, a coarse [`ErrorKind`] bucket, and a
//! fixed human-readable description.

use std::io;
use thiserror::Error;

/// Result alias used across the thermcam crates.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Coarse classification of a [`CameraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-supplied value out of contract.
    InvalidParameter,
    /// No device, device not found, or device busy.
    DeviceUnavailable,
    /// Transport I/O error, timeout, or interruption.
    Communication,
    /// Out of memory or overflow.
    ResourceExhaustion,
    /// Flash access or host file failure.
    Storage,
    /// Firmware image, key, verification, or sensor protocol failure.
    Protocol,
    /// Operation not valid in the current state.
    State,
    /// Anything else.
    Unknown,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraError {
    #[error("device communication error")]
    DeviceCommunication,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("insufficient permissions")]
    Permissions,
    #[error("no device")]
    NoDevice,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device busy")]
    DeviceBusy,
    #[error("timed out")]
    Timeout,
    #[error("overflow")]
    Overflow,
    #[error("unknown request")]
    UnknownRequest,
    #[error("interrupted")]
    Interrupted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not supported")]
    NotSupported,
    #[error("other error")]
    Other,
    #[error("cannot perform request")]
    CannotPerformRequest,
    #[error("flash access failure")]
    FlashAccessFailure,
    #[error("implementation error")]
    ImplementationError,
    #[error("request pending")]
    RequestPending,
    #[error("invalid firmware image")]
    InvalidFirmwareImage,
    #[error("invalid key")]
    InvalidKey,
    #[error("sensor communication error")]
    SensorCommunication,
    #[error("out of range")]
    OutOfRange,
    #[error("verify failed")]
    VerifyFailed,
    #[error("system call failed")]
    SyscallFailed,
    #[error("file does not exist")]
    FileDoesNotExist,
    #[error("directory does not exist")]
    DirectoryDoesNotExist,
    #[error("file read failed")]
    FileReadFailed,
    #[error("file write failed")]
    FileWriteFailed,
    #[error("not implemented")]
    NotImplemented,
    #[error("not paired")]
    NotPaired,
}

const ALL_ERRORS: [CameraError; 29] = [
    CameraError::DeviceCommunication,
    CameraError::InvalidParameter,
    CameraError::Permissions,
    CameraError::NoDevice,
    CameraError::DeviceNotFound,
    CameraError::DeviceBusy,
    CameraError::Timeout,
    CameraError::Overflow,
    CameraError::UnknownRequest,
    CameraError::Interrupted,
    CameraError::OutOfMemory,
    CameraError::NotSupported,
    CameraError::Other,
    CameraError::CannotPerformRequest,
    CameraError::FlashAccessFailure,
    CameraError::ImplementationError,
    CameraError::RequestPending,
    CameraError::InvalidFirmwareImage,
    CameraError::InvalidKey,
    CameraError::SensorCommunication,
    CameraError::OutOfRange,
    CameraError::VerifyFailed,
    CameraError::SyscallFailed,
    CameraError::FileDoesNotExist,
    CameraError::DirectoryDoesNotExist,
    CameraError::FileReadFailed,
    CameraError::FileWriteFailed,
    CameraError::NotImplemented,
    CameraError::NotPaired,
];

impl CameraError {
    /// Stable numeric status code. Success is 0 and never appears here.
    pub fn code(&self) -> i32 {
        match self {
            Self::DeviceCommunication => -1,
            Self::InvalidParameter => -2,
            Self::Permissions => -3,
            Self::NoDevice => -4,
            Self::DeviceNotFound => -5,
            Self::DeviceBusy => -6,
            Self::Timeout => -7,
            Self::Overflow => -8,
            Self::UnknownRequest => -9,
            Self::Interrupted => -10,
            Self::OutOfMemory => -11,
            Self::NotSupported => -12,
            Self::Other => -99,
            Self::CannotPerformRequest => -103,
            Self::FlashAccessFailure => -104,
            Self::ImplementationError => -105,
            Self::RequestPending => -106,
            Self::InvalidFirmwareImage => -107,
            Self::InvalidKey => -108,
            Self::SensorCommunication => -109,
            Self::OutOfRange => -301,
            Self::VerifyFailed => -302,
            Self::SyscallFailed => -303,
            Self::FileDoesNotExist => -400,
            Self::DirectoryDoesNotExist => -401,
            Self::FileReadFailed => -402,
            Self::FileWriteFailed => -403,
            Self::NotImplemented => -1000,
            Self::NotPaired => -1001,
        }
    }

    /// Look up an error by status code. Unrecognized codes map to `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        ALL_ERRORS.iter().copied().find(|e| e.code() == code)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter | Self::OutOfRange => ErrorKind::InvalidParameter,
            Self::Permissions | Self::NoDevice | Self::DeviceNotFound | Self::DeviceBusy => {
                ErrorKind::DeviceUnavailable
            }
            Self::DeviceCommunication | Self::Timeout | Self::Interrupted | Self::SyscallFailed => {
                ErrorKind::Communication
            }
            Self::Overflow | Self::OutOfMemory => ErrorKind::ResourceExhaustion,
            Self::FlashAccessFailure
            | Self::FileDoesNotExist
            | Self::DirectoryDoesNotExist
            | Self::FileReadFailed
            | Self::FileWriteFailed => ErrorKind::Storage,
            Self::InvalidFirmwareImage
            | Self::InvalidKey
            | Self::VerifyFailed
            | Self::SensorCommunication
            | Self::UnknownRequest => ErrorKind::Protocol,
            Self::NotPaired
            | Self::RequestPending
            | Self::NotSupported
            | Self::NotImplemented
            | Self::CannotPerformRequest => ErrorKind::State,
            Self::Other | Self::ImplementationError => ErrorKind::Unknown,
        }
    }

    /// Stable description, identical to the `Display` output.
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Map a host I/O error raised while reading.
    pub fn from_read(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileDoesNotExist,
            io::ErrorKind::PermissionDenied => Self::Permissions,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::FileReadFailed,
        }
    }

    /// Map a host I/O error raised while writing.
    pub fn from_write(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::DirectoryDoesNotExist,
            io::ErrorKind::PermissionDenied => Self::Permissions,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::FileWriteFailed,
        }
    }
}
