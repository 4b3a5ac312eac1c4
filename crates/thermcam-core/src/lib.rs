//! thermcam-core — Hardware-free building blocks of the thermal camera stack.
//!
//! Error taxonomy, identity and configuration types, validated camera
//! settings, the AGC engine (linear and histogram equalization), palettes,
//! radiometry and count-domain filters.

pub mod agc;
pub mod error;
pub mod filters;
mod histeq;
pub mod palette;
pub mod radiometry;
pub mod settings;
pub mod types;

pub use agc::{AgcEngine, AgcMetrics};
pub use error::{CameraError, ErrorKind, Result};
pub use settings::{CameraSettings, HistEqAgcParams, LinearAgcParams, ThermographyWindow};
pub use types::{
    ChipId, CorePartNumber, DiscoveryMode, FirmwareVersion, FrameFormat, FrameFormats, IoProperties,
    IoType, ManagerEvent, SerialNumber,
};

/// Library version.
pub mod version {
    pub const MAJOR: u32 = parse(env!("CARGO_PKG_VERSION_MAJOR"));
    pub const MINOR: u32 = parse(env!("CARGO_PKG_VERSION_MINOR"));
    pub const PATCH: u32 = parse(env!("CARGO_PKG_VERSION_PATCH"));

    const fn parse(s: &str) -> u32 {
        let bytes = s.as_bytes();
        let mut v = 0;
        let mut i = 0;
        while i < bytes.len() {
            v = v * 10 + (bytes[i] - b'0') as u32;
            i += 1;
        }
        v
    }

    /// `major.minor.patch`.
    pub fn string() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    #[cfg(test)]
    mod tests {
        #[test]
        fn test_version_matches_package() {
            let expected = format!("{}.{}.{}", super::MAJOR, super::MINOR, super::PATCH);
            assert_eq!(super::string(), expected);
        }
    }
}
