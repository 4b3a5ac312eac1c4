//! Identity, transport, frame-format, and configuration types.

use crate::error::{CameraError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-capacity, NUL-terminated ASCII string as stored in device memory
/// and frame headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    /// Build from a string; fails if it does not fit with a NUL terminator
    /// or contains interior NULs.
    pub fn new(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() >= N || bytes.contains(&0) {
            return Err(CameraError::InvalidParameter);
        }
        let mut buf = [0u8; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Build from raw bytes, stopping at the first NUL.
    pub fn from_bytes(raw: &[u8; N]) -> Self {
        let mut buf = *raw;
        if let Some(end) = buf.iter().position(|&b| b == 0) {
            buf[end..].fill(0);
        } else {
            buf[N - 1] = 0;
        }
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Chip identifier (CID): primary identity of a physical sensor.
pub type ChipId = FixedStr<16>;
/// Serial number (SN).
pub type SerialNumber = FixedStr<16>;
/// Core part number (CPN).
pub type CorePartNumber = FixedStr<32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub product: u8,
    pub variant: u8,
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.product, self.variant, self.major, self.minor]
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            product: b[0],
            variant: b[1],
            major: b[2],
            minor: b[3],
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.product, self.variant, self.major, self.minor)
    }
}

/// Transport protocol of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoType {
    Usb = 0x01,
    Spi = 0x02,
}

impl IoType {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(Self::Usb),
            0x02 => Some(Self::Spi),
            _ => None,
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Usb => "USB",
            Self::Spi => "SPI",
        })
    }
}

/// Transport-specific addressing, surfaced read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoProperties {
    /// USB bus number and topology path; unused trailing ports are zero.
    Usb { bus_number: u8, port_numbers: [u8; 8] },
    Spi { bus_number: u8, cs_number: u8 },
}

impl IoProperties {
    pub fn io_type(&self) -> IoType {
        match self {
            Self::Usb { .. } => IoType::Usb,
            Self::Spi { .. } => IoType::Spi,
        }
    }

    pub fn bus_number(&self) -> u8 {
        match self {
            Self::Usb { bus_number, .. } | Self::Spi { bus_number, .. } => *bus_number,
        }
    }
}

impl fmt::Display for IoProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb {
                bus_number,
                port_numbers,
            } => {
                write!(f, "usb {bus_number}")?;
                let mut sep = '-';
                for port in port_numbers.iter().take_while(|&&p| p != 0) {
                    write!(f, "{sep}{port}")?;
                    sep = '.';
                }
                Ok(())
            }
            Self::Spi {
                bus_number,
                cs_number,
            } => write!(f, "spi {bus_number}.{cs_number}"),
        }
    }
}

/// Bitmask of transports the manager should discover on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryMode(u32);

impl DiscoveryMode {
    pub const USB: Self = Self(IoType::Usb as u32);
    pub const SPI: Self = Self(IoType::Spi as u32);
    pub const ALL: Self = Self(IoType::Usb as u32 | IoType::Spi as u32);

    /// Rejects an empty mask or any unrecognized bit.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits == 0 || bits & !Self::ALL.0 != 0 {
            return Err(CameraError::InvalidParameter);
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, io: IoType) -> bool {
        self.0 & io.bits() != 0
    }
}

impl std::ops::BitOr for DiscoveryMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromStr for DiscoveryMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" => Ok(Self::USB),
            "spi" => Ok(Self::SPI),
            "all" => Ok(Self::ALL),
            _ => Err(CameraError::InvalidParameter),
        }
    }
}

/// Output frame format. Several can be requested at once via [`FrameFormats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// Filter-corrected sensor counts, u16.
    Corrected = 0x04,
    /// Raw sensor counts as read from the transport, u16.
    PreAgc = 0x08,
    /// Temperature in the active unit, f32.
    ThermographyFloat = 0x10,
    /// Temperature in Kelvin, unsigned 10.6 fixed point in a u16.
    ThermographyFixed10_6 = 0x20,
    /// AGC output, u8.
    Grayscale = 0x40,
    /// Palette color, bytes B, G, R, A (0xAARRGGBB little-endian).
    ColorArgb8888 = 0x80,
    /// Palette color, u16 5-6-5.
    ColorRgb565 = 0x100,
    /// Palette color, bytes V, U, Y, A.
    ColorAyuv = 0x200,
    /// Palette color, 4:2:2 packed Y0 U Y1 V.
    ColorYuy2 = 0x400,
}

impl FrameFormat {
    pub const ALL: [FrameFormat; 9] = [
        Self::Corrected,
        Self::PreAgc,
        Self::ThermographyFloat,
        Self::ThermographyFixed10_6,
        Self::Grayscale,
        Self::ColorArgb8888,
        Self::ColorRgb565,
        Self::ColorAyuv,
        Self::ColorYuy2,
    ];

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.bits() == bits)
    }

    /// Number of samples stored per pixel.
    pub fn channels(self) -> u8 {
        match self {
            Self::ColorArgb8888 | Self::ColorAyuv => 4,
            Self::ColorYuy2 => 2,
            _ => 1,
        }
    }

    /// Bits per channel sample.
    pub fn pixel_depth(self) -> u8 {
        match self {
            Self::ThermographyFloat => 32,
            Self::Corrected | Self::PreAgc | Self::ThermographyFixed10_6 | Self::ColorRgb565 => 16,
            Self::Grayscale | Self::ColorArgb8888 | Self::ColorAyuv | Self::ColorYuy2 => 8,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.channels() as usize * (self.pixel_depth() as usize / 8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Corrected => "corrected",
            Self::PreAgc => "pre_agc",
            Self::ThermographyFloat => "thermography_float",
            Self::ThermographyFixed10_6 => "thermography_fixed_10_6",
            Self::Grayscale => "grayscale",
            Self::ColorArgb8888 => "color_argb8888",
            Self::ColorRgb565 => "color_rgb565",
            Self::ColorAyuv => "color_ayuv",
            Self::ColorYuy2 => "color_yuy2",
        }
    }
}

impl FromStr for FrameFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or(CameraError::InvalidParameter)
    }
}

/// Set of requested output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFormats(u32);

impl FrameFormats {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps the recognized bits; fails if none remain.
    pub fn from_bits(bits: u32) -> Result<Self> {
        let known = FrameFormat::ALL.iter().fold(0, |acc, f| acc | f.bits());
        let masked = bits & known;
        if masked == 0 {
            return Err(CameraError::InvalidParameter);
        }
        Ok(Self(masked))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, format: FrameFormat) -> bool {
        self.0 & format.bits() != 0
    }

    pub fn with(self, format: FrameFormat) -> Self {
        Self(self.0 | format.bits())
    }

    pub fn iter(self) -> impl Iterator<Item = FrameFormat> {
        FrameFormat::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<FrameFormat> for FrameFormats {
    fn from(f: FrameFormat) -> Self {
        Self(f.bits())
    }
}

impl std::ops::BitOr<FrameFormat> for FrameFormats {
    type Output = Self;
    fn bitor(self, rhs: FrameFormat) -> Self {
        self.with(rhs)
    }
}

impl std::ops::BitOr for FrameFormat {
    type Output = FrameFormats;
    fn bitor(self, rhs: Self) -> FrameFormats {
        FrameFormats::from(self).with(rhs)
    }
}

impl FromIterator<FrameFormat> for FrameFormats {
    fn from_iter<I: IntoIterator<Item = FrameFormat>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPalette {
    #[default]
    WhiteHot = 0,
    BlackHot,
    Spectra,
    Prism,
    Tyrian,
    Iron,
    Amber,
    Hi,
    Green,
    User0,
    User1,
    User2,
    User3,
    User4,
}

impl ColorPalette {
    pub const ALL: [ColorPalette; 14] = [
        Self::WhiteHot,
        Self::BlackHot,
        Self::Spectra,
        Self::Prism,
        Self::Tyrian,
        Self::Iron,
        Self::Amber,
        Self::Hi,
        Self::Green,
        Self::User0,
        Self::User1,
        Self::User2,
        Self::User3,
        Self::User4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::WhiteHot => "white hot",
            Self::BlackHot => "black hot",
            Self::Spectra => "spectra",
            Self::Prism => "prism",
            Self::Tyrian => "tyrian",
            Self::Iron => "iron",
            Self::Amber => "amber",
            Self::Hi => "hi",
            Self::Green => "green",
            Self::User0 => "user 0",
            Self::User1 => "user 1",
            Self::User2 => "user 2",
            Self::User3 => "user 3",
            Self::User4 => "user 4",
        }
    }

    pub fn is_user(self) -> bool {
        self.user_index().is_some()
    }

    /// Index into the user palette slots, for user palettes only.
    pub fn user_index(self) -> Option<usize> {
        match self {
            Self::User0 => Some(0),
            Self::User1 => Some(1),
            Self::User2 => Some(2),
            Self::User3 => Some(3),
            Self::User4 => Some(4),
            _ => None,
        }
    }

    /// Next palette in declaration order, wrapping around.
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|&p| p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgcMode {
    #[default]
    Linear = 0,
    HistEq = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearAgcLockMode {
    /// Both bounds track the frame extrema.
    #[default]
    Auto = 0,
    /// Both bounds are operator supplied.
    Manual,
    /// Fixed minimum, tracked maximum.
    ManualMin,
    /// Tracked minimum, fixed maximum.
    ManualMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistEqGainLimitFactorMode {
    #[default]
    Auto = 0,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistEqPlateauRedistributionMode {
    /// Counts above the plateau are discarded.
    Disabled = 0,
    /// Clipped counts are spread evenly over every bin.
    AllBins,
    /// Clipped counts are spread over occupied bins below the plateau.
    #[default]
    ActiveBinsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterMode {
    #[default]
    Auto = 0,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    #[default]
    Celsius = 0,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn from_celsius(self, c: f32) -> f32 {
        match self {
            Self::Celsius => c,
            Self::Fahrenheit => c * 9.0 / 5.0 + 32.0,
            Self::Kelvin => c + 273.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    GradientCorrection = 0,
    FlatSceneCorrection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterState {
    Disabled = 0,
    #[default]
    Enabled,
}

impl FilterState {
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

/// Flat scene correction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FscId {
    #[default]
    Id0 = 0,
}

impl FscId {
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Application resource region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppResourcesRegion {
    Region0 = 11,
    Region1,
    Region2,
}

impl AppResourcesRegion {
    /// Capacity of every region.
    pub const MAX_SIZE: usize = 64 * 1024;

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Camera manager event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerEvent {
    /// Camera is usable.
    Connect,
    /// Transport lost; the handle is invalid from now on.
    Disconnect,
    /// Background fault unrelated to a lifecycle transition.
    Error,
    /// Camera detected but never paired; store calibration data first.
    ReadyToPair,
}

impl ManagerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::ReadyToPair => "ready to pair",
        }
    }
}

impl fmt::Display for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_str_fits() {
        let cid = ChipId::new("E452B0A1C3D4").unwrap();
        assert_eq!(cid.as_str(), "E452B0A1C3D4");
        assert_eq!(cid.to_string(), "E452B0A1C3D4");
        assert!(!cid.is_empty());
        assert!(ChipId::default().is_empty());
    }

    #[test]
    fn test_fixed_str_rejects_overflow() {
        // 16 bytes leaves no room for the terminator
        assert_eq!(
            ChipId::new("0123456789ABCDEF"),
            Err(CameraError::InvalidParameter)
        );
        assert!(ChipId::new("0123456789ABCDE").is_ok());
        assert!(ChipId::new("a\0b").is_err());
    }

    #[test]
    fn test_fixed_str_from_bytes_truncates_at_nul() {
        let mut raw = [b'x'; 16];
        raw[3] = 0;
        let s = ChipId::from_bytes(&raw);
        assert_eq!(s.as_str(), "xxx");
        assert_eq!(s.as_bytes()[4], 0);
    }

    #[test]
    fn test_discovery_mode_validation() {
        assert_eq!(DiscoveryMode::from_bits(0), Err(CameraError::InvalidParameter));
        assert_eq!(DiscoveryMode::from_bits(0x04), Err(CameraError::InvalidParameter));
        assert_eq!(DiscoveryMode::from_bits(0x03).unwrap(), DiscoveryMode::ALL);
        let usb = DiscoveryMode::from_bits(0x01).unwrap();
        assert!(usb.contains(IoType::Usb));
        assert!(!usb.contains(IoType::Spi));
        assert_eq!("all".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::ALL);
    }

    #[test]
    fn test_frame_formats_mask() {
        assert_eq!(FrameFormats::from_bits(0), Err(CameraError::InvalidParameter));
        assert_eq!(FrameFormats::from_bits(0x1), Err(CameraError::InvalidParameter));
        let fmts = FrameFormats::from_bits(0x40 | 0x80 | 0x1).unwrap();
        assert_eq!(fmts.bits(), 0xC0);
        let listed: Vec<_> = fmts.iter().collect();
        assert_eq!(listed, vec![FrameFormat::Grayscale, FrameFormat::ColorArgb8888]);
        assert_eq!(
            FrameFormat::Grayscale | FrameFormat::PreAgc,
            FrameFormats::from_bits(0x48).unwrap()
        );
    }

    #[test]
    fn test_frame_format_geometry() {
        assert_eq!(FrameFormat::ColorArgb8888.bytes_per_pixel(), 4);
        assert_eq!(FrameFormat::ColorYuy2.bytes_per_pixel(), 2);
        assert_eq!(FrameFormat::ColorRgb565.bytes_per_pixel(), 2);
        assert_eq!(FrameFormat::ThermographyFloat.bytes_per_pixel(), 4);
        assert_eq!(FrameFormat::Grayscale.bytes_per_pixel(), 1);
        assert_eq!("color_yuy2".parse::<FrameFormat>(), Ok(FrameFormat::ColorYuy2));
        assert!("bogus".parse::<FrameFormat>().is_err());
    }

    #[test]
    fn test_io_properties_display() {
        let usb = IoProperties::Usb {
            bus_number: 1,
            port_numbers: [2, 4, 0, 0, 0, 0, 0, 0],
        };
        assert_eq!(usb.to_string(), "usb 1-2.4");
        assert_eq!(usb.io_type(), IoType::Usb);
        let spi = IoProperties::Spi {
            bus_number: 0,
            cs_number: 1,
        };
        assert_eq!(spi.to_string(), "spi 0.1");
    }

    #[test]
    fn test_palette_helpers() {
        assert!(ColorPalette::User2.is_user());
        assert_eq!(ColorPalette::User2.user_index(), Some(2));
        assert!(!ColorPalette::Iron.is_user());
        assert_eq!(ColorPalette::User4.next(), ColorPalette::WhiteHot);
        assert_eq!(ColorPalette::Iron.name(), "iron");
    }

    #[test]
    fn test_temperature_units() {
        assert_eq!(TemperatureUnit::Celsius.from_celsius(20.0), 20.0);
        assert!((TemperatureUnit::Fahrenheit.from_celsius(100.0) - 212.0).abs() < 1e-4);
        assert!((TemperatureUnit::Kelvin.from_celsius(0.0) - 273.15).abs() < 1e-4);
    }
}
