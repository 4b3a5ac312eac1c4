//! Transport contracts between the device manager and a physical channel.
//!
//! A [`Transport`] is one attached device. An [`Enumerator`] scans one bus
//! type and returns the transports currently attached to it. Both are
//! implemented by the simulated bus in [`crate::sim`]; real USB and SPI
//! drivers plug in behind the same traits.

use std::sync::Arc;
use std::time::Duration;
use thermcam_core::types::{AppResourcesRegion, FscId, IoProperties, IoType, ShutterMode};
use thermcam_core::{ChipId, CorePartNumber, FirmwareVersion, Result, SerialNumber};

/// One raw acquisition from the focal plane array.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Row-major raw counts, `width * height` samples.
    pub counts: Vec<u16>,
    pub width: usize,
    pub height: usize,
    pub fpa_frame_count: u32,
    pub fpa_diode_count: u32,
}

/// Identity reported by a device once the transport is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub chip_id: ChipId,
    pub serial_number: SerialNumber,
    pub core_part_number: CorePartNumber,
    pub firmware_version: FirmwareVersion,
    pub io: IoProperties,
}

/// Non-volatile storage areas reachable through a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    Firmware,
    /// Processor-side calibration written during pairing.
    Calibration,
    /// Read-only sensor calibration installed at the factory.
    FactoryCalibration,
    FlatSceneCorrection(FscId),
    AppResources(AppResourcesRegion),
}

pub trait Transport: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Identifies one physical attach. A detach followed by a re-attach of
    /// the same sensor yields a new value.
    fn attach_id(&self) -> u64;

    fn io_type(&self) -> IoType {
        self.descriptor().io.io_type()
    }

    fn is_connected(&self) -> bool;

    /// Sensor geometry as `(width, height)`.
    fn resolution(&self) -> (usize, usize);

    /// Whether calibration pairing has completed on this device.
    fn is_paired(&self) -> bool;

    fn start_stream(&self) -> Result<()>;
    fn stop_stream(&self) -> Result<()>;

    /// Block until the next raw frame or `timeout`.
    fn read_frame(&self, timeout: Duration) -> Result<RawFrame>;

    /// Current length of a region, `NotSupported` if the device lacks it.
    fn memory_len(&self, region: MemoryRegion) -> Result<usize>;
    fn read_memory(&self, region: MemoryRegion, offset: usize, buf: &mut [u8]) -> Result<usize>;
    fn write_memory(&self, region: MemoryRegion, offset: usize, data: &[u8]) -> Result<()>;
    fn erase_memory(&self, region: MemoryRegion) -> Result<()>;

    /// Seal a write sequence: flips the paired flag after calibration and
    /// activates a staged firmware image.
    fn commit_memory(&self, region: MemoryRegion) -> Result<()>;

    fn trigger_shutter(&self) -> Result<()>;

    /// In `Auto` the device recalibrates with its shutter on its own
    /// schedule; in `Manual` only [`Transport::trigger_shutter`] fires it.
    fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()>;
}

/// Scans one bus type for attached devices.
pub trait Enumerator: Send + Sync {
    fn io_type(&self) -> IoType;
    fn scan(&self) -> Result<Vec<Arc<dyn Transport>>>;
}
