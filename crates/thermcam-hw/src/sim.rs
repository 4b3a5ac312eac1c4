//! Simulated bus and camera for tests and hardware-free runs.
//!
//! A [`SimCamera`] produces a deterministic synthetic scene (a warm blob
//! drifting over a gentle gradient) with seeded noise, paced at a fixed
//! frame interval. Device memory is held in process. Faults can be armed
//! to fail the next read, write, or stream start.

use crate::transport::{DeviceDescriptor, Enumerator, MemoryRegion, RawFrame, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thermcam_core::types::{AppResourcesRegion, IoProperties, IoType, ShutterMode};
use thermcam_core::{CameraError, ChipId, CorePartNumber, FirmwareVersion, Result, SerialNumber};

static NEXT_ATTACH_ID: AtomicU64 = AtomicU64::new(1);

fn next_attach_id() -> u64 {
    NEXT_ATTACH_ID.fetch_add(1, Ordering::Relaxed)
}

pub const SIM_CORE_PART_NUMBER: &str = "SIM-TC320-RAD";
pub const SIM_WIDTH: usize = 32;
pub const SIM_HEIGHT: usize = 24;

/// Scene baseline, around 25 °C for the simulated sensor profile.
const BASE_COUNTS: i32 = 8192;
const BLOB_COUNTS: f32 = 1200.0;
const NOISE_COUNTS: i32 = 6;
const DIODE_COUNTS: u32 = 4000;
/// Frames between shutter events in auto shutter mode.
pub const AUTO_SHUTTER_FRAMES: u32 = 16;

/// Bytes of factory calibration each simulated sensor ships with.
const FACTORY_CALIBRATION_LEN: usize = 3 * 4096 + 512;

#[derive(Default)]
struct Faults {
    next_read: Option<CameraError>,
    next_write: Option<CameraError>,
    start: Option<CameraError>,
}

struct SimState {
    streaming: bool,
    frame_count: u32,
    next_frame_at: Option<Instant>,
    rng: StdRng,
    scene: Option<Vec<u16>>,
    regions: HashMap<MemoryRegion, Vec<u8>>,
    faults: Faults,
}

pub struct SimCamera {
    descriptor: DeviceDescriptor,
    width: usize,
    height: usize,
    frame_interval: Duration,
    flash_regions: bool,
    attach_id: AtomicU64,
    connected: AtomicBool,
    paired: AtomicBool,
    shutter_count: AtomicU32,
    auto_shutter: AtomicBool,
    state: Mutex<SimState>,
}

impl SimCamera {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        let seed = descriptor
            .chip_id
            .as_bytes()
            .iter()
            .fold(0u64, |h, &b| h.wrapping_mul(31).wrapping_add(b as u64));
        let factory: Vec<u8> = (0..FACTORY_CALIBRATION_LEN)
            .map(|i| (i as u64).wrapping_mul(seed | 1) as u8)
            .collect();
        let mut regions = HashMap::new();
        regions.insert(MemoryRegion::FactoryCalibration, factory);
        Self {
            descriptor,
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
            frame_interval: Duration::from_millis(5),
            flash_regions: true,
            attach_id: AtomicU64::new(next_attach_id()),
            connected: AtomicBool::new(true),
            paired: AtomicBool::new(true),
            shutter_count: AtomicU32::new(0),
            auto_shutter: AtomicBool::new(true),
            state: Mutex::new(SimState {
                streaming: false,
                frame_count: 0,
                next_frame_at: None,
                rng: StdRng::seed_from_u64(seed),
                scene: None,
                regions,
                faults: Faults::default(),
            }),
        }
    }

    fn with_identity(prefix: &str, index: u8, io: IoProperties) -> Self {
        let chip_id = ChipId::new(&format!("{prefix}{index:04X}C1D")).unwrap_or_default();
        let serial_number = SerialNumber::new(&format!("{prefix}SN{index:04}")).unwrap_or_default();
        Self::new(DeviceDescriptor {
            chip_id,
            serial_number,
            core_part_number: CorePartNumber::new(SIM_CORE_PART_NUMBER).unwrap_or_default(),
            firmware_version: FirmwareVersion {
                product: 1,
                variant: 0,
                major: 4,
                minor: 2,
            },
            io,
        })
    }

    /// Canned USB camera on bus 1, port `index + 1`.
    pub fn usb(index: u8) -> Self {
        let mut port_numbers = [0u8; 8];
        port_numbers[0] = index.wrapping_add(1);
        Self::with_identity(
            "E452",
            index,
            IoProperties::Usb {
                bus_number: 1,
                port_numbers,
            },
        )
    }

    /// Canned SPI camera on bus 0, chip select `index`.
    pub fn spi(index: u8) -> Self {
        Self::with_identity(
            "5B1A",
            index,
            IoProperties::Spi {
                bus_number: 0,
                cs_number: index,
            },
        )
    }

    #[must_use]
    pub fn with_resolution(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Start out never paired.
    #[must_use]
    pub fn unpaired(self) -> Self {
        self.paired.store(false, Ordering::SeqCst);
        self
    }

    /// Whether the device carries FSC and app-resource flash regions.
    #[must_use]
    pub fn with_flash_regions(mut self, present: bool) -> Self {
        self.flash_regions = present;
        self
    }

    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock().rng = StdRng::seed_from_u64(seed);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the synthetic scene with fixed counts, or restore it.
    /// Noise is still added on top.
    pub fn set_scene(&self, counts: Option<Vec<u16>>) {
        self.lock().scene = counts;
    }

    pub fn fail_next_read(&self, err: CameraError) {
        self.lock().faults.next_read = Some(err);
    }

    pub fn fail_next_write(&self, err: CameraError) {
        self.lock().faults.next_write = Some(err);
    }

    pub fn fail_start(&self, err: CameraError) {
        self.lock().faults.start = Some(err);
    }

    pub fn shutter_count(&self) -> u32 {
        self.shutter_count.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Raw contents of a device region, for inspection.
    pub fn region(&self, region: MemoryRegion) -> Option<Vec<u8>> {
        self.lock().regions.get(&region).cloned()
    }

    fn plugged(&self) {
        self.attach_id.store(next_attach_id(), Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn unplugged(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut st = self.lock();
        st.streaming = false;
        st.next_frame_at = None;
    }

    fn supports(&self, region: MemoryRegion) -> bool {
        match region {
            MemoryRegion::Firmware | MemoryRegion::Calibration | MemoryRegion::FactoryCalibration => {
                true
            }
            MemoryRegion::FlatSceneCorrection(_) | MemoryRegion::AppResources(_) => {
                self.flash_regions
            }
        }
    }

    fn capacity(region: MemoryRegion) -> usize {
        match region {
            MemoryRegion::AppResources(_) => AppResourcesRegion::MAX_SIZE,
            _ => 16 * 1024 * 1024,
        }
    }

    fn check_io(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CameraError::NoDevice);
        }
        Ok(())
    }

    fn synthesize(&self, st: &mut SimState) -> Vec<u16> {
        let (w, h) = (self.width, self.height);
        let t = st.frame_count as f32 * 0.05;
        let (bx, by) = (
            w as f32 * (0.5 + 0.3 * t.cos()),
            h as f32 * (0.5 + 0.3 * t.sin()),
        );
        let radius2 = ((w.min(h) as f32) / 5.0).max(1.0).powi(2);
        let mut counts = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let base = match &st.scene {
                    Some(scene) => scene.get(y * w + x).copied().unwrap_or(0) as f32,
                    None => {
                        let d2 = (x as f32 - bx).powi(2) + (y as f32 - by).powi(2);
                        BASE_COUNTS as f32
                            + 2.0 * x as f32
                            + 3.0 * y as f32
                            + BLOB_COUNTS * (-d2 / radius2).exp()
                    }
                };
                let noise = st.rng.gen_range(-NOISE_COUNTS..=NOISE_COUNTS);
                counts.push((base as i32 + noise).clamp(0, u16::MAX as i32) as u16);
            }
        }
        counts
    }
}

impl Transport for SimCamera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn attach_id(&self) -> u64 {
        self.attach_id.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_paired(&self) -> bool {
        self.paired.load(Ordering::SeqCst)
    }

    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn start_stream(&self) -> Result<()> {
        self.check_io()?;
        let mut st = self.lock();
        if let Some(err) = st.faults.start.take() {
            return Err(err);
        }
        if st.streaming {
            return Err(CameraError::DeviceBusy);
        }
        st.streaming = true;
        st.next_frame_at = Some(Instant::now());
        Ok(())
    }

    fn stop_stream(&self) -> Result<()> {
        let mut st = self.lock();
        st.streaming = false;
        st.next_frame_at = None;
        Ok(())
    }

    fn read_frame(&self, timeout: Duration) -> Result<RawFrame> {
        self.check_io()?;
        let due = {
            let mut st = self.lock();
            if let Some(err) = st.faults.next_read.take() {
                return Err(err);
            }
            if !st.streaming {
                return Err(CameraError::CannotPerformRequest);
            }
            st.next_frame_at.unwrap_or_else(Instant::now)
        };

        let wait = due.saturating_duration_since(Instant::now());
        if wait > timeout {
            std::thread::sleep(timeout);
            return Err(CameraError::Timeout);
        }
        std::thread::sleep(wait);

        self.check_io()?;
        let mut st = self.lock();
        if !st.streaming {
            return Err(CameraError::Interrupted);
        }
        let floor = Instant::now().checked_sub(self.frame_interval).unwrap_or(due);
        st.next_frame_at = Some(due.max(floor) + self.frame_interval);
        let counts = self.synthesize(&mut st);
        st.frame_count = st.frame_count.wrapping_add(1);
        if self.auto_shutter.load(Ordering::SeqCst) && st.frame_count % AUTO_SHUTTER_FRAMES == 0 {
            self.shutter_count.fetch_add(1, Ordering::SeqCst);
        }
        let diode = DIODE_COUNTS + (st.frame_count / 64) % 8;
        Ok(RawFrame {
            counts,
            width: self.width,
            height: self.height,
            fpa_frame_count: st.frame_count,
            fpa_diode_count: diode,
        })
    }

    fn memory_len(&self, region: MemoryRegion) -> Result<usize> {
        self.check_io()?;
        if !self.supports(region) {
            return Err(CameraError::NotSupported);
        }
        Ok(self.lock().regions.get(&region).map_or(0, Vec::len))
    }

    fn read_memory(&self, region: MemoryRegion, offset: usize, buf: &mut [u8]) -> Result<usize> {
        self.check_io()?;
        if !self.supports(region) {
            return Err(CameraError::NotSupported);
        }
        let mut st = self.lock();
        if let Some(err) = st.faults.next_read.take() {
            return Err(err);
        }
        let Some(data) = st.regions.get(&region) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_memory(&self, region: MemoryRegion, offset: usize, data: &[u8]) -> Result<()> {
        self.check_io()?;
        if !self.supports(region) {
            return Err(CameraError::NotSupported);
        }
        if region == MemoryRegion::FactoryCalibration {
            return Err(CameraError::Permissions);
        }
        let end = offset.checked_add(data.len()).ok_or(CameraError::Overflow)?;
        if end > Self::capacity(region) {
            return Err(CameraError::Overflow);
        }
        let mut st = self.lock();
        if let Some(err) = st.faults.next_write.take() {
            return Err(err);
        }
        let stored = st.regions.entry(region).or_default();
        if stored.len() < end {
            stored.resize(end, 0xFF);
        }
        stored[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn erase_memory(&self, region: MemoryRegion) -> Result<()> {
        self.check_io()?;
        if !self.supports(region) {
            return Err(CameraError::NotSupported);
        }
        if region == MemoryRegion::FactoryCalibration {
            return Err(CameraError::Permissions);
        }
        self.lock().regions.remove(&region);
        if region == MemoryRegion::Calibration {
            self.paired.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn commit_memory(&self, region: MemoryRegion) -> Result<()> {
        self.check_io()?;
        let len = self.lock().regions.get(&region).map_or(0, Vec::len);
        match region {
            MemoryRegion::Firmware if len == 0 => Err(CameraError::InvalidFirmwareImage),
            MemoryRegion::Calibration if len == 0 => Err(CameraError::VerifyFailed),
            MemoryRegion::Calibration => {
                self.paired.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn trigger_shutter(&self) -> Result<()> {
        self.check_io()?;
        self.shutter_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()> {
        self.check_io()?;
        self.auto_shutter
            .store(mode == ShutterMode::Auto, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process bus of one IO type. Attach and detach drive discovery.
pub struct SimBus {
    io_type: IoType,
    attached: Mutex<Vec<Arc<SimCamera>>>,
}

impl SimBus {
    pub fn new(io_type: IoType) -> Self {
        Self {
            io_type,
            attached: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<SimCamera>>> {
        self.attached.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Plug a camera in. Re-plugging a previously detached camera starts a
    /// new attach.
    pub fn attach(&self, camera: Arc<SimCamera>) {
        let mut attached = self.lock();
        if attached.iter().any(|c| Arc::ptr_eq(c, &camera)) {
            return;
        }
        camera.plugged();
        tracing::debug!(
            io = %self.io_type,
            cid = %camera.descriptor.chip_id,
            "sim camera attached"
        );
        attached.push(camera);
    }

    /// Unplug the camera with `chip_id`, returning it for a later re-attach.
    pub fn detach(&self, chip_id: &ChipId) -> Option<Arc<SimCamera>> {
        let mut attached = self.lock();
        let idx = attached
            .iter()
            .position(|c| &c.descriptor.chip_id == chip_id)?;
        let camera = attached.remove(idx);
        camera.unplugged();
        tracing::debug!(io = %self.io_type, cid = %chip_id, "sim camera detached");
        Some(camera)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Enumerator for SimBus {
    fn io_type(&self) -> IoType {
        self.io_type
    }

    fn scan(&self) -> Result<Vec<Arc<dyn Transport>>> {
        Ok(self
            .lock()
            .iter()
            .filter(|c| c.io_type() == self.io_type)
            .map(|c| Arc::clone(c) as Arc<dyn Transport>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(cam: &SimCamera) {
        cam.start_stream().unwrap();
    }

    #[test]
    fn test_canned_identities() {
        let usb = SimCamera::usb(0);
        let spi = SimCamera::spi(3);
        assert_eq!(usb.io_type(), IoType::Usb);
        assert_eq!(spi.io_type(), IoType::Spi);
        assert_ne!(usb.descriptor().chip_id, spi.descriptor().chip_id);
        assert_eq!(usb.descriptor().io.to_string(), "usb 1-1");
        assert_eq!(spi.descriptor().io.to_string(), "spi 0.3");
    }

    #[test]
    fn test_frames_have_geometry_and_counters() {
        let cam = SimCamera::usb(0).with_resolution(8, 6);
        streaming(&cam);
        let a = cam.read_frame(Duration::from_secs(1)).unwrap();
        let b = cam.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!((a.width, a.height, a.counts.len()), (8, 6, 48));
        assert_eq!(b.fpa_frame_count, a.fpa_frame_count + 1);
    }

    #[test]
    fn test_auto_shutter_fires_only_in_auto_mode() {
        let cam = SimCamera::usb(0).with_frame_interval(Duration::from_millis(1));
        streaming(&cam);
        for _ in 0..AUTO_SHUTTER_FRAMES * 2 {
            cam.read_frame(Duration::from_secs(1)).unwrap();
        }
        assert_eq!(cam.shutter_count(), 2);

        cam.set_shutter_mode(ShutterMode::Manual).unwrap();
        for _ in 0..AUTO_SHUTTER_FRAMES * 2 {
            cam.read_frame(Duration::from_secs(1)).unwrap();
        }
        assert_eq!(cam.shutter_count(), 2);
        cam.trigger_shutter().unwrap();
        assert_eq!(cam.shutter_count(), 3);
    }

    #[test]
    fn test_read_requires_stream() {
        let cam = SimCamera::usb(0);
        assert_eq!(
            cam.read_frame(Duration::from_millis(10)).unwrap_err(),
            CameraError::CannotPerformRequest
        );
    }

    #[test]
    fn test_timeout_when_interval_exceeds_budget() {
        let cam = SimCamera::usb(0).with_frame_interval(Duration::from_millis(200));
        streaming(&cam);
        cam.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(
            cam.read_frame(Duration::from_millis(5)).unwrap_err(),
            CameraError::Timeout
        );
    }

    #[test]
    fn test_fixed_scene_with_noise() {
        let cam = SimCamera::usb(0).with_resolution(4, 4);
        cam.set_scene(Some(vec![1000; 16]));
        streaming(&cam);
        let f = cam.read_frame(Duration::from_secs(1)).unwrap();
        assert!(f
            .counts
            .iter()
            .all(|&c| (1000 - NOISE_COUNTS as u16..=1000 + NOISE_COUNTS as u16).contains(&c)));
    }

    #[test]
    fn test_faults_fire_once() {
        let cam = SimCamera::usb(0);
        cam.fail_start(CameraError::SensorCommunication);
        assert_eq!(cam.start_stream(), Err(CameraError::SensorCommunication));
        streaming(&cam);
        cam.fail_next_read(CameraError::DeviceCommunication);
        assert_eq!(
            cam.read_frame(Duration::from_secs(1)).unwrap_err(),
            CameraError::DeviceCommunication
        );
        assert!(cam.read_frame(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_memory_regions() {
        let cam = SimCamera::usb(0);
        let region = MemoryRegion::AppResources(AppResourcesRegion::Region1);
        cam.write_memory(region, 0, b"hello").unwrap();
        cam.write_memory(region, 5, b" world").unwrap();
        let mut buf = [0u8; 32];
        let n = cam.read_memory(region, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(
            cam.write_memory(region, AppResourcesRegion::MAX_SIZE, b"x"),
            Err(CameraError::Overflow)
        );
        assert_eq!(
            cam.write_memory(MemoryRegion::FactoryCalibration, 0, b"x"),
            Err(CameraError::Permissions)
        );
        assert_eq!(
            cam.memory_len(MemoryRegion::FactoryCalibration).unwrap(),
            FACTORY_CALIBRATION_LEN
        );

        let bare = SimCamera::usb(1).with_flash_regions(false);
        assert_eq!(bare.memory_len(region), Err(CameraError::NotSupported));
    }

    #[test]
    fn test_calibration_commit_pairs() {
        let cam = SimCamera::usb(0).unpaired();
        assert!(!cam.is_paired());
        assert_eq!(
            cam.commit_memory(MemoryRegion::Calibration),
            Err(CameraError::VerifyFailed)
        );
        cam.write_memory(MemoryRegion::Calibration, 0, &[1, 2, 3]).unwrap();
        cam.commit_memory(MemoryRegion::Calibration).unwrap();
        assert!(cam.is_paired());
    }

    #[test]
    fn test_bus_attach_detach() {
        let bus = SimBus::new(IoType::Usb);
        let cam = Arc::new(SimCamera::usb(0));
        bus.attach(Arc::clone(&cam));
        assert_eq!(bus.scan().unwrap().len(), 1);
        let first = cam.attach_id();

        let cid = cam.descriptor().chip_id;
        let back = bus.detach(&cid).unwrap();
        assert!(!back.is_connected());
        assert!(bus.is_empty());
        assert_eq!(back.trigger_shutter(), Err(CameraError::NoDevice));

        bus.attach(back);
        assert!(cam.is_connected());
        assert_ne!(cam.attach_id(), first);
    }
}
