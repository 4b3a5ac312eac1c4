//! Camera handle: identity, configuration accessors and capture control.
//!
//! A [`Camera`] is a cheap clone of a shared per-device record owned by the
//! manager. It is valid from CONNECT (or READY_TO_PAIR) until the matching
//! DISCONNECT; afterwards every accessor returns `NoDevice`, even when the
//! same sensor is plugged back in.

use crate::frame::{plane_geometry, FrameLock};
use crate::manager::Dispatch;
use crate::observer::Subscription;
use crate::profiles::{lookup_profile, SensorProfile};
use crate::session::{CaptureSession, SessionState, SessionStats};
use crate::transport::{DeviceDescriptor, Transport};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thermcam_core::filters::FlatSceneCorrection;
use thermcam_core::palette::{PaletteData, Palettes};
use thermcam_core::types::{
    AgcMode, ColorPalette, Filter, FilterState, FscId, HistEqGainLimitFactorMode,
    HistEqPlateauRedistributionMode, IoType, LinearAgcLockMode, ManagerEvent, ShutterMode,
    TemperatureUnit,
};
use thermcam_core::{
    CameraError, CameraSettings, ChipId, CorePartNumber, FirmwareVersion, FrameFormats,
    IoProperties, Result, SerialNumber, ThermographyWindow,
};
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle of one physical attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraState {
    /// Detected but never paired; only calibration storage is allowed.
    NeedsPairing,
    Connected,
    /// Terminal. The handle stays invalid from here on.
    Disconnected,
}

pub(crate) struct CameraShared {
    transport: Arc<dyn Transport>,
    descriptor: DeviceDescriptor,
    attach_id: u64,
    profile: &'static SensorProfile,
    valid: AtomicBool,
    lifecycle: Mutex<CameraState>,
    settings: Mutex<CameraSettings>,
    palettes: Mutex<Palettes>,
    fsc: Mutex<Option<FlatSceneCorrection>>,
    session: CaptureSession,
    host_cache_dir: Option<PathBuf>,
    events: UnboundedSender<Dispatch>,
}

#[derive(Clone)]
pub struct Camera {
    shared: Arc<CameraShared>,
}

impl PartialEq for Camera {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Camera {}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("cid", &self.shared.descriptor.chip_id)
            .field("io", &self.shared.descriptor.io)
            .field("attach_id", &self.shared.attach_id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Camera {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        host_cache_dir: Option<PathBuf>,
        events: UnboundedSender<Dispatch>,
    ) -> Self {
        let descriptor = transport.descriptor().clone();
        let attach_id = transport.attach_id();
        let profile = lookup_profile(&descriptor.core_part_number);
        let state = if transport.is_paired() {
            CameraState::Connected
        } else {
            CameraState::NeedsPairing
        };
        tracing::debug!(
            cid = %descriptor.chip_id,
            cpn = %descriptor.core_part_number,
            profile = %profile.sensor.name,
            "camera record created"
        );
        Self {
            shared: Arc::new(CameraShared {
                transport,
                descriptor,
                attach_id,
                profile,
                valid: AtomicBool::new(true),
                lifecycle: Mutex::new(state),
                settings: Mutex::new(CameraSettings::default()),
                palettes: Mutex::new(Palettes::new()),
                fsc: Mutex::new(None),
                session: CaptureSession::new(),
                host_cache_dir,
                events,
            }),
        }
    }

    // Crate-internal plumbing used by the session, manager and transfers.

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    pub(crate) fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    pub(crate) fn profile(&self) -> &'static SensorProfile {
        self.shared.profile
    }

    pub(crate) fn session(&self) -> &CaptureSession {
        &self.shared.session
    }

    pub(crate) fn host_cache_dir(&self) -> Option<&Path> {
        self.shared.host_cache_dir.as_deref()
    }

    pub(crate) fn settings_snapshot(&self) -> CameraSettings {
        lock(&self.shared.settings).clone()
    }

    pub(crate) fn lock_palettes(&self) -> MutexGuard<'_, Palettes> {
        lock(&self.shared.palettes)
    }

    pub(crate) fn lock_fsc(&self) -> MutexGuard<'_, Option<FlatSceneCorrection>> {
        lock(&self.shared.fsc)
    }

    pub(crate) fn check_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CameraError::NoDevice)
        }
    }

    /// `DeviceBusy` while a capture session runs.
    pub(crate) fn check_idle(&self) -> Result<()> {
        self.check_valid()?;
        if self.session().state() != SessionState::Stopped {
            return Err(CameraError::DeviceBusy);
        }
        Ok(())
    }

    fn emit(&self, event: ManagerEvent, status: Option<CameraError>) {
        let _ = self.shared.events.send(Dispatch::Event {
            camera: self.clone(),
            event,
            status,
        });
    }

    /// Queue a background fault as an ERROR event.
    pub(crate) fn report_error(&self, err: CameraError) {
        self.emit(ManagerEvent::Error, Some(err));
    }

    /// Queue the discovery event matching the current state.
    pub(crate) fn announce(&self) {
        let state = lock(&self.shared.lifecycle);
        match *state {
            CameraState::NeedsPairing => self.emit(ManagerEvent::ReadyToPair, None),
            CameraState::Connected => self.emit(ManagerEvent::Connect, None),
            CameraState::Disconnected => {}
        }
    }

    /// NEEDS_PAIRING to CONNECTED once calibration is committed.
    pub(crate) fn mark_paired(&self) {
        let mut state = lock(&self.shared.lifecycle);
        if *state == CameraState::NeedsPairing {
            *state = CameraState::Connected;
            tracing::info!(cid = %self.chip_id(), "camera paired");
        }
    }

    /// Force-stop capture, invalidate the handle and queue DISCONNECT.
    /// Idempotent.
    pub(crate) fn disconnect(&self) {
        let first = {
            let mut state = lock(&self.shared.lifecycle);
            let first = *state != CameraState::Disconnected;
            *state = CameraState::Disconnected;
            self.shared.valid.store(false, Ordering::Release);
            first
        };
        // No start can slip in past this point, so the session stays down.
        self.session().stop();
        if first {
            self.emit(ManagerEvent::Disconnect, None);
        }
    }

    /// Reload a previously stored flat scene correction, device first.
    pub(crate) fn restore_flat_scene_correction(&self) {
        let (w, h) = self.resolution();
        match self.read_flat_scene_correction(FscId::Id0) {
            Ok(Some(fsc)) if fsc.width() == w && fsc.height() == h => {
                tracing::debug!(cid = %self.chip_id(), "flat scene correction restored");
                *self.lock_fsc() = Some(fsc);
            }
            Ok(Some(_)) => {
                tracing::warn!(cid = %self.chip_id(), "stored flat scene correction has wrong geometry, ignoring");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(cid = %self.chip_id(), error = %err, "no usable flat scene correction");
            }
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CameraSettings) -> T) -> Result<T> {
        self.check_valid()?;
        Ok(f(&lock(&self.shared.settings)))
    }

    fn update(&self, f: impl FnOnce(&mut CameraSettings) -> Result<()>) -> Result<()> {
        self.check_valid()?;
        f(&mut lock(&self.shared.settings))
    }

    // Identity.

    pub fn chip_id(&self) -> ChipId {
        self.shared.descriptor.chip_id
    }

    pub fn serial_number(&self) -> SerialNumber {
        self.shared.descriptor.serial_number
    }

    pub fn core_part_number(&self) -> CorePartNumber {
        self.shared.descriptor.core_part_number
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.shared.descriptor.firmware_version
    }

    pub fn io_type(&self) -> IoType {
        self.shared.descriptor.io.io_type()
    }

    pub fn io_properties(&self) -> IoProperties {
        self.shared.descriptor.io
    }

    /// Identifies this physical attach; a re-attach of the same sensor gets
    /// a new one.
    pub fn attach_id(&self) -> u64 {
        self.shared.attach_id
    }

    /// Sensor geometry as `(width, height)`.
    pub fn resolution(&self) -> (usize, usize) {
        self.shared.transport.resolution()
    }

    /// Name of the matched sensor profile.
    pub fn sensor_name(&self) -> &'static str {
        &self.shared.profile.sensor.name
    }

    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CameraState {
        *lock(&self.shared.lifecycle)
    }

    // Capture.

    /// Start streaming `formats`. Unknown format bits must already be
    /// masked off by [`FrameFormats::from_bits`].
    pub fn capture_session_start(&self, formats: FrameFormats) -> Result<()> {
        if formats.is_empty() {
            return Err(CameraError::InvalidParameter);
        }
        let (width, height) = self.resolution();
        for format in formats.iter() {
            plane_geometry(format, width, height)?;
        }
        // Held across the start so a concurrent disconnect either sees the
        // new session or keeps it from starting.
        let state = lock(&self.shared.lifecycle);
        match *state {
            CameraState::NeedsPairing => return Err(CameraError::NotPaired),
            CameraState::Disconnected => return Err(CameraError::NoDevice),
            CameraState::Connected => {}
        }
        self.session().start(self, formats)?;
        drop(state);
        tracing::debug!(cid = %self.chip_id(), formats = formats.bits(), "capture session starting");
        Ok(())
    }

    /// Stop streaming and wait for the acquisition thread. Stopping a
    /// stopped session, or a disconnected camera's, is a no-op.
    pub fn capture_session_stop(&self) -> Result<()> {
        self.session().stop();
        Ok(())
    }

    pub fn capture_session_state(&self) -> Result<SessionState> {
        self.check_valid()?;
        Ok(self.session().state())
    }

    /// Whether a capture session is starting or streaming.
    pub fn is_active(&self) -> Result<bool> {
        Ok(matches!(
            self.capture_session_state()?,
            SessionState::Starting | SessionState::Streaming
        ))
    }

    pub fn session_stats(&self) -> Result<SessionStats> {
        self.check_valid()?;
        Ok(self.session().stats())
    }

    /// Subscribe to frames. Callbacks run on the acquisition thread in
    /// registration order; dropping the returned handle unsubscribes.
    pub fn register_frame_callback<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Camera, &FrameLock) + Send + Sync + 'static,
    {
        self.session().subscribe(Arc::new(callback))
    }

    /// Lock the most recently published frame, if any.
    pub fn latest_frame(&self) -> Option<FrameLock> {
        self.session().latest()
    }

    /// Wait for a frame not yet taken through this method or
    /// [`Camera::latest_frame`].
    pub fn wait_frame(&self, timeout: Duration) -> Result<FrameLock> {
        if !self.is_active()? {
            return Err(CameraError::CannotPerformRequest);
        }
        self.session().wait(timeout)
    }

    // Configuration. Values apply from the next frame on.

    pub fn settings(&self) -> Result<CameraSettings> {
        self.read(CameraSettings::clone)
    }

    /// Replace every setting at once after validating the whole set.
    pub fn apply_settings(&self, settings: CameraSettings) -> Result<()> {
        settings.validate()?;
        if let Some(window) = settings.configured_thermography_window() {
            let (w, h) = self.resolution();
            window.validate(w, h)?;
        }
        self.update(|s| {
            if settings.shutter_mode() != s.shutter_mode() {
                self.shared.transport.set_shutter_mode(settings.shutter_mode())?;
            }
            *s = settings;
            Ok(())
        })
    }

    pub fn agc_mode(&self) -> Result<AgcMode> {
        self.read(CameraSettings::agc_mode)
    }

    pub fn set_agc_mode(&self, mode: AgcMode) -> Result<()> {
        self.update(|s| {
            s.set_agc_mode(mode);
            Ok(())
        })
    }

    pub fn linear_agc_lock_mode(&self) -> Result<LinearAgcLockMode> {
        self.read(|s| s.linear().lock_mode())
    }

    pub fn set_linear_agc_lock_mode(&self, mode: LinearAgcLockMode) -> Result<()> {
        self.update(|s| {
            s.linear_mut().set_lock_mode(mode);
            Ok(())
        })
    }

    pub fn linear_agc_lock_min(&self) -> Result<u32> {
        self.read(|s| s.linear().lock_min())
    }

    pub fn set_linear_agc_lock_min(&self, v: u32) -> Result<()> {
        self.update(|s| s.linear_mut().set_lock_min(v))
    }

    pub fn linear_agc_lock_max(&self) -> Result<u32> {
        self.read(|s| s.linear().lock_max())
    }

    pub fn set_linear_agc_lock_max(&self, v: u32) -> Result<()> {
        self.update(|s| s.linear_mut().set_lock_max(v))
    }

    pub fn histeq_agc_plateau(&self) -> Result<f32> {
        self.read(|s| s.histeq().plateau())
    }

    pub fn set_histeq_agc_plateau(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_plateau(v))
    }

    pub fn histeq_agc_plateau_redistribution_mode(&self) -> Result<HistEqPlateauRedistributionMode> {
        self.read(|s| s.histeq().plateau_redistribution_mode())
    }

    pub fn set_histeq_agc_plateau_redistribution_mode(
        &self,
        mode: HistEqPlateauRedistributionMode,
    ) -> Result<()> {
        self.update(|s| {
            s.histeq_mut().set_plateau_redistribution_mode(mode);
            Ok(())
        })
    }

    pub fn histeq_agc_gain_limit(&self) -> Result<f32> {
        self.read(|s| s.histeq().gain_limit())
    }

    pub fn set_histeq_agc_gain_limit(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_gain_limit(v))
    }

    pub fn histeq_agc_gain_limit_factor_mode(&self) -> Result<HistEqGainLimitFactorMode> {
        self.read(|s| s.histeq().gain_limit_factor_mode())
    }

    pub fn set_histeq_agc_gain_limit_factor_mode(&self, mode: HistEqGainLimitFactorMode) -> Result<()> {
        self.update(|s| {
            s.histeq_mut().set_gain_limit_factor_mode(mode);
            Ok(())
        })
    }

    pub fn histeq_agc_gain_limit_factor_ymin(&self) -> Result<f32> {
        self.read(|s| s.histeq().gain_limit_factor_ymin())
    }

    pub fn set_histeq_agc_gain_limit_factor_ymin(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_gain_limit_factor_ymin(v))
    }

    pub fn histeq_agc_gain_limit_factor_xmax(&self) -> Result<u32> {
        self.read(|s| s.histeq().gain_limit_factor_xmax())
    }

    pub fn set_histeq_agc_gain_limit_factor_xmax(&self, v: u32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_gain_limit_factor_xmax(v))
    }

    pub fn histeq_agc_alpha_time_seconds(&self) -> Result<f32> {
        self.read(|s| s.histeq().alpha_time_seconds())
    }

    pub fn set_histeq_agc_alpha_time_seconds(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_alpha_time_seconds(v))
    }

    pub fn histeq_agc_trim_left(&self) -> Result<f32> {
        self.read(|s| s.histeq().trim_left())
    }

    pub fn set_histeq_agc_trim_left(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_trim_left(v))
    }

    pub fn histeq_agc_trim_right(&self) -> Result<f32> {
        self.read(|s| s.histeq().trim_right())
    }

    pub fn set_histeq_agc_trim_right(&self, v: f32) -> Result<()> {
        self.update(|s| s.histeq_mut().set_trim_right(v))
    }

    pub fn color_palette(&self) -> Result<ColorPalette> {
        self.read(CameraSettings::color_palette)
    }

    pub fn set_color_palette(&self, palette: ColorPalette) -> Result<()> {
        self.update(|s| {
            s.set_color_palette(palette);
            Ok(())
        })
    }

    /// Replace one of the user palettes. Entries are b, g, r, a.
    pub fn set_color_palette_data(&self, palette: ColorPalette, data: &PaletteData) -> Result<()> {
        self.check_valid()?;
        self.lock_palettes().set_user(palette, data)
    }

    pub fn shutter_mode(&self) -> Result<ShutterMode> {
        self.read(CameraSettings::shutter_mode)
    }

    /// Takes effect on the device immediately, streaming or not.
    pub fn set_shutter_mode(&self, mode: ShutterMode) -> Result<()> {
        self.update(|s| {
            self.shared.transport.set_shutter_mode(mode)?;
            s.set_shutter_mode(mode);
            Ok(())
        })
    }

    /// Fire the shutter now, whatever the shutter mode.
    pub fn shutter_trigger(&self) -> Result<()> {
        self.check_valid()?;
        self.shared.transport.trigger_shutter()
    }

    pub fn temperature_unit(&self) -> Result<TemperatureUnit> {
        self.read(CameraSettings::temperature_unit)
    }

    pub fn set_temperature_unit(&self, unit: TemperatureUnit) -> Result<()> {
        self.update(|s| {
            s.set_temperature_unit(unit);
            Ok(())
        })
    }

    pub fn scene_emissivity(&self) -> Result<f32> {
        self.read(CameraSettings::scene_emissivity)
    }

    pub fn set_scene_emissivity(&self, v: f32) -> Result<()> {
        self.update(|s| s.set_scene_emissivity(v))
    }

    pub fn thermography_offset(&self) -> Result<f32> {
        self.read(CameraSettings::thermography_offset)
    }

    pub fn set_thermography_offset(&self, v: f32) -> Result<()> {
        self.update(|s| s.set_thermography_offset(v))
    }

    /// Active window; the full sensor unless one was set.
    pub fn thermography_window(&self) -> Result<ThermographyWindow> {
        let (w, h) = self.resolution();
        self.read(|s| s.thermography_window(w, h))
    }

    pub fn set_thermography_window(&self, window: ThermographyWindow) -> Result<()> {
        let (w, h) = self.resolution();
        self.update(|s| s.set_thermography_window(window, w, h))
    }

    pub fn filter_state(&self, filter: Filter) -> Result<FilterState> {
        self.read(|s| s.filter_state(filter))
    }

    pub fn set_filter_state(&self, filter: Filter, state: FilterState) -> Result<()> {
        self.update(|s| {
            s.set_filter_state(filter, state);
            Ok(())
        })
    }

    /// Whether a flat scene correction is loaded.
    pub fn has_flat_scene_correction(&self) -> Result<bool> {
        self.check_valid()?;
        Ok(self.lock_fsc().is_some())
    }
}

#[cfg(test)]
pub(crate) fn test_camera(
    sim: crate::sim::SimCamera,
) -> (
    Camera,
    Arc<crate::sim::SimCamera>,
    tokio::sync::mpsc::UnboundedReceiver<Dispatch>,
) {
    let sim = Arc::new(sim);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let camera = Camera::new(Arc::clone(&sim) as Arc<dyn Transport>, None, tx);
    (camera, sim, rx)
}
