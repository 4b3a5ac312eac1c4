//! Capture session: the acquire, correct and publish loop of one camera.
//!
//! A running session owns a named acquisition thread. Each frame is handed to
//! the frame subscribers synchronously on that thread and parked in a
//! single-slot mailbox. While a consumer still holds a lock on the previous
//! frame, newly built frames are dropped instead of queued.

use crate::camera::Camera;
use crate::frame::{CameraFrame, FrameHeader, FrameLock, FramePlane};
use crate::observer::{Observers, Subscription};
use crate::transport::RawFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thermcam_core::filters::gradient_correct;
use thermcam_core::palette;
use thermcam_core::radiometry::{self, Thermometer};
use thermcam_core::types::{Filter, FrameFormat, FrameFormats};
use thermcam_core::{AgcEngine, AgcMetrics, CameraError, Result};

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const POOL_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Stopped,
    Starting,
    Streaming,
    Stopping,
}

/// Delivery counters of the current (or last) session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Raw frames read from the transport.
    pub acquired: u64,
    /// Frames published to subscribers and the mailbox.
    pub delivered: u64,
    /// Frames built while the previous one was still locked.
    pub dropped: u64,
    /// Mailbox frames overwritten before anyone took them.
    pub replaced: u64,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    replaced: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for c in [&self.acquired, &self.delivered, &self.dropped, &self.replaced] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
        }
    }
}

/// Frame subscriber. Runs on the acquisition thread.
pub type FrameCallback = dyn Fn(&Camera, &FrameLock) + Send + Sync;

#[derive(Default)]
struct Slot {
    frame: Option<Arc<CameraFrame>>,
    /// Set on publish, cleared when a reader takes the frame.
    fresh: bool,
    /// No frames will follow until the next start.
    closed: bool,
}

struct Published {
    frame: Arc<CameraFrame>,
    evicted: Option<Arc<CameraFrame>>,
    replaced: bool,
}

/// Single-slot, latest-wins frame mailbox.
#[derive(Default)]
struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self) -> Option<Arc<CameraFrame>> {
        let mut slot = self.lock();
        slot.fresh = false;
        slot.closed = false;
        slot.frame.take()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Park `frame` unless the current one is still locked, in which case
    /// it is handed back.
    fn offer(&self, frame: CameraFrame) -> std::result::Result<Published, CameraFrame> {
        let mut slot = self.lock();
        if slot.frame.as_ref().is_some_and(|f| f.is_locked()) {
            return Err(frame);
        }
        let frame = Arc::new(frame);
        let replaced = slot.fresh;
        let evicted = slot.frame.replace(Arc::clone(&frame));
        slot.fresh = true;
        drop(slot);
        self.ready.notify_all();
        Ok(Published {
            frame,
            evicted,
            replaced,
        })
    }

    fn latest(&self) -> Option<FrameLock> {
        let mut slot = self.lock();
        slot.fresh = false;
        slot.frame.as_ref().map(|f| f.lock())
    }

    /// Next unread frame. `Err(Timeout)` on expiry, `Err(Interrupted)` if
    /// the session ends first.
    fn wait(&self, timeout: Duration) -> Result<FrameLock> {
        let guard = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| !s.fresh && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        if !slot.fresh {
            return Err(if slot.closed {
                CameraError::Interrupted
            } else {
                CameraError::Timeout
            });
        }
        slot.fresh = false;
        slot.frame
            .as_ref()
            .map(|f| f.lock())
            .ok_or(CameraError::Interrupted)
    }
}

/// Per-camera session state shared between the handle and its worker.
pub(crate) struct CaptureSession {
    state: Mutex<SessionState>,
    stop_requested: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
    mailbox: Mailbox,
    observers: Observers<FrameCallback>,
    last_raw: Mutex<Option<RawFrame>>,
}

impl CaptureSession {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Stopped),
            stop_requested: AtomicBool::new(false),
            worker: Mutex::new(None),
            counters: Counters::default(),
            mailbox: Mailbox::default(),
            observers: Observers::new(),
            last_raw: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub(crate) fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub(crate) fn subscribe(&self, callback: Arc<FrameCallback>) -> Subscription {
        self.observers.subscribe(callback)
    }

    pub(crate) fn latest(&self) -> Option<FrameLock> {
        self.mailbox.latest()
    }

    pub(crate) fn wait(&self, timeout: Duration) -> Result<FrameLock> {
        self.mailbox.wait(timeout)
    }

    /// Most recent raw acquisition of the running session.
    pub(crate) fn last_raw(&self) -> Option<RawFrame> {
        self.last_raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spawn the acquisition thread. Only immediate failures are returned;
    /// anything after that arrives as an ERROR event.
    pub(crate) fn start(&self, camera: &Camera, formats: FrameFormats) -> Result<()> {
        let mut state = self.lock_state();
        if *state != SessionState::Stopped {
            return Err(CameraError::DeviceBusy);
        }
        // A worker that ended by itself has already left Streaming.
        if let Some(handle) = self.lock_worker().take() {
            let _ = handle.join();
        }

        self.stop_requested.store(false, Ordering::Release);
        self.counters.reset();
        self.mailbox.open();
        *self.last_raw.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *state = SessionState::Starting;

        let worker_camera = camera.clone();
        let spawned = thread::Builder::new()
            .name(format!("thermcam-capture-{}", camera.chip_id()))
            .spawn(move || run(worker_camera, formats));
        match spawned {
            Ok(handle) => {
                *self.lock_worker() = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(cid = %camera.chip_id(), error = %e, "failed to spawn capture thread");
                *state = SessionState::Stopped;
                Err(CameraError::SyscallFailed)
            }
        }
    }

    /// Stop and wait for the acquisition thread. No frame callback runs
    /// once this returns, except when called from a frame callback itself:
    /// then the loop winds down right after that callback returns.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.lock_state();
            if matches!(*state, SessionState::Starting | SessionState::Streaming) {
                *state = SessionState::Stopping;
            }
        }
        self.stop_requested.store(true, Ordering::Release);
        self.mailbox.close();

        let Some(handle) = self.lock_worker().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            *self.lock_worker() = Some(handle);
            return;
        }
        if handle.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        *self.lock_state() = SessionState::Stopped;
    }

    fn finish(&self) {
        *self.lock_state() = SessionState::Stopped;
        self.mailbox.close();
    }
}

fn run(camera: Camera, formats: FrameFormats) {
    let session = camera.session();
    let transport = camera.transport();
    let cid = camera.chip_id();

    let shutter = camera.settings_snapshot().shutter_mode();
    let started = transport
        .set_shutter_mode(shutter)
        .and_then(|()| transport.start_stream());
    if let Err(err) = started {
        tracing::warn!(cid = %cid, error = %err, "capture start failed");
        session.finish();
        camera.report_error(err);
        return;
    }
    {
        let mut state = session.lock_state();
        if *state != SessionState::Starting || session.stop_requested() {
            drop(state);
            let _ = transport.stop_stream();
            session.finish();
            return;
        }
        *state = SessionState::Streaming;
    }
    tracing::info!(cid = %cid, formats = formats.bits(), "capture streaming");

    let timeout = camera
        .profile()
        .frame_period()
        .saturating_mul(4)
        .max(MIN_READ_TIMEOUT);
    let mut builder = FrameBuilder::default();
    let mut failures = 0u32;

    while !session.stop_requested() {
        let raw = match transport.read_frame(timeout) {
            Ok(raw) => {
                failures = 0;
                raw
            }
            Err(_) if session.stop_requested() => break,
            Err(CameraError::NoDevice) if !transport.is_connected() => {
                tracing::debug!(cid = %cid, "transport gone, capture ending");
                break;
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(cid = %cid, error = %err, failures, "frame read failed");
                camera.report_error(err);
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(cid = %cid, "too many consecutive read failures, stopping capture");
                    break;
                }
                continue;
            }
        };

        Counters::bump(&session.counters.acquired);
        let frame = match builder.build(&camera, &raw, formats) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(cid = %cid, error = %err, "frame does not fit its header, stopping capture");
                camera.report_error(err);
                break;
            }
        };
        *session.last_raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);

        let published = match session.mailbox.offer(frame) {
            Ok(p) => p,
            Err(frame) => {
                Counters::bump(&session.counters.dropped);
                tracing::trace!(cid = %cid, "previous frame still locked, dropping");
                builder.recycle(frame);
                continue;
            }
        };
        if published.replaced {
            Counters::bump(&session.counters.replaced);
        }
        if let Some(old) = published.evicted.and_then(|f| Arc::try_unwrap(f).ok()) {
            builder.recycle(old);
        }

        let lock = published.frame.lock();
        drop(published.frame);
        for callback in session.observers.snapshot() {
            if session.stop_requested() {
                break;
            }
            callback(&camera, &lock);
        }
        Counters::bump(&session.counters.delivered);
    }

    if let Err(err) = transport.stop_stream() {
        tracing::debug!(cid = %cid, error = %err, "stop_stream failed");
    }
    tracing::info!(cid = %cid, stats = ?session.stats(), "capture stopped");
    session.finish();
}

/// Turns raw acquisitions into frames, reusing plane buffers.
#[derive(Default)]
struct FrameBuilder {
    agc: AgcEngine,
    corrected: Vec<u16>,
    levels: Vec<u8>,
    temps: Vec<f32>,
    last_frame_at: Option<Instant>,
    last_timestamp: u64,
    pool: Vec<Vec<u8>>,
}

fn put_u16(buf: &mut Vec<u8>, values: impl Iterator<Item = u16>) {
    buf.extend(values.flat_map(u16::to_ne_bytes));
}

impl FrameBuilder {
    fn recycle(&mut self, frame: CameraFrame) {
        for buf in frame.into_buffers() {
            if self.pool.len() < POOL_LIMIT {
                self.pool.push(buf);
            }
        }
    }

    /// Strictly increasing UTC timestamp in nanoseconds.
    fn timestamp(&mut self) -> u64 {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        let ts = now.max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    fn build(
        &mut self,
        camera: &Camera,
        raw: &RawFrame,
        formats: FrameFormats,
    ) -> Result<CameraFrame> {
        // Settings are read once so the whole frame sees one parameter set.
        let settings = camera.settings_snapshot();
        let (width, height) = (raw.width, raw.height);

        self.corrected.clear();
        self.corrected.extend_from_slice(&raw.counts);
        let fsc_state = settings.filter_state(Filter::FlatSceneCorrection);
        if fsc_state.is_enabled() {
            if let Some(fsc) = camera.lock_fsc().as_ref() {
                if let Err(err) = fsc.apply(&mut self.corrected) {
                    tracing::trace!(error = %err, "flat scene correction does not fit frame");
                }
            }
        }
        let gradient_state = settings.filter_state(Filter::GradientCorrection);
        if gradient_state.is_enabled() {
            gradient_correct(&mut self.corrected, width, height);
        }

        let now = Instant::now();
        let interval = self.last_frame_at.replace(now).map(|t| now - t);
        let metrics = self
            .agc
            .process(&self.corrected, &settings, interval, &mut self.levels);

        let radiometry = camera.profile().radiometry;
        let environment = radiometry.environment_celsius(raw.fpa_diode_count);
        let thermometer = Thermometer::new(
            radiometry,
            environment,
            settings.scene_emissivity(),
            settings.thermography_offset(),
            settings.temperature_unit(),
        );
        self.temps.clear();
        self.temps
            .extend(self.corrected.iter().map(|&c| thermometer.temperature(c)));
        let window = settings.thermography_window(width, height);
        let stats = radiometry::window_stats(&self.temps, width, &window);

        let descriptor = camera.descriptor();
        let mut common = FrameHeader {
            timestamp_utc_ns: self.timestamp(),
            chip_id: descriptor.chip_id,
            serial_number: descriptor.serial_number,
            core_part_number: descriptor.core_part_number,
            firmware_version: descriptor.firmware_version,
            io_type: descriptor.io.io_type().bits() as u8,
            fpa_frame_count: raw.fpa_frame_count,
            fpa_diode_count: raw.fpa_diode_count,
            environment_temperature: environment,
            thermography_min: stats.min,
            thermography_max: stats.max,
            thermography_spot: stats.spot,
            agc_mode: metrics.mode() as u8,
            gradient_correction_filter_state: gradient_state as u8,
            flat_scene_correction_filter_state: fsc_state as u8,
            ..FrameHeader::default()
        };
        match metrics {
            AgcMetrics::Linear { min, max } => {
                common.linear_agc_min = min;
                common.linear_agc_max = max;
            }
            AgcMetrics::HistEq {
                num_bins,
                bin_width,
                gain_limit_factor,
            } => {
                common.histeq_agc_num_bins = num_bins;
                common.histeq_agc_bin_width = bin_width;
                common.histeq_agc_gain_limit_factor = gain_limit_factor;
            }
        }

        let palettes = camera.lock_palettes();
        let table = palettes.table(settings.color_palette());
        let mut planes = Vec::new();
        for format in formats.iter() {
            let mut buf = self.pool.pop().unwrap_or_default();
            buf.clear();
            match format {
                FrameFormat::Corrected => put_u16(&mut buf, self.corrected.iter().copied()),
                FrameFormat::PreAgc => put_u16(&mut buf, raw.counts.iter().copied()),
                FrameFormat::ThermographyFloat => {
                    buf.extend(self.temps.iter().flat_map(|t| t.to_ne_bytes()))
                }
                FrameFormat::ThermographyFixed10_6 => put_u16(
                    &mut buf,
                    self.corrected
                        .iter()
                        .map(|&c| radiometry::kelvin_fixed_10_6(thermometer.celsius(c))),
                ),
                FrameFormat::Grayscale => buf.extend_from_slice(&self.levels),
                FrameFormat::ColorArgb8888 => palette::colorize_argb8888(&self.levels, table, &mut buf),
                FrameFormat::ColorRgb565 => palette::colorize_rgb565(&self.levels, table, &mut buf),
                FrameFormat::ColorAyuv => palette::colorize_ayuv(&self.levels, table, &mut buf),
                FrameFormat::ColorYuy2 => {
                    palette::colorize_yuy2(&self.levels, width, table, &mut buf)
                }
            }
            planes.push(FramePlane::new(format, width, height, &common, buf)?);
        }
        Ok(CameraFrame::new(planes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::test_camera;
    use crate::manager::Dispatch;
    use crate::sim::SimCamera;
    use std::sync::atomic::AtomicUsize;
    use thermcam_core::types::{ManagerEvent, TemperatureUnit};

    const WAIT: Duration = Duration::from_secs(2);

    fn formats() -> FrameFormats {
        FrameFormat::Grayscale | FrameFormat::ThermographyFloat
    }

    #[test]
    fn test_frames_carry_consistent_planes() {
        let (camera, _sim, _events) = test_camera(SimCamera::usb(0).with_resolution(7, 5));
        let all: FrameFormats = FrameFormat::ALL.into_iter().collect();
        camera.capture_session_start(all).unwrap();
        let frame = camera.wait_frame(WAIT).unwrap();
        camera.capture_session_stop().unwrap();

        assert_eq!(frame.planes().len(), FrameFormat::ALL.len());
        for plane in frame.planes() {
            assert_eq!((plane.width(), plane.height()), (7, 5));
            assert!(plane.width() * plane.channels() * plane.pixel_depth() / 8 <= plane.line_stride());
            assert!(plane.line_stride() * plane.height() <= plane.data_size());
            let header = FrameHeader::from_bytes(&plane.header_bytes()).unwrap();
            assert_eq!(&header, plane.header());
            assert_eq!(header.chip_id, camera.chip_id());
        }
        let yuy2 = frame.plane(FrameFormat::ColorYuy2).unwrap();
        assert_eq!(yuy2.data_size(), 7 * 5 * 2);
    }

    #[test]
    fn test_header_records_window_stats_and_agc() {
        let (camera, sim, _events) = test_camera(SimCamera::usb(0).with_resolution(4, 4));
        let mut scene = vec![8192u16; 16];
        scene[5] = 9000;
        scene[10] = 7000;
        sim.set_scene(Some(scene));
        camera
            .set_filter_state(Filter::GradientCorrection, thermcam_core::types::FilterState::Disabled)
            .unwrap();
        camera.set_temperature_unit(TemperatureUnit::Kelvin).unwrap();
        camera.capture_session_start(formats()).unwrap();
        let frame = camera.wait_frame(WAIT).unwrap();
        camera.capture_session_stop().unwrap();

        let h = frame.header().unwrap();
        assert_eq!((h.thermography_max.x, h.thermography_max.y), (1, 1));
        assert_eq!((h.thermography_min.x, h.thermography_min.y), (2, 2));
        assert!(h.thermography_max.value > 273.15);
        assert_eq!(h.agc_mode, 0);
        assert!(h.linear_agc_max > h.linear_agc_min);
        assert_eq!(h.gradient_correction_filter_state, 0);

        let temps = frame.plane(FrameFormat::ThermographyFloat).unwrap().to_f32();
        assert_eq!(temps[5], h.thermography_max.value);
    }

    #[test]
    fn test_held_lock_drops_frames_and_timestamps_stay_monotonic() {
        let (camera, _sim, _events) = test_camera(SimCamera::usb(0).with_resolution(8, 6));
        camera.capture_session_start(formats()).unwrap();
        let held = camera.wait_frame(WAIT).unwrap();
        let held_ts = held.timestamp_utc_ns();

        let start = Instant::now();
        while camera.session_stats().unwrap().dropped < 2 {
            assert!(start.elapsed() < WAIT, "no frame was dropped while locked");
            thread::sleep(Duration::from_millis(5));
        }
        let stats = camera.session_stats().unwrap();
        assert_eq!(camera.latest_frame().unwrap().timestamp_utc_ns(), held_ts);
        drop(held);

        let start = Instant::now();
        let next = loop {
            let f = camera.wait_frame(WAIT).unwrap();
            if f.timestamp_utc_ns() != held_ts {
                break f;
            }
            assert!(start.elapsed() < WAIT);
        };
        camera.capture_session_stop().unwrap();
        assert!(next.timestamp_utc_ns() > held_ts);
        assert!(stats.acquired >= stats.delivered + stats.dropped);
    }

    #[test]
    fn test_callbacks_in_order_and_silent_after_stop() {
        let (camera, _sim, _events) = test_camera(SimCamera::usb(0).with_resolution(4, 3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = camera.register_frame_callback(move |_, frame| {
            sink.lock().unwrap().push(frame.timestamp_utc_ns());
        });
        camera.capture_session_start(formats()).unwrap();
        let start = Instant::now();
        while seen.lock().unwrap().len() < 5 {
            assert!(start.elapsed() < WAIT);
            thread::sleep(Duration::from_millis(2));
        }
        camera.capture_session_stop().unwrap();
        assert_eq!(camera.capture_session_state().unwrap(), SessionState::Stopped);

        let count = seen.lock().unwrap().len();
        thread::sleep(Duration::from_millis(50));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), count);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_start_twice_is_busy() {
        let (camera, _sim, _events) = test_camera(SimCamera::usb(0));
        camera.capture_session_start(formats()).unwrap();
        assert_eq!(
            camera.capture_session_start(formats()),
            Err(CameraError::DeviceBusy)
        );
        camera.capture_session_stop().unwrap();
        camera.capture_session_start(formats()).unwrap();
        camera.capture_session_stop().unwrap();
    }

    #[test]
    fn test_start_failure_rolls_back_and_reports() {
        let (camera, sim, mut events) = test_camera(SimCamera::usb(0));
        sim.fail_start(CameraError::SensorCommunication);
        camera.capture_session_start(formats()).unwrap();
        match events.blocking_recv() {
            Some(Dispatch::Event { event, status, .. }) => {
                assert_eq!(event, ManagerEvent::Error);
                assert_eq!(status, Some(CameraError::SensorCommunication));
            }
            _ => panic!("expected an error event"),
        }
        let start = Instant::now();
        while camera.is_active().unwrap() {
            assert!(start.elapsed() < WAIT);
            thread::sleep(Duration::from_millis(2));
        }
        camera.capture_session_start(formats()).unwrap();
        camera.capture_session_stop().unwrap();
    }

    #[test]
    fn test_read_error_is_reported_and_streaming_continues() {
        let (camera, sim, mut events) = test_camera(SimCamera::usb(0));
        camera.capture_session_start(formats()).unwrap();
        camera.wait_frame(WAIT).unwrap();
        sim.fail_next_read(CameraError::DeviceCommunication);
        match events.blocking_recv() {
            Some(Dispatch::Event { status, .. }) => {
                assert_eq!(status, Some(CameraError::DeviceCommunication))
            }
            _ => panic!("expected an error event"),
        }
        camera.wait_frame(WAIT).unwrap();
        assert_eq!(camera.capture_session_state().unwrap(), SessionState::Streaming);
        camera.capture_session_stop().unwrap();
    }

    #[test]
    fn test_stop_from_inside_callback() {
        let (camera, _sim, _events) = test_camera(SimCamera::usb(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = camera.register_frame_callback(move |cam, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            cam.capture_session_stop().unwrap();
        });
        camera.capture_session_start(formats()).unwrap();
        let start = Instant::now();
        while camera.is_active().unwrap() {
            assert!(start.elapsed() < WAIT);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        camera.capture_session_start(formats()).unwrap();
        camera.capture_session_stop().unwrap();
    }

    #[test]
    fn test_wait_frame_outcomes() {
        let (camera, _sim, _events) =
            test_camera(SimCamera::usb(0).with_frame_interval(Duration::from_millis(200)));
        assert_eq!(
            camera.wait_frame(Duration::from_millis(10)).unwrap_err(),
            CameraError::CannotPerformRequest
        );
        camera.capture_session_start(formats()).unwrap();
        camera.wait_frame(WAIT).unwrap();
        assert_eq!(
            camera.wait_frame(Duration::from_millis(10)).unwrap_err(),
            CameraError::Timeout
        );
        camera.capture_session_stop().unwrap();
    }
}
