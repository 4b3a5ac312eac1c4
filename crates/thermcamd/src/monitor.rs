use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thermcam_core::{CameraError, CameraSettings, FrameFormats, ManagerEvent};
use thermcam_hw::{Camera, CameraManager, CameraState, SessionState, SessionStats, Subscription};

/// What the daemon does with each camera it is told about.
#[derive(Debug, Clone)]
pub struct Policy {
    pub formats: FrameFormats,
    pub settings: CameraSettings,
    pub auto_pair: bool,
    pub calibration_dir: Option<PathBuf>,
}

/// Keeps every connected camera configured and streaming.
pub struct Monitor {
    manager: Arc<CameraManager>,
    _events: Subscription,
}

impl Monitor {
    pub fn start(manager: Arc<CameraManager>, policy: Policy) -> Self {
        let policy = Arc::new(policy);
        let events = manager.register_event_callback(move |camera, event, status| {
            on_event(&policy, camera, event, status);
        });
        Self {
            manager,
            _events: events,
        }
    }

    pub fn manager(&self) -> &Arc<CameraManager> {
        &self.manager
    }

    pub fn summaries(&self) -> Vec<CameraSummary> {
        let mut cameras: Vec<CameraSummary> =
            self.manager.cameras().iter().map(CameraSummary::of).collect();
        cameras.sort_by(|a, b| a.chip_id.cmp(&b.chip_id));
        cameras
    }
}

fn on_event(policy: &Policy, camera: &Camera, event: ManagerEvent, status: Option<CameraError>) {
    let cid = camera.chip_id();
    match event {
        ManagerEvent::Connect => {
            tracing::info!(cid = %cid, io = %camera.io_properties(), "camera connected");
            bring_up(policy, camera);
        }
        ManagerEvent::ReadyToPair => {
            if !policy.auto_pair {
                tracing::info!(cid = %cid, "camera needs pairing, auto-pair disabled");
                return;
            }
            tracing::info!(cid = %cid, "pairing camera");
            match pair(policy, camera) {
                Ok(()) => bring_up(policy, camera),
                Err(err) => {
                    tracing::error!(cid = %cid, error = %err, code = err.code(), "pairing failed")
                }
            }
        }
        ManagerEvent::Disconnect => {
            tracing::info!(cid = %cid, "camera disconnected");
        }
        ManagerEvent::Error => {
            let err = status.unwrap_or(CameraError::Other);
            tracing::warn!(cid = %cid, error = %err, code = err.code(), kind = ?err.kind(), "camera error");
        }
    }
}

fn pair(policy: &Policy, camera: &Camera) -> thermcam_core::Result<()> {
    let cid = camera.chip_id();
    let mut last = 0;
    let mut report = |pct: u8| {
        if pct >= last + 25 || pct == 100 {
            tracing::debug!(cid = %cid, percent = pct, "pairing progress");
            last = pct;
        }
    };
    camera.store_calibration_data(policy.calibration_dir.as_deref(), Some(&mut report))
}

fn bring_up(policy: &Policy, camera: &Camera) {
    let cid = camera.chip_id();
    if let Err(err) = camera.apply_settings(policy.settings.clone()) {
        tracing::warn!(cid = %cid, error = %err, "settings rejected, keeping defaults");
    }
    match camera.capture_session_start(policy.formats) {
        Ok(()) => tracing::info!(cid = %cid, formats = policy.formats.bits(), "streaming"),
        // A replayed CONNECT for a camera already streaming.
        Err(CameraError::DeviceBusy) => {}
        Err(err) => tracing::error!(cid = %cid, error = %err, "failed to start capture"),
    }
}

/// Status of one camera as published over D-Bus.
#[derive(Debug, Clone, Serialize)]
pub struct CameraSummary {
    pub chip_id: String,
    pub serial_number: String,
    pub core_part_number: String,
    pub firmware_version: String,
    pub sensor: &'static str,
    pub io: String,
    pub state: &'static str,
    pub session: &'static str,
    pub width: usize,
    pub height: usize,
    pub acquired: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub replaced: u64,
}

impl CameraSummary {
    fn of(camera: &Camera) -> Self {
        let (width, height) = camera.resolution();
        let stats = camera.session_stats().unwrap_or_default();
        let session = match camera.capture_session_state() {
            Ok(SessionState::Stopped) | Err(_) => "stopped",
            Ok(SessionState::Starting) => "starting",
            Ok(SessionState::Streaming) => "streaming",
            Ok(SessionState::Stopping) => "stopping",
        };
        Self {
            chip_id: camera.chip_id().to_string(),
            serial_number: camera.serial_number().to_string(),
            core_part_number: camera.core_part_number().to_string(),
            firmware_version: camera.firmware_version().to_string(),
            sensor: camera.sensor_name(),
            io: camera.io_properties().to_string(),
            state: match camera.state() {
                CameraState::NeedsPairing => "needs_pairing",
                CameraState::Connected => "connected",
                CameraState::Disconnected => "disconnected",
            },
            session,
            width,
            height,
            acquired: stats.acquired,
            delivered: stats.delivered,
            dropped: stats.dropped,
            replaced: stats.replaced,
        }
    }
}

/// Log per-camera delivery counters every `interval` until the task is
/// dropped.
pub async fn log_stats(manager: Arc<CameraManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut previous: std::collections::HashMap<u64, SessionStats> = Default::default();
    loop {
        ticker.tick().await;
        let cameras = manager.cameras();
        previous.retain(|attach, _| cameras.iter().any(|c| c.attach_id() == *attach));
        for camera in cameras {
            let Ok(stats) = camera.session_stats() else {
                continue;
            };
            let before = previous.insert(camera.attach_id(), stats).unwrap_or_default();
            let delivered = stats.delivered.saturating_sub(before.delivered);
            tracing::info!(
                cid = %camera.chip_id(),
                fps = delivered as f64 / interval.as_secs_f64(),
                delivered = stats.delivered,
                dropped = stats.dropped,
                replaced = stats.replaced,
                "frame statistics"
            );
        }
    }
}
