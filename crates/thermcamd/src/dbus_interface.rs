use crate::monitor::Monitor;
use std::sync::Arc;
use std::time::Instant;
use thermcam_core::ChipId;
use zbus::interface;

pub const BUS_NAME: &str = "org.thermcam.Manager1";
pub const OBJECT_PATH: &str = "/org/thermcam/Manager1";

/// D-Bus interface for the thermal camera daemon.
///
/// Bus name: org.thermcam.Manager1
/// Object path: /org/thermcam/Manager1
pub struct ThermcamService {
    pub monitor: Arc<Monitor>,
    pub started: Instant,
}

#[interface(name = "org.thermcam.Manager1")]
impl ThermcamService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let cameras = self.monitor.summaries();
        Ok(serde_json::json!({
            "version": thermcam_core::version::string(),
            "uptime_secs": self.started.elapsed().as_secs(),
            "discovery": self.monitor.manager().discovery_mode().bits(),
            "cameras": cameras.len(),
            "streaming": cameras.iter().filter(|c| c.session == "streaming").count(),
        })
        .to_string())
    }

    /// List live cameras with their delivery counters, as JSON.
    async fn list_cameras(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.monitor.summaries())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Trigger the shutter of one camera.
    async fn trigger_shutter(&self, chip_id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(chip_id, "shutter trigger requested");
        let cid = ChipId::new(chip_id)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let camera = self
            .monitor
            .manager()
            .camera(&cid)
            .ok_or_else(|| zbus::fdo::Error::Failed(format!("no camera {chip_id}")))?;
        camera
            .shutter_trigger()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Run device discovery now.
    async fn rescan(&self) {
        tracing::info!("rescan requested");
        self.monitor.manager().rescan();
    }
}
