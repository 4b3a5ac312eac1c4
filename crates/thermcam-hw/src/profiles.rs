//! Sensor profile database.
//!
//! Maps core part number prefixes to frame rate and radiometric constants.
//! Profile files are embedded at compile time from `contrib/sensors/*.toml`.

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use thermcam_core::radiometry::Radiometry;
use thermcam_core::CorePartNumber;

const SENSOR_SIM_TC320: &str = include_str!("../../../contrib/sensors/sim-tc320.toml");
const SENSOR_MOSAIC_320: &str = include_str!("../../../contrib/sensors/mosaic-320.toml");
const SENSOR_MICRO_206: &str = include_str!("../../../contrib/sensors/micro-206.toml");

static PROFILE_DB: OnceLock<Vec<SensorProfile>> = OnceLock::new();
static FALLBACK: OnceLock<SensorProfile> = OnceLock::new();

/// One profile file.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorProfile {
    pub sensor: SensorInfo,
    pub radiometry: Radiometry,
}

/// `[sensor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    /// Matched against the start of the device's core part number.
    pub cpn_prefix: String,
    pub frame_rate_hz: f32,
}

impl SensorProfile {
    /// Nominal time between frames.
    pub fn frame_period(&self) -> Duration {
        if self.sensor.frame_rate_hz > 0.0 {
            Duration::from_secs_f32(1.0 / self.sensor.frame_rate_hz)
        } else {
            Duration::from_millis(100)
        }
    }
}

fn profile_db() -> &'static Vec<SensorProfile> {
    PROFILE_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [SENSOR_SIM_TC320, SENSOR_MOSAIC_320, SENSOR_MICRO_206] {
            match toml::from_str::<SensorProfile>(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::warn!(error = %e, "bad sensor profile TOML"),
            }
        }
        db
    })
}

fn fallback() -> &'static SensorProfile {
    FALLBACK.get_or_init(|| SensorProfile {
        sensor: SensorInfo {
            name: "generic".to_string(),
            cpn_prefix: String::new(),
            frame_rate_hz: 9.0,
        },
        radiometry: Radiometry::default(),
    })
}

/// Profile for a core part number; the longest matching prefix wins.
/// Unknown parts get a generic profile.
pub fn lookup_profile(cpn: &CorePartNumber) -> &'static SensorProfile {
    let cpn = cpn.as_str();
    profile_db()
        .iter()
        .filter(|p| !p.sensor.cpn_prefix.is_empty() && cpn.starts_with(&p.sensor.cpn_prefix))
        .max_by_key(|p| p.sensor.cpn_prefix.len())
        .unwrap_or_else(|| fallback())
}

/// List all embedded profiles.
pub fn list_profiles() -> &'static [SensorProfile] {
    profile_db()
}
