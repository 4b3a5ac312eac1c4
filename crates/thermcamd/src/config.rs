use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thermcam_core::{CameraSettings, DiscoveryMode, FrameFormat, FrameFormats};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bus types to discover on: `usb`, `spi` or `all`.
    pub discovery: DiscoveryMode,
    /// Simulated cameras attached at startup, per bus.
    pub sim_usb_cameras: u8,
    pub sim_spi_cameras: u8,
    /// Frame formats every camera streams.
    pub formats: FrameFormats,
    /// Optional TOML file with the settings applied on connect.
    pub settings_path: Option<PathBuf>,
    /// Calibration source for pairing; factory calibration when unset.
    pub calibration_dir: Option<PathBuf>,
    /// Host cache for flat scene corrections and app resources.
    pub cache_dir: PathBuf,
    pub poll_interval: Duration,
    /// Period of the per-camera statistics log line. Zero disables it.
    pub stats_interval: Duration,
    /// Pair cameras that report READY_TO_PAIR without being asked.
    pub auto_pair: bool,
    pub dbus_enabled: bool,
}

impl Config {
    /// Load configuration from `THERMCAM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let cache_dir = std::env::var("THERMCAM_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_CACHE_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".cache")
                    })
                    .join("thermcam")
            });

        let discovery = match std::env::var("THERMCAM_DISCOVERY") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %v, "unknown THERMCAM_DISCOVERY, discovering on all buses");
                DiscoveryMode::ALL
            }),
            Err(_) => DiscoveryMode::ALL,
        };

        let formats = match std::env::var("THERMCAM_FORMATS") {
            Ok(v) => parse_formats(&v).unwrap_or_else(|| {
                tracing::warn!(value = %v, "no known frame format in THERMCAM_FORMATS, using grayscale");
                FrameFormat::Grayscale.into()
            }),
            Err(_) => FrameFormat::Grayscale.into(),
        };

        Self {
            discovery,
            sim_usb_cameras: env_u8("THERMCAM_SIM_USB_CAMERAS", 1),
            sim_spi_cameras: env_u8("THERMCAM_SIM_SPI_CAMERAS", 0),
            formats,
            settings_path: env_path("THERMCAM_SETTINGS"),
            calibration_dir: env_path("THERMCAM_CALIBRATION_DIR"),
            cache_dir,
            poll_interval: Duration::from_millis(env_u64("THERMCAM_POLL_INTERVAL_MS", 100)),
            stats_interval: Duration::from_secs(env_u64("THERMCAM_STATS_INTERVAL_SECS", 10)),
            auto_pair: env_flag("THERMCAM_AUTO_PAIR", true),
            dbus_enabled: env_flag("THERMCAM_DBUS", true),
        }
    }

    /// Settings from [`Config::settings_path`], or the defaults.
    pub fn load_settings(&self) -> anyhow::Result<CameraSettings> {
        match &self.settings_path {
            Some(path) => load_settings_file(path),
            None => Ok(CameraSettings::default()),
        }
    }
}

fn load_settings_file(path: &Path) -> anyhow::Result<CameraSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    parse_settings(&text).with_context(|| format!("parsing settings file {}", path.display()))
}

fn parse_settings(text: &str) -> anyhow::Result<CameraSettings> {
    let settings: CameraSettings = toml::from_str(text)?;
    settings.validate()?;
    Ok(settings)
}

/// Comma-separated format names. Unknown names are skipped; `None` if
/// nothing known remains.
fn parse_formats(list: &str) -> Option<FrameFormats> {
    let formats: FrameFormats = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|name| match name.parse::<FrameFormat>() {
            Ok(f) => Some(f),
            Err(_) => {
                tracing::warn!(name = name.trim(), "ignoring unknown frame format");
                None
            }
        })
        .collect();
    (!formats.is_empty()).then_some(formats)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermcam_core::types::AgcMode;

    #[test]
    fn test_parse_formats_skips_unknown() {
        let formats = parse_formats("grayscale, bogus ,PRE_AGC").unwrap();
        assert!(formats.contains(FrameFormat::Grayscale));
        assert!(formats.contains(FrameFormat::PreAgc));
        assert_eq!(formats.iter().count(), 2);
    }

    #[test]
    fn test_parse_formats_rejects_nothing_known() {
        assert!(parse_formats("").is_none());
        assert!(parse_formats("jpeg,png").is_none());
    }

    #[test]
    fn test_parse_settings_partial_file() {
        let settings = parse_settings("agc_mode = \"hist_eq\"\nscene_emissivity = 0.95\n").unwrap();
        assert_eq!(settings.agc_mode(), AgcMode::HistEq);
        assert!((settings.scene_emissivity() - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_parse_settings_rejects_out_of_range() {
        assert!(parse_settings("scene_emissivity = 1.5\n").is_err());
        assert!(parse_settings("agc_mode = \"median\"\n").is_err());
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        let err = load_settings_file(Path::new("/nonexistent/thermcam.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/thermcam.toml"));
    }
}
