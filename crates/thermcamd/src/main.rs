use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use thermcam_core::types::IoType;
use thermcam_hw::{CameraManager, Enumerator, ManagerConfig, SimBus, SimCamera};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod monitor;

use config::Config;
use dbus_interface::ThermcamService;
use monitor::{Monitor, Policy};

fn sim_bus(io_type: IoType, count: u8) -> Arc<dyn Enumerator> {
    let bus = SimBus::new(io_type);
    for index in 0..count {
        let camera = match io_type {
            IoType::Usb => SimCamera::usb(index),
            IoType::Spi => SimCamera::spi(index),
        };
        bus.attach(Arc::new(camera));
    }
    Arc::new(bus)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = thermcam_core::version::string(), "thermcamd starting");

    let config = Config::from_env();
    let settings = config.load_settings()?;
    tracing::debug!(?config, "configuration loaded");

    let manager = CameraManager::with_config(
        ManagerConfig {
            discovery: config.discovery,
            poll_interval: config.poll_interval,
            host_cache_dir: Some(config.cache_dir.clone()),
        },
        vec![
            sim_bus(IoType::Usb, config.sim_usb_cameras),
            sim_bus(IoType::Spi, config.sim_spi_cameras),
        ],
    )?;
    let manager = Arc::new(manager);

    let monitor = Arc::new(Monitor::start(
        Arc::clone(&manager),
        Policy {
            formats: config.formats,
            settings,
            auto_pair: config.auto_pair,
            calibration_dir: config.calibration_dir.clone(),
        },
    ));

    let stats = (!config.stats_interval.is_zero()).then(|| {
        tokio::spawn(monitor::log_stats(Arc::clone(&manager), config.stats_interval))
    });

    // The daemon keeps running without a session bus; D-Bus is status only.
    let _conn = if config.dbus_enabled {
        let service = ThermcamService {
            monitor: Arc::clone(&monitor),
            started: Instant::now(),
        };
        match zbus::connection::Builder::session()
            .and_then(|b| b.name(dbus_interface::BUS_NAME))
            .and_then(|b| b.serve_at(dbus_interface::OBJECT_PATH, service))
        {
            Ok(builder) => match builder.build().await {
                Ok(conn) => {
                    tracing::info!(name = dbus_interface::BUS_NAME, "D-Bus interface registered");
                    Some(conn)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "D-Bus unavailable, continuing without it");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "D-Bus unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    tracing::info!("thermcamd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("thermcamd shutting down");

    if let Some(task) = stats {
        task.abort();
    }
    drop(monitor);
    // Joins the manager threads; keep it off the async workers.
    tokio::task::spawn_blocking(move || manager.destroy()).await?;

    Ok(())
}
