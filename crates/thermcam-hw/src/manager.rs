//! Device manager: discovery, per-device lifecycle and event fan-out.
//!
//! Two background threads run per manager. The discovery thread polls every
//! enabled [`Enumerator`], keeps an arena of live cameras keyed by chip id,
//! and queues lifecycle events. The dispatch thread drains that queue and
//! invokes subscribers, so events for one camera arrive in lifecycle order
//! and never on the caller's thread.

use crate::camera::{Camera, CameraState};
use crate::observer::{Observers, Subscription};
use crate::transport::{Enumerator, Transport};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thermcam_core::types::IoType;
use thermcam_core::{CameraError, ChipId, DiscoveryMode, ManagerEvent, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Manager event subscriber: camera, event, and the error behind an ERROR.
pub type EventCallback = dyn Fn(&Camera, ManagerEvent, Option<CameraError>) + Send + Sync;

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub discovery: DiscoveryMode,
    /// Time between enumerator scans.
    pub poll_interval: Duration,
    /// Host-side store for flat scene corrections and app resources.
    pub host_cache_dir: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryMode::ALL,
            poll_interval: Duration::from_millis(100),
            host_cache_dir: None,
        }
    }
}

/// Registered event subscriber. Inactive until the dispatch thread has
/// replayed the live cameras to it.
pub(crate) struct Subscriber {
    armed: AtomicBool,
    callback: Box<EventCallback>,
}

impl Subscriber {
    fn deliver(&self, camera: &Camera, event: ManagerEvent, status: Option<CameraError>) {
        (self.callback)(camera, event, status);
    }
}

pub(crate) enum Dispatch {
    Event {
        camera: Camera,
        event: ManagerEvent,
        status: Option<CameraError>,
    },
    Arm(Arc<Subscriber>),
    Shutdown,
}

struct Shared {
    config: ManagerConfig,
    enumerators: Vec<Arc<dyn Enumerator>>,
    cameras: Mutex<HashMap<ChipId, Camera>>,
    events: UnboundedSender<Dispatch>,
    shutdown: AtomicBool,
    wake: Mutex<bool>,
    wake_cv: Condvar,
}

impl Shared {
    fn arena(&self) -> MutexGuard<'_, HashMap<ChipId, Camera>> {
        self.cameras.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for one poll interval, or less if woken.
    fn nap(&self) {
        let guard = self.wake.lock().unwrap_or_else(|e| e.into_inner());
        let (mut woken, _) = self
            .wake_cv
            .wait_timeout_while(guard, self.config.poll_interval, |w| {
                !*w && !self.shutdown.load(Ordering::Acquire)
            })
            .unwrap_or_else(|e| e.into_inner());
        *woken = false;
    }

    fn wake(&self) {
        *self.wake.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wake_cv.notify_all();
    }

    /// One discovery pass.
    fn poll(&self) {
        let mut found: HashMap<ChipId, Arc<dyn Transport>> = HashMap::new();
        let mut failed: HashSet<IoType> = HashSet::new();
        for enumerator in &self.enumerators {
            match enumerator.scan() {
                Ok(transports) => {
                    for t in transports.into_iter().filter(|t| t.is_connected()) {
                        found.insert(t.descriptor().chip_id, t);
                    }
                }
                Err(err) => {
                    tracing::warn!(io = %enumerator.io_type(), error = %err, "device scan failed");
                    failed.insert(enumerator.io_type());
                }
            }
        }

        // Evict first so a re-attach queues DISCONNECT before its CONNECT.
        let gone: Vec<Camera> = {
            let mut arena = self.arena();
            let stale: Vec<ChipId> = arena
                .iter()
                .filter(|(_, cam)| !failed.contains(&cam.io_type()))
                .filter(|(cid, cam)| {
                    found
                        .get(*cid)
                        .map_or(true, |t| t.attach_id() != cam.attach_id())
                })
                .map(|(cid, _)| *cid)
                .collect();
            stale.iter().filter_map(|cid| arena.remove(cid)).collect()
        };
        for camera in gone {
            tracing::info!(cid = %camera.chip_id(), io = %camera.io_properties(), "camera disconnected");
            camera.disconnect();
        }

        let mut arena = self.arena();
        for (cid, transport) in found {
            if arena.contains_key(&cid) {
                continue;
            }
            let camera = Camera::new(
                transport,
                self.config.host_cache_dir.clone(),
                self.events.clone(),
            );
            camera.restore_flat_scene_correction();
            tracing::info!(
                cid = %cid,
                sn = %camera.serial_number(),
                io = %camera.io_properties(),
                paired = camera.state() == CameraState::Connected,
                "camera detected"
            );
            camera.announce();
            arena.insert(cid, camera);
        }
    }
}

fn discovery_loop(shared: Arc<Shared>) {
    tracing::debug!(mode = shared.config.discovery.bits(), "discovery thread started");
    while !shared.shutdown.load(Ordering::Acquire) {
        shared.poll();
        shared.nap();
    }
    tracing::debug!("discovery thread exiting");
}

fn dispatch_loop(mut rx: UnboundedReceiver<Dispatch>, observers: Observers<Subscriber>) {
    // Cameras whose CONNECT or READY_TO_PAIR went out and whose DISCONNECT
    // has not yet, keyed by attach, with the event that announced them.
    let mut announced: HashMap<u64, (Camera, ManagerEvent)> = HashMap::new();
    while let Some(msg) = rx.blocking_recv() {
        match msg {
            Dispatch::Event {
                camera,
                event,
                status,
            } => {
                match event {
                    ManagerEvent::Connect | ManagerEvent::ReadyToPair => {
                        announced.insert(camera.attach_id(), (camera.clone(), event));
                    }
                    ManagerEvent::Disconnect => {
                        announced.remove(&camera.attach_id());
                    }
                    ManagerEvent::Error => {}
                }
                tracing::debug!(cid = %camera.chip_id(), event = %event, "dispatching");
                for sub in observers.snapshot() {
                    if sub.armed.load(Ordering::Acquire) {
                        sub.deliver(&camera, event, status);
                    }
                }
            }
            Dispatch::Arm(sub) => {
                // A camera gone since its announcement still gets it; its
                // DISCONNECT is queued behind this message.
                for (camera, event) in announced.values() {
                    let event = match camera.state() {
                        CameraState::Connected => ManagerEvent::Connect,
                        _ => *event,
                    };
                    sub.deliver(camera, event, None);
                }
                sub.armed.store(true, Ordering::Release);
            }
            Dispatch::Shutdown => break,
        }
    }
    tracing::debug!("dispatch thread exiting");
}

/// Owns discovery, every live [`Camera`] and the event subscribers.
pub struct CameraManager {
    shared: Arc<Shared>,
    observers: Observers<Subscriber>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| {
            tracing::error!(thread = name, error = %e, "failed to spawn thread");
            CameraError::SyscallFailed
        })
}

impl CameraManager {
    /// Start a manager discovering on the IO types in `discovery_mask`
    /// (`IoType` bits). An empty or unrecognized mask is invalid.
    pub fn create(discovery_mask: u32, enumerators: Vec<Arc<dyn Enumerator>>) -> Result<Self> {
        let config = ManagerConfig {
            discovery: DiscoveryMode::from_bits(discovery_mask)?,
            ..ManagerConfig::default()
        };
        Self::with_config(config, enumerators)
    }

    pub fn with_config(config: ManagerConfig, enumerators: Vec<Arc<dyn Enumerator>>) -> Result<Self> {
        let enumerators: Vec<_> = enumerators
            .into_iter()
            .filter(|e| config.discovery.contains(e.io_type()))
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            enumerators,
            cameras: Mutex::new(HashMap::new()),
            events: tx,
            shutdown: AtomicBool::new(false),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
        });
        let observers: Observers<Subscriber> = Observers::new();

        let dispatch_observers = observers.clone();
        let dispatcher = spawn("thermcam-events", move || dispatch_loop(rx, dispatch_observers))?;
        let discovery_shared = Arc::clone(&shared);
        let discovery = match spawn("thermcam-discovery", move || discovery_loop(discovery_shared)) {
            Ok(handle) => handle,
            Err(err) => {
                let _ = shared.events.send(Dispatch::Shutdown);
                let _ = dispatcher.join();
                return Err(err);
            }
        };

        tracing::info!(
            mode = shared.config.discovery.bits(),
            enumerators = shared.enumerators.len(),
            "camera manager created"
        );
        Ok(Self {
            shared,
            observers,
            discovery: Mutex::new(Some(discovery)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        self.shared.config.discovery
    }

    /// Subscribe to lifecycle events. The new subscriber first receives
    /// CONNECT or READY_TO_PAIR for every camera already announced, then
    /// live events. Dropping the handle unsubscribes.
    pub fn register_event_callback<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Camera, ManagerEvent, Option<CameraError>) + Send + Sync + 'static,
    {
        let sub = Arc::new(Subscriber {
            armed: AtomicBool::new(false),
            callback: Box::new(callback),
        });
        let handle = self.observers.subscribe(Arc::clone(&sub));
        let _ = self.shared.events.send(Dispatch::Arm(sub));
        handle
    }

    /// Snapshot of the live cameras.
    pub fn cameras(&self) -> Vec<Camera> {
        self.shared.arena().values().cloned().collect()
    }

    pub fn camera(&self, cid: &ChipId) -> Option<Camera> {
        self.shared.arena().get(cid).cloned()
    }

    /// Run a discovery pass now instead of at the next poll tick.
    pub fn rescan(&self) {
        self.shared.wake();
    }

    /// Stop every session, disconnect every camera and shut the background
    /// threads down. Blocks until no callback is running, unless called
    /// from inside an event callback. Idempotent; also run on drop.
    pub fn destroy(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.wake();
        if let Some(handle) = self.discovery.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }

        let cameras: Vec<Camera> = self.shared.arena().drain().map(|(_, c)| c).collect();
        for camera in cameras {
            camera.disconnect();
        }

        let _ = self.shared.events.send(Dispatch::Shutdown);
        let handle = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!("destroy called from an event callback, not joining");
            } else {
                let _ = handle.join();
            }
        }
        self.observers.clear();
        tracing::info!("camera manager destroyed");
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimCamera};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(3);

    type Log = Arc<Mutex<Vec<(ChipId, ManagerEvent)>>>;

    fn recorder(manager: &CameraManager) -> (Log, Subscription) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = manager.register_event_callback(move |cam, event, _| {
            sink.lock().unwrap().push((cam.chip_id(), event));
        });
        (log, sub)
    }

    fn wait_for(log: &Log, n: usize) -> Vec<(ChipId, ManagerEvent)> {
        let start = Instant::now();
        loop {
            let events = log.lock().unwrap().clone();
            if events.len() >= n {
                return events;
            }
            assert!(start.elapsed() < WAIT, "saw only {events:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn fast_config(mode: DiscoveryMode) -> ManagerConfig {
        ManagerConfig {
            discovery: mode,
            poll_interval: Duration::from_millis(10),
            host_cache_dir: None,
        }
    }

    #[test]
    fn test_late_subscriber_sees_announce_before_queued_disconnect() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let observers: Observers<Subscriber> = Observers::new();
        let worker = {
            let observers = observers.clone();
            thread::spawn(move || dispatch_loop(rx, observers))
        };
        let (camera, _sim, _own_rx) = crate::camera::test_camera(SimCamera::usb(0));

        tx.send(Dispatch::Event {
            camera: camera.clone(),
            event: ManagerEvent::Connect,
            status: None,
        })
        .unwrap();
        camera.disconnect();

        let log: Arc<Mutex<Vec<ManagerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = Arc::new(Subscriber {
            armed: AtomicBool::new(false),
            callback: Box::new(move |_: &Camera, event: ManagerEvent, _: Option<CameraError>| {
                sink.lock().unwrap().push(event)
            }),
        });
        let _handle = observers.subscribe(Arc::clone(&sub));
        tx.send(Dispatch::Arm(sub)).unwrap();
        tx.send(Dispatch::Event {
            camera: camera.clone(),
            event: ManagerEvent::Disconnect,
            status: None,
        })
        .unwrap();
        tx.send(Dispatch::Shutdown).unwrap();
        worker.join().unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![ManagerEvent::Connect, ManagerEvent::Disconnect]
        );
    }

    #[test]
    fn test_create_rejects_bad_masks() {
        assert_eq!(
            CameraManager::create(0, Vec::new()).err(),
            Some(CameraError::InvalidParameter)
        );
        assert_eq!(
            CameraManager::create(0x10, Vec::new()).err(),
            Some(CameraError::InvalidParameter)
        );
        let manager = CameraManager::create(IoType::Usb.bits(), Vec::new()).unwrap();
        assert_eq!(manager.discovery_mode(), DiscoveryMode::USB);
    }

    #[test]
    fn test_usb_only_mask_ignores_spi() {
        let usb = Arc::new(SimBus::new(IoType::Usb));
        let spi = Arc::new(SimBus::new(IoType::Spi));
        usb.attach(Arc::new(SimCamera::usb(0)));
        spi.attach(Arc::new(SimCamera::spi(0)));
        let manager = CameraManager::with_config(
            fast_config(DiscoveryMode::USB),
            vec![usb as Arc<dyn Enumerator>, spi as Arc<dyn Enumerator>],
        )
        .unwrap();
        let (log, _sub) = recorder(&manager);
        let events = wait_for(&log, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(events[0], (SimCamera::usb(0).descriptor().chip_id, ManagerEvent::Connect));
        assert_eq!(manager.cameras().len(), 1);
    }

    #[test]
    fn test_unpaired_camera_is_ready_to_pair() {
        let bus = Arc::new(SimBus::new(IoType::Usb));
        bus.attach(Arc::new(SimCamera::usb(0).unpaired()));
        let manager =
            CameraManager::with_config(fast_config(DiscoveryMode::ALL), vec![bus as Arc<dyn Enumerator>])
                .unwrap();
        let (log, _sub) = recorder(&manager);
        assert_eq!(wait_for(&log, 1)[0].1, ManagerEvent::ReadyToPair);
    }

    #[test]
    fn test_reattach_is_a_new_lifecycle() {
        let bus = Arc::new(SimBus::new(IoType::Usb));
        let sim = Arc::new(SimCamera::usb(0));
        let cid = sim.descriptor().chip_id;
        bus.attach(Arc::clone(&sim));
        let manager = CameraManager::with_config(
            fast_config(DiscoveryMode::ALL),
            vec![Arc::clone(&bus) as Arc<dyn Enumerator>],
        )
        .unwrap();
        let (log, _sub) = recorder(&manager);
        wait_for(&log, 1);
        let first = manager.camera(&cid).unwrap();

        let unplugged = bus.detach(&cid).unwrap();
        manager.rescan();
        wait_for(&log, 2);
        assert!(!first.is_valid());
        assert!(manager.camera(&cid).is_none());

        bus.attach(unplugged);
        manager.rescan();
        let events: Vec<ManagerEvent> = wait_for(&log, 3).into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            events,
            vec![ManagerEvent::Connect, ManagerEvent::Disconnect, ManagerEvent::Connect]
        );
        let second = manager.camera(&cid).unwrap();
        assert_ne!(first, second);
        assert!(second.is_valid());
        assert!(!first.is_valid());
    }

    #[test]
    fn test_late_subscriber_gets_replay_once() {
        let bus = Arc::new(SimBus::new(IoType::Spi));
        bus.attach(Arc::new(SimCamera::spi(0)));
        bus.attach(Arc::new(SimCamera::spi(1)));
        let manager =
            CameraManager::with_config(fast_config(DiscoveryMode::SPI), vec![bus as Arc<dyn Enumerator>])
                .unwrap();
        let (early, _a) = recorder(&manager);
        wait_for(&early, 2);
        let (late, _b) = recorder(&manager);
        wait_for(&late, 2);
        thread::sleep(Duration::from_millis(50));
        let late = late.lock().unwrap();
        assert_eq!(late.len(), 2);
        assert!(late.iter().all(|(_, e)| *e == ManagerEvent::Connect));
    }

    #[test]
    fn test_destroy_disconnects_and_invalidates() {
        let bus = Arc::new(SimBus::new(IoType::Usb));
        bus.attach(Arc::new(SimCamera::usb(0)));
        let manager =
            CameraManager::with_config(fast_config(DiscoveryMode::ALL), vec![bus as Arc<dyn Enumerator>])
                .unwrap();
        let (log, _sub) = recorder(&manager);
        wait_for(&log, 1);
        let camera = manager.cameras().pop().unwrap();
        camera
            .capture_session_start(thermcam_core::FrameFormat::Grayscale.into())
            .unwrap();

        manager.destroy();
        let events = log.lock().unwrap().clone();
        assert_eq!(events.last().map(|(_, e)| *e), Some(ManagerEvent::Disconnect));
        assert!(!camera.is_valid());
        assert!(manager.cameras().is_empty());
        manager.destroy();
    }
}
