//! End-to-end device lifecycle against the simulated bus.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thermcam_core::types::{AgcMode, IoType};
use thermcam_core::{CameraError, ChipId, FrameFormat, FrameFormats, ManagerEvent};
use thermcam_hw::{
    Camera, CameraManager, CameraState, Enumerator, ManagerConfig, SessionState, SimBus, SimCamera,
    Transport,
};

const WAIT: Duration = Duration::from_secs(5);

type Log = Arc<Mutex<Vec<(ChipId, ManagerEvent, Option<CameraError>)>>>;

fn eventually(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn events_of(log: &Log, cid: &ChipId) -> Vec<ManagerEvent> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(c, _, _)| c == cid)
        .map(|(_, e, _)| *e)
        .collect()
}

fn manager_with(buses: Vec<Arc<SimBus>>, mask: u32) -> CameraManager {
    let config = ManagerConfig {
        discovery: thermcam_core::DiscoveryMode::from_bits(mask).unwrap(),
        poll_interval: Duration::from_millis(10),
        host_cache_dir: None,
    };
    let enumerators = buses
        .into_iter()
        .map(|b| b as Arc<dyn Enumerator>)
        .collect();
    CameraManager::with_config(config, enumerators).unwrap()
}

#[test]
fn test_usb_camera_full_lifecycle() {
    let usb = Arc::new(SimBus::new(IoType::Usb));
    let spi = Arc::new(SimBus::new(IoType::Spi));
    let sim = Arc::new(SimCamera::usb(0));
    let cid = sim.descriptor().chip_id;
    usb.attach(Arc::clone(&sim));
    spi.attach(Arc::new(SimCamera::spi(0)));

    let manager = manager_with(vec![Arc::clone(&usb), spi], IoType::Usb.bits());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = manager.register_event_callback(move |cam: &Camera, event, status| {
        sink.lock().unwrap().push((cam.chip_id(), event, status));
    });

    eventually(|| !events_of(&log, &cid).is_empty());
    assert_eq!(events_of(&log, &cid), vec![ManagerEvent::Connect]);
    assert_eq!(log.lock().unwrap().len(), 1, "SPI camera must not be discovered");

    let camera = manager.camera(&cid).unwrap();
    assert_eq!(camera.chip_id().as_str(), cid.as_str());
    assert_eq!(
        camera.capture_session_start(FrameFormats::empty()),
        Err(CameraError::InvalidParameter)
    );
    assert_eq!(camera.capture_session_state(), Ok(SessionState::Stopped));

    camera.set_agc_mode(AgcMode::HistEq).unwrap();
    let formats: FrameFormats = [FrameFormat::Grayscale, FrameFormat::ThermographyFloat]
        .into_iter()
        .collect();
    camera.capture_session_start(formats).unwrap();
    let frame = camera.wait_frame(WAIT).unwrap();
    let (w, h) = camera.resolution();
    for format in [FrameFormat::Grayscale, FrameFormat::ThermographyFloat] {
        let plane = frame.frame().plane(format).unwrap();
        assert_eq!((plane.width(), plane.height()), (w, h));
        assert_eq!(plane.header().chip_id, cid);
    }
    drop(frame);

    usb.detach(&cid).unwrap();
    manager.rescan();
    eventually(|| events_of(&log, &cid).len() == 2);
    assert_eq!(
        events_of(&log, &cid),
        vec![ManagerEvent::Connect, ManagerEvent::Disconnect]
    );
    assert!(!camera.is_valid());
    assert_eq!(camera.state(), CameraState::Disconnected);
    assert_eq!(camera.agc_mode(), Err(CameraError::NoDevice));
    assert!(!sim.is_streaming());

    usb.attach(Arc::clone(&sim));
    manager.rescan();
    eventually(|| events_of(&log, &cid).len() == 3);
    let fresh = manager.camera(&cid).unwrap();
    assert_ne!(fresh, camera);
    assert!(fresh.is_valid());
    assert_eq!(fresh.agc_mode(), Ok(AgcMode::Linear));

    manager.destroy();
    assert_eq!(
        events_of(&log, &cid),
        vec![
            ManagerEvent::Connect,
            ManagerEvent::Disconnect,
            ManagerEvent::Connect,
            ManagerEvent::Disconnect
        ]
    );
    assert!(!fresh.is_valid());
}

#[test]
fn test_pairing_flow() {
    let bus = Arc::new(SimBus::new(IoType::Spi));
    let sim = Arc::new(SimCamera::spi(2).unpaired());
    let cid = sim.descriptor().chip_id;
    bus.attach(Arc::clone(&sim));

    let manager = manager_with(vec![bus], IoType::Spi.bits());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = manager.register_event_callback(move |cam: &Camera, event, status| {
        sink.lock().unwrap().push((cam.chip_id(), event, status));
    });
    eventually(|| !events_of(&log, &cid).is_empty());
    assert_eq!(events_of(&log, &cid), vec![ManagerEvent::ReadyToPair]);

    let camera = manager.camera(&cid).unwrap();
    assert_eq!(camera.state(), CameraState::NeedsPairing);
    assert_eq!(
        camera.capture_session_start(FrameFormat::Grayscale.into()),
        Err(CameraError::NotPaired)
    );

    let mut seen = Vec::new();
    let mut record = |pct: u8| seen.push(pct);
    camera.store_calibration_data(None, Some(&mut record)).unwrap();
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(camera.state(), CameraState::Connected);
    assert!(sim.is_paired());

    camera
        .capture_session_start(FrameFormat::Grayscale.into())
        .unwrap();
    assert!(camera.wait_frame(WAIT).is_ok());
    camera.capture_session_stop().unwrap();
    assert_eq!(camera.capture_session_state(), Ok(SessionState::Stopped));
}

#[test]
fn test_destroy_from_event_callback_returns() {
    let bus = Arc::new(SimBus::new(IoType::Usb));
    bus.attach(Arc::new(SimCamera::usb(3)));
    let manager = Arc::new(manager_with(vec![bus], IoType::Usb.bits()));
    let done = Arc::new(Mutex::new(false));

    let weak = Arc::downgrade(&manager);
    let flag = Arc::clone(&done);
    let _sub = manager.register_event_callback(move |_, event, _| {
        if event == ManagerEvent::Connect {
            if let Some(m) = weak.upgrade() {
                m.destroy();
            }
            *flag.lock().unwrap() = true;
        }
    });
    eventually(|| *done.lock().unwrap());
    assert!(manager.cameras().is_empty());
}
