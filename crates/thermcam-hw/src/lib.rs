//! thermcam-hw — Device manager, capture sessions and frame delivery.
//!
//! Discovers cameras over pluggable transports, runs one capture worker per
//! streaming camera, and publishes AGC-corrected frames with a 2048-byte
//! header per plane. [`sim`] provides an in-process bus used by the daemon
//! and the tests.

pub mod camera;
pub mod frame;
pub mod manager;
pub mod observer;
pub mod profiles;
pub mod session;
pub mod sim;
pub mod transfer;
pub mod transport;

pub use camera::{Camera, CameraState};
pub use frame::{CameraFrame, FrameHeader, FrameLock, FramePlane, HEADER_SIZE};
pub use manager::{CameraManager, EventCallback, ManagerConfig};
pub use observer::Subscription;
pub use session::{FrameCallback, SessionState, SessionStats};
pub use sim::{SimBus, SimCamera};
pub use transport::{DeviceDescriptor, Enumerator, MemoryRegion, RawFrame, Transport};
