//! Chunked transfers against device storage and the host cache.
//!
//! Transfers are not resumable and cannot be cancelled once started; a
//! failure part-way leaves the destination region in whatever state the
//! device reached and the caller retries from the start.

use crate::camera::Camera;
use crate::transport::{MemoryRegion, Transport};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thermcam_core::filters::FlatSceneCorrection;
use thermcam_core::types::{AppResourcesRegion, FscId};
use thermcam_core::{CameraError, Result};

/// Bytes moved per device request.
pub const CHUNK_SIZE: usize = 4096;

/// Percent-complete reporter. Values never decrease and 100 is reported
/// exactly once, by [`Progress::finish`].
struct Progress<'a> {
    callback: Option<&'a mut dyn FnMut(u8)>,
    last: u8,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<&'a mut dyn FnMut(u8)>) -> Self {
        Self { callback, last: 0 }
    }

    fn report(&mut self, done: usize, total: usize) {
        let pct = if total == 0 {
            0
        } else {
            (done.saturating_mul(100) / total).min(99) as u8
        };
        self.emit(pct.max(self.last));
    }

    fn finish(&mut self) {
        self.emit(100);
    }

    fn emit(&mut self, pct: u8) {
        self.last = pct;
        if let Some(cb) = self.callback.as_mut() {
            cb(pct);
        }
    }
}

fn write_region(
    transport: &dyn Transport,
    region: MemoryRegion,
    data: &[u8],
    progress: &mut Progress<'_>,
) -> Result<()> {
    transport.erase_memory(region)?;
    let mut written = 0;
    for chunk in data.chunks(CHUNK_SIZE) {
        transport.write_memory(region, written, chunk)?;
        written += chunk.len();
        progress.report(written, data.len());
    }
    transport.commit_memory(region)
}

fn read_region(
    transport: &dyn Transport,
    region: MemoryRegion,
    len: usize,
    progress: &mut Progress<'_>,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let end = (done + CHUNK_SIZE).min(len);
        let n = transport.read_memory(region, done, &mut out[done..end])?;
        if n == 0 {
            break;
        }
        done += n;
        progress.report(done, len);
    }
    out.truncate(done);
    Ok(out)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CameraError::from_read(&e))
}

/// Calibration payload: every regular file of `dir`, in name order.
fn read_calibration_dir(dir: &Path) -> Result<Vec<u8>> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CameraError::DirectoryDoesNotExist,
        _ => CameraError::from_read(&e),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    if files.is_empty() {
        return Err(CameraError::FileDoesNotExist);
    }
    files.sort();
    let mut data = Vec::new();
    for file in &files {
        tracing::debug!(file = %file.display(), "reading calibration file");
        data.extend(read_file(file)?);
    }
    Ok(data)
}

impl Camera {
    fn cache_path(&self, name: &str) -> Option<PathBuf> {
        self.host_cache_dir()
            .map(|dir| dir.join(self.chip_id().as_str()).join(name))
    }

    fn fsc_file_name(id: FscId) -> String {
        format!("fsc_{}.bin", id.index())
    }

    fn app_resources_file_name(region: AppResourcesRegion) -> String {
        format!("app_resources_{}.bin", region.id())
    }

    fn write_cache(&self, name: &str, data: &[u8]) -> Result<Option<PathBuf>> {
        let Some(path) = self.cache_path(name) else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CameraError::from_write(&e))?;
        }
        fs::write(&path, data).map_err(|e| CameraError::from_write(&e))?;
        Ok(Some(path))
    }

    /// Stream a firmware image from the host to the device and activate it.
    pub fn update_firmware(
        &self,
        path: impl AsRef<Path>,
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<()> {
        self.check_idle()?;
        let path = path.as_ref();
        let image = read_file(path)?;
        if image.is_empty() {
            return Err(CameraError::InvalidFirmwareImage);
        }
        tracing::info!(
            cid = %self.chip_id(),
            file = %path.display(),
            bytes = image.len(),
            "updating firmware"
        );
        let mut progress = Progress::new(progress);
        write_region(
            self.transport().as_ref(),
            MemoryRegion::Firmware,
            &image,
            &mut progress,
        )?;
        progress.finish();
        tracing::info!(cid = %self.chip_id(), "firmware update complete");
        Ok(())
    }

    /// Pair the camera by storing calibration data on the processor.
    ///
    /// With `source_dir`, the files of `<source_dir>/<CID>/` (or of
    /// `source_dir` itself when that subdirectory is absent) are stored in
    /// name order. Without it, the sensor's factory calibration is copied.
    pub fn store_calibration_data(
        &self,
        source_dir: Option<&Path>,
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<()> {
        self.check_idle()?;
        let transport = self.transport().as_ref();
        let mut progress = Progress::new(progress);

        let data = match source_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(CameraError::DirectoryDoesNotExist);
                }
                let per_camera = dir.join(self.chip_id().as_str());
                read_calibration_dir(if per_camera.is_dir() { per_camera.as_path() } else { dir })?
            }
            None => {
                let len = transport.memory_len(MemoryRegion::FactoryCalibration)?;
                let mut silent = Progress::new(None);
                read_region(transport, MemoryRegion::FactoryCalibration, len, &mut silent)?
            }
        };
        if data.is_empty() {
            return Err(CameraError::VerifyFailed);
        }

        tracing::info!(cid = %self.chip_id(), bytes = data.len(), "storing calibration data");
        write_region(transport, MemoryRegion::Calibration, &data, &mut progress)?;
        self.mark_paired();
        progress.finish();
        Ok(())
    }

    /// Derive a flat scene correction from the live image and activate it.
    /// The camera must be streaming and looking at a uniform scene.
    pub fn store_flat_scene_correction(
        &self,
        id: FscId,
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<()> {
        self.check_valid()?;
        if self.session().state() != crate::session::SessionState::Streaming {
            return Err(CameraError::CannotPerformRequest);
        }
        let raw = self
            .session()
            .last_raw()
            .ok_or(CameraError::CannotPerformRequest)?;
        let fsc = FlatSceneCorrection::from_frame(&raw.counts, raw.width, raw.height)?;
        let bytes = fsc.to_bytes();
        let mut progress = Progress::new(progress);

        if let Some(path) = self.write_cache(&Self::fsc_file_name(id), &bytes)? {
            tracing::debug!(file = %path.display(), "flat scene correction cached");
        }
        let region = MemoryRegion::FlatSceneCorrection(id);
        match self.transport().memory_len(region) {
            Ok(_) => write_region(self.transport().as_ref(), region, &bytes, &mut progress)?,
            Err(CameraError::NotSupported) => {
                tracing::debug!(cid = %self.chip_id(), "device has no flat scene correction storage")
            }
            Err(err) => return Err(err),
        }

        *self.lock_fsc() = Some(fsc);
        tracing::info!(cid = %self.chip_id(), id = id.index(), "flat scene correction stored");
        progress.finish();
        Ok(())
    }

    /// Remove a flat scene correction from the device and the host cache
    /// and stop applying it.
    pub fn delete_flat_scene_correction(
        &self,
        id: FscId,
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<()> {
        self.check_idle()?;
        let mut progress = Progress::new(progress);
        match self
            .transport()
            .erase_memory(MemoryRegion::FlatSceneCorrection(id))
        {
            Ok(()) | Err(CameraError::NotSupported) => {}
            Err(err) => return Err(err),
        }
        progress.report(1, 2);
        if let Some(path) = self.cache_path(&Self::fsc_file_name(id)) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CameraError::from_write(&e)),
            }
        }
        *self.lock_fsc() = None;
        tracing::info!(cid = %self.chip_id(), id = id.index(), "flat scene correction deleted");
        progress.finish();
        Ok(())
    }

    /// Stored flat scene correction, device first, then the host cache.
    pub(crate) fn read_flat_scene_correction(&self, id: FscId) -> Result<Option<FlatSceneCorrection>> {
        let region = MemoryRegion::FlatSceneCorrection(id);
        let transport = self.transport().as_ref();
        match transport.memory_len(region) {
            Ok(0) | Err(CameraError::NotSupported) => {}
            Ok(len) => {
                let raw = read_region(transport, region, len, &mut Progress::new(None))?;
                return FlatSceneCorrection::from_bytes(&raw).map(Some);
            }
            Err(err) => return Err(err),
        }
        let Some(path) = self.cache_path(&Self::fsc_file_name(id)) else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(raw) => FlatSceneCorrection::from_bytes(&raw).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CameraError::from_read(&e)),
        }
    }

    /// Read up to `buf.len()` bytes of an app resource region. Returns the
    /// number of bytes read.
    pub fn load_app_resources(
        &self,
        region: AppResourcesRegion,
        buf: &mut [u8],
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<usize> {
        if buf.len() > AppResourcesRegion::MAX_SIZE {
            return Err(CameraError::InvalidParameter);
        }
        self.check_idle()?;
        let mut progress = Progress::new(progress);
        let device_region = MemoryRegion::AppResources(region);
        let transport = self.transport().as_ref();

        let data = match transport.memory_len(device_region) {
            Ok(len) => read_region(transport, device_region, len.min(buf.len()), &mut progress)?,
            Err(CameraError::NotSupported) => {
                let path = self
                    .cache_path(&Self::app_resources_file_name(region))
                    .ok_or(CameraError::NotSupported)?;
                let mut data = read_file(&path)?;
                data.truncate(buf.len());
                data
            }
            Err(err) => return Err(err),
        };
        buf[..data.len()].copy_from_slice(&data);
        progress.finish();
        Ok(data.len())
    }

    /// Store `data` in an app resource region.
    pub fn store_app_resources(
        &self,
        region: AppResourcesRegion,
        data: &[u8],
        progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<()> {
        if data.len() > AppResourcesRegion::MAX_SIZE {
            return Err(CameraError::InvalidParameter);
        }
        self.check_idle()?;
        let mut progress = Progress::new(progress);
        let device_region = MemoryRegion::AppResources(region);

        match self.transport().memory_len(device_region) {
            Ok(_) => write_region(self.transport().as_ref(), device_region, data, &mut progress)?,
            Err(CameraError::NotSupported) => {
                self.write_cache(&Self::app_resources_file_name(region), data)?
                    .ok_or(CameraError::NotSupported)?;
            }
            Err(err) => return Err(err),
        }
        tracing::debug!(cid = %self.chip_id(), region = region.id(), bytes = data.len(), "app resources stored");
        progress.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{test_camera, CameraState};
    use crate::sim::SimCamera;
    use std::sync::Arc;
    use std::time::Duration;
    use thermcam_core::types::{Filter, FilterState, FrameFormat};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "thermcam-transfer-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn assert_progress(seen: &[u8]) {
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(seen.iter().filter(|&&p| p == 100).count(), 1);
    }

    #[test]
    fn test_progress_clamps_and_finishes() {
        let mut seen = Vec::new();
        let mut cb = |p: u8| seen.push(p);
        let mut progress = Progress::new(Some(&mut cb));
        progress.report(50, 100);
        progress.report(10, 100);
        progress.report(100, 100);
        progress.finish();
        assert_eq!(seen, vec![50, 50, 99, 100]);
    }

    #[test]
    fn test_firmware_update_streams_file() {
        let dir = scratch_dir("fw");
        let image: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let path = dir.join("fw.bin");
        fs::write(&path, &image).unwrap();

        let (camera, sim, _rx) = test_camera(SimCamera::usb(0));
        let mut seen = Vec::new();
        camera
            .update_firmware(&path, Some(&mut |p: u8| seen.push(p)))
            .unwrap();
        assert_progress(&seen);
        assert_eq!(seen.len(), 10_000usize.div_ceil(CHUNK_SIZE) + 1);
        assert_eq!(sim.region(MemoryRegion::Firmware).unwrap(), image);

        assert_eq!(
            camera.update_firmware(dir.join("missing.bin"), None),
            Err(CameraError::FileDoesNotExist)
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_transfers_refused_while_streaming() {
        let (camera, _sim, _rx) = test_camera(SimCamera::usb(0));
        camera
            .capture_session_start(FrameFormat::Grayscale.into())
            .unwrap();
        assert_eq!(
            camera.store_calibration_data(None, None),
            Err(CameraError::DeviceBusy)
        );
        assert_eq!(
            camera.store_app_resources(AppResourcesRegion::Region0, b"x", None),
            Err(CameraError::DeviceBusy)
        );
        camera.capture_session_stop().unwrap();
    }

    #[test]
    fn test_pairing_from_factory_calibration() {
        let (camera, sim, _rx) = test_camera(SimCamera::usb(0).unpaired());
        assert_eq!(camera.state(), CameraState::NeedsPairing);
        let mut seen = Vec::new();
        camera
            .store_calibration_data(None, Some(&mut |p: u8| seen.push(p)))
            .unwrap();
        assert_progress(&seen);
        assert!(sim.is_paired());
        assert_eq!(camera.state(), CameraState::Connected);
        assert_eq!(
            sim.region(MemoryRegion::Calibration),
            sim.region(MemoryRegion::FactoryCalibration)
        );
    }

    #[test]
    fn test_pairing_from_directory_prefers_cid_subdir() {
        let dir = scratch_dir("cal");
        let (camera, sim, _rx) = test_camera(SimCamera::usb(0).unpaired());
        let sub = dir.join(camera.chip_id().as_str());
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("b.cal"), b"BBB").unwrap();
        fs::write(sub.join("a.cal"), b"AA").unwrap();
        fs::write(dir.join("other.cal"), b"ZZZZ").unwrap();

        camera.store_calibration_data(Some(&dir), None).unwrap();
        assert_eq!(sim.region(MemoryRegion::Calibration).unwrap(), b"AABBB");
        assert_eq!(
            camera.store_calibration_data(Some(&dir.join("nope")), None),
            Err(CameraError::DirectoryDoesNotExist)
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_fsc_requires_streaming_and_round_trips() {
        let dir = scratch_dir("fsc");
        let sim = Arc::new(SimCamera::usb(0).with_resolution(6, 4));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let camera = Camera::new(Arc::clone(&sim) as Arc<dyn Transport>, Some(dir.clone()), tx);
        camera
            .set_filter_state(Filter::GradientCorrection, FilterState::Disabled)
            .unwrap();
        assert_eq!(
            camera.store_flat_scene_correction(FscId::Id0, None),
            Err(CameraError::CannotPerformRequest)
        );

        camera
            .capture_session_start(FrameFormat::Corrected.into())
            .unwrap();
        camera.wait_frame(Duration::from_secs(2)).unwrap();
        let mut seen = Vec::new();
        camera
            .store_flat_scene_correction(FscId::Id0, Some(&mut |p: u8| seen.push(p)))
            .unwrap();
        assert_progress(&seen);
        assert!(camera.has_flat_scene_correction().unwrap());
        camera.capture_session_stop().unwrap();

        let cached = camera.cache_path("fsc_0.bin").unwrap();
        assert!(cached.is_file());
        let on_device = sim.region(MemoryRegion::FlatSceneCorrection(FscId::Id0)).unwrap();
        assert_eq!(on_device, fs::read(&cached).unwrap());
        assert!(camera.read_flat_scene_correction(FscId::Id0).unwrap().is_some());

        camera.delete_flat_scene_correction(FscId::Id0, None).unwrap();
        assert!(!camera.has_flat_scene_correction().unwrap());
        assert!(!cached.exists());
        assert!(camera.read_flat_scene_correction(FscId::Id0).unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_app_resources_size_cap_and_device_storage() {
        let (camera, _sim, _rx) = test_camera(SimCamera::usb(0));
        let too_big = vec![0u8; AppResourcesRegion::MAX_SIZE + 1];
        assert_eq!(
            camera.store_app_resources(AppResourcesRegion::Region2, &too_big, None),
            Err(CameraError::InvalidParameter)
        );
        let mut big_buf = vec![0u8; AppResourcesRegion::MAX_SIZE + 1];
        assert_eq!(
            camera.load_app_resources(AppResourcesRegion::Region2, &mut big_buf, None),
            Err(CameraError::InvalidParameter)
        );

        let payload: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        let mut seen = Vec::new();
        camera
            .store_app_resources(AppResourcesRegion::Region1, &payload, Some(&mut |p: u8| seen.push(p)))
            .unwrap();
        assert_progress(&seen);
        let mut buf = vec![0u8; 10_000];
        let n = camera
            .load_app_resources(AppResourcesRegion::Region1, &mut buf, None)
            .unwrap();
        assert_eq!(&buf[..n], &payload[..]);
    }

    #[test]
    fn test_app_resources_fall_back_to_host_cache() {
        let dir = scratch_dir("res");
        let sim = Arc::new(SimCamera::spi(0).with_flash_regions(false));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let camera = Camera::new(Arc::clone(&sim) as Arc<dyn Transport>, Some(dir.clone()), tx);
        camera
            .store_app_resources(AppResourcesRegion::Region0, b"overlay", None)
            .unwrap();
        let mut buf = [0u8; 4];
        let n = camera
            .load_app_resources(AppResourcesRegion::Region0, &mut buf, None)
            .unwrap();
        assert_eq!(&buf[..n], b"over");

        let (bare, _sim, _rx) = test_camera(SimCamera::spi(1).with_flash_regions(false));
        assert_eq!(
            bare.store_app_resources(AppResourcesRegion::Region0, b"x", None),
            Err(CameraError::NotSupported)
        );
        let _ = fs::remove_dir_all(&dir);
    }
}
