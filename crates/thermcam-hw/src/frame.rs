//! Frame object: format-tagged pixel planes, each with a 2048-byte header.
//!
//! A [`CameraFrame`] is built by the capture session, published behind an
//! `Arc`, and read-only from then on. Consumers extend its lifetime past
//! the frame callback by holding a [`FrameLock`]; the session will not
//! deliver another frame while the previous one is still locked.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thermcam_core::radiometry::Sample;
use thermcam_core::types::{FrameFormat, FrameFormats};
use thermcam_core::{CameraError, ChipId, CorePartNumber, FirmwareVersion, Result, SerialNumber};

pub const HEADER_SIZE: usize = 2048;
pub const HEADER_SENTINEL: u32 = 0x5448_434D;
pub const HEADER_VERSION: u8 = 1;

const HISTEQ_RESERVED: usize = 64;
const LINEAR_RESERVED: usize = 32;
const TAIL_RESERVED: usize = 1798;

/// Fixed-layout frame header. Multi-byte fields are host-endian and the
/// layout is packed; reserved regions are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub sentinel: u32,
    pub version: u8,
    /// [`FrameFormat`] bits of the plane this header describes.
    pub frame_type: u32,
    pub width: u16,
    pub height: u16,
    pub channels: u8,
    /// Bits per channel sample.
    pub pixel_depth: u8,
    pub pixel_padding: u8,
    pub line_stride: u16,
    pub line_padding: u16,
    pub header_size: u16,
    pub timestamp_utc_ns: u64,
    pub chip_id: ChipId,
    pub serial_number: SerialNumber,
    pub core_part_number: CorePartNumber,
    pub firmware_version: FirmwareVersion,
    pub io_type: u8,
    pub fpa_frame_count: u32,
    pub fpa_diode_count: u32,
    /// Sensor housing estimate, Celsius.
    pub environment_temperature: f32,
    pub thermography_min: Sample,
    pub thermography_max: Sample,
    pub thermography_spot: Sample,
    pub agc_mode: u8,
    pub histeq_agc_num_bins: u16,
    pub histeq_agc_bin_width: u16,
    pub histeq_agc_gain_limit_factor: f32,
    pub histeq_agc_reserved: [u8; HISTEQ_RESERVED],
    pub linear_agc_min: u32,
    pub linear_agc_max: u32,
    pub linear_agc_reserved: [u8; LINEAR_RESERVED],
    pub gradient_correction_filter_state: u8,
    pub flat_scene_correction_filter_state: u8,
    pub reserved: [u8; TAIL_RESERVED],
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            sentinel: HEADER_SENTINEL,
            version: HEADER_VERSION,
            frame_type: 0,
            width: 0,
            height: 0,
            channels: 0,
            pixel_depth: 0,
            pixel_padding: 0,
            line_stride: 0,
            line_padding: 0,
            header_size: HEADER_SIZE as u16,
            timestamp_utc_ns: 0,
            chip_id: ChipId::default(),
            serial_number: SerialNumber::default(),
            core_part_number: CorePartNumber::default(),
            firmware_version: FirmwareVersion::default(),
            io_type: 0,
            fpa_frame_count: 0,
            fpa_diode_count: 0,
            environment_temperature: 0.0,
            thermography_min: Sample::default(),
            thermography_max: Sample::default(),
            thermography_spot: Sample::default(),
            agc_mode: 0,
            histeq_agc_num_bins: 0,
            histeq_agc_bin_width: 0,
            histeq_agc_gain_limit_factor: 0.0,
            histeq_agc_reserved: [0; HISTEQ_RESERVED],
            linear_agc_min: 0,
            linear_agc_max: 0,
            linear_agc_reserved: [0; LINEAR_RESERVED],
            gradient_correction_filter_state: 0,
            flat_scene_correction_filter_state: 0,
            reserved: [0; TAIL_RESERVED],
        }
    }
}

struct Writer {
    buf: [u8; HEADER_SIZE],
    at: usize,
}

impl Writer {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }

    fn sample(&mut self, s: &Sample) {
        self.put(&s.x.to_ne_bytes());
        self.put(&s.y.to_ne_bytes());
        self.put(&s.value.to_ne_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.at..self.at + N]);
        self.at += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_ne_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_ne_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_ne_bytes(self.take())
    }

    fn sample(&mut self) -> Sample {
        Sample {
            x: self.u16(),
            y: self.u16(),
            value: self.f32(),
        }
    }
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut w = Writer {
            buf: [0u8; HEADER_SIZE],
            at: 0,
        };
        w.put(&self.sentinel.to_ne_bytes());
        w.put(&[self.version]);
        w.put(&self.frame_type.to_ne_bytes());
        w.put(&self.width.to_ne_bytes());
        w.put(&self.height.to_ne_bytes());
        w.put(&[self.channels, self.pixel_depth, self.pixel_padding]);
        w.put(&self.line_stride.to_ne_bytes());
        w.put(&self.line_padding.to_ne_bytes());
        w.put(&self.header_size.to_ne_bytes());
        w.put(&self.timestamp_utc_ns.to_ne_bytes());
        w.put(self.chip_id.as_bytes());
        w.put(self.serial_number.as_bytes());
        w.put(self.core_part_number.as_bytes());
        w.put(&self.firmware_version.to_bytes());
        w.put(&[self.io_type]);
        w.put(&self.fpa_frame_count.to_ne_bytes());
        w.put(&self.fpa_diode_count.to_ne_bytes());
        w.put(&self.environment_temperature.to_ne_bytes());
        w.sample(&self.thermography_min);
        w.sample(&self.thermography_max);
        w.sample(&self.thermography_spot);
        w.put(&[self.agc_mode]);
        w.put(&self.histeq_agc_num_bins.to_ne_bytes());
        w.put(&self.histeq_agc_bin_width.to_ne_bytes());
        w.put(&self.histeq_agc_gain_limit_factor.to_ne_bytes());
        w.put(&self.histeq_agc_reserved);
        w.put(&self.linear_agc_min.to_ne_bytes());
        w.put(&self.linear_agc_max.to_ne_bytes());
        w.put(&self.linear_agc_reserved);
        w.put(&[
            self.gradient_correction_filter_state,
            self.flat_scene_correction_filter_state,
        ]);
        w.put(&self.reserved);
        debug_assert_eq!(w.at, HEADER_SIZE);
        w.buf
    }

    /// Decode a header. Rejects a wrong length or sentinel.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != HEADER_SIZE {
            return Err(CameraError::InvalidParameter);
        }
        let mut r = Reader { buf: raw, at: 0 };
        let sentinel = r.u32();
        if sentinel != HEADER_SENTINEL {
            return Err(CameraError::InvalidParameter);
        }
        Ok(Self {
            sentinel,
            version: r.u8(),
            frame_type: r.u32(),
            width: r.u16(),
            height: r.u16(),
            channels: r.u8(),
            pixel_depth: r.u8(),
            pixel_padding: r.u8(),
            line_stride: r.u16(),
            line_padding: r.u16(),
            header_size: r.u16(),
            timestamp_utc_ns: u64::from_ne_bytes(r.take()),
            chip_id: ChipId::from_bytes(&r.take()),
            serial_number: SerialNumber::from_bytes(&r.take()),
            core_part_number: CorePartNumber::from_bytes(&r.take()),
            firmware_version: FirmwareVersion::from_bytes(r.take()),
            io_type: r.u8(),
            fpa_frame_count: r.u32(),
            fpa_diode_count: r.u32(),
            environment_temperature: r.f32(),
            thermography_min: r.sample(),
            thermography_max: r.sample(),
            thermography_spot: r.sample(),
            agc_mode: r.u8(),
            histeq_agc_num_bins: r.u16(),
            histeq_agc_bin_width: r.u16(),
            histeq_agc_gain_limit_factor: r.f32(),
            histeq_agc_reserved: r.take(),
            linear_agc_min: r.u32(),
            linear_agc_max: r.u32(),
            linear_agc_reserved: r.take(),
            gradient_correction_filter_state: r.u8(),
            flat_scene_correction_filter_state: r.u8(),
            reserved: r.take(),
        })
    }
}

/// One output format of a frame: header plus row-major pixel data.
#[derive(Debug, Clone)]
pub struct FramePlane {
    header: FrameHeader,
    data: Vec<u8>,
}

/// Width, height and line stride of a `format` plane as header fields.
pub(crate) fn plane_geometry(
    format: FrameFormat,
    width: usize,
    height: usize,
) -> Result<(u16, u16, u16)> {
    let stride = width
        .checked_mul(format.bytes_per_pixel())
        .ok_or(CameraError::Overflow)?;
    let field = |v: usize| u16::try_from(v).map_err(|_| CameraError::Overflow);
    Ok((field(width)?, field(height)?, field(stride)?))
}

impl FramePlane {
    /// Wrap `data` for `format`, deriving the geometry fields of `common`.
    /// Overflow if the geometry does not fit the 16-bit header fields.
    pub(crate) fn new(
        format: FrameFormat,
        width: usize,
        height: usize,
        common: &FrameHeader,
        data: Vec<u8>,
    ) -> Result<Self> {
        let (w, h, stride) = plane_geometry(format, width, height)?;
        debug_assert!(data.len() >= usize::from(stride) * height);
        let mut header = common.clone();
        header.frame_type = format.bits();
        header.width = w;
        header.height = h;
        header.channels = format.channels();
        header.pixel_depth = format.pixel_depth();
        header.pixel_padding = 0;
        header.line_stride = stride;
        header.line_padding = 0;
        header.header_size = HEADER_SIZE as u16;
        Ok(Self { header, data })
    }

    pub fn format(&self) -> Option<FrameFormat> {
        FrameFormat::from_bits(self.header.frame_type)
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        self.header.to_bytes()
    }

    pub fn width(&self) -> usize {
        self.header.width as usize
    }

    pub fn height(&self) -> usize {
        self.header.height as usize
    }

    pub fn channels(&self) -> usize {
        self.header.channels as usize
    }

    pub fn pixel_depth(&self) -> usize {
        self.header.pixel_depth as usize
    }

    pub fn pixel_padding(&self) -> usize {
        self.header.pixel_padding as usize
    }

    pub fn line_stride(&self) -> usize {
        self.header.line_stride as usize
    }

    pub fn line_padding(&self) -> usize {
        self.header.line_padding as usize
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.height() {
            return None;
        }
        let start = y * self.line_stride();
        self.data.get(start..start + self.line_stride())
    }

    /// Bytes of pixel `(x, y)`. For YUY2 this is the pixel's two-byte half
    /// of its macropixel.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width() {
            return None;
        }
        let bpp = self.channels() * self.pixel_depth() / 8;
        self.row(y)?.get(x * bpp..(x + 1) * bpp)
    }

    /// Samples of a 16-bit plane.
    pub fn to_u16(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    /// Samples of a 32-bit float plane.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Every plane produced by one acquisition.
#[derive(Debug)]
pub struct CameraFrame {
    planes: Vec<FramePlane>,
    locks: AtomicUsize,
}

impl CameraFrame {
    pub(crate) fn new(planes: Vec<FramePlane>) -> Self {
        Self {
            planes,
            locks: AtomicUsize::new(0),
        }
    }

    /// Plane for `format`; invalid-parameter if it was not requested.
    pub fn plane(&self, format: FrameFormat) -> Result<&FramePlane> {
        self.planes
            .iter()
            .find(|p| p.format() == Some(format))
            .ok_or(CameraError::InvalidParameter)
    }

    pub fn planes(&self) -> &[FramePlane] {
        &self.planes
    }

    pub fn formats(&self) -> FrameFormats {
        self.planes.iter().filter_map(FramePlane::format).collect()
    }

    /// Header fields shared by every plane.
    pub fn header(&self) -> Option<&FrameHeader> {
        self.planes.first().map(FramePlane::header)
    }

    pub fn timestamp_utc_ns(&self) -> u64 {
        self.header().map_or(0, |h| h.timestamp_utc_ns)
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    pub fn lock_count(&self) -> usize {
        self.locks.load(Ordering::Acquire)
    }

    /// Take a lock, keeping the frame readable and blocking delivery of the
    /// next frame until every lock is dropped.
    pub fn lock(self: &Arc<Self>) -> FrameLock {
        FrameLock::new(Arc::clone(self))
    }

    pub(crate) fn into_buffers(self) -> impl Iterator<Item = Vec<u8>> {
        self.planes.into_iter().map(FramePlane::into_data)
    }
}

/// Held lock on a published frame. Cloning takes another lock; dropping
/// releases one.
#[derive(Debug)]
pub struct FrameLock {
    frame: Arc<CameraFrame>,
}

impl FrameLock {
    fn new(frame: Arc<CameraFrame>) -> Self {
        frame.locks.fetch_add(1, Ordering::AcqRel);
        Self { frame }
    }

    pub fn frame(&self) -> &Arc<CameraFrame> {
        &self.frame
    }
}

impl Clone for FrameLock {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.frame))
    }
}

impl Drop for FrameLock {
    fn drop(&mut self) {
        self.frame.locks.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for FrameLock {
    type Target = CameraFrame;

    fn deref(&self) -> &CameraFrame {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            timestamp_utc_ns: 0x0102_0304_0506_0708,
            chip_id: ChipId::new("E4520000C1D").unwrap(),
            fpa_frame_count: 42,
            environment_temperature: 24.5,
            thermography_max: Sample {
                x: 3,
                y: 4,
                value: 36.6,
            },
            agc_mode: 1,
            histeq_agc_num_bins: 1024,
            linear_agc_min: 7000,
            linear_agc_max: 9000,
            gradient_correction_filter_state: 1,
            flat_scene_correction_filter_state: 1,
            ..FrameHeader::default()
        }
    }

    #[test]
    fn test_header_is_2048_bytes_with_fixed_offsets() {
        let h = sample_header();
        let b = h.to_bytes();
        assert_eq!(b.len(), HEADER_SIZE);
        assert_eq!(&b[0..4], &HEADER_SENTINEL.to_ne_bytes());
        assert_eq!(b[4], HEADER_VERSION);
        assert_eq!(&b[20..22], &(HEADER_SIZE as u16).to_ne_bytes());
        assert_eq!(&b[22..30], &h.timestamp_utc_ns.to_ne_bytes());
        assert_eq!(&b[30..41], b"E4520000C1D");
        assert_eq!(&b[99..103], &42u32.to_ne_bytes());
        assert_eq!(&b[107..111], &24.5f32.to_ne_bytes());
        assert_eq!(&b[119..121], &3u16.to_ne_bytes());
        assert_eq!(&b[123..127], &36.6f32.to_ne_bytes());
        assert_eq!(b[135], 1);
        assert_eq!(&b[136..138], &1024u16.to_ne_bytes());
        assert_eq!(&b[208..212], &7000u32.to_ne_bytes());
        assert_eq!(&b[212..216], &9000u32.to_ne_bytes());
        assert_eq!((b[248], b[249]), (1, 1));
    }

    #[test]
    fn test_reserved_regions_pass_through() {
        let mut h = sample_header();
        h.histeq_agc_reserved[0] = 0xAA;
        h.linear_agc_reserved[31] = 0xBB;
        h.reserved[1797] = 0xCC;
        let b = h.to_bytes();
        assert_eq!(b[144], 0xAA);
        assert_eq!(b[247], 0xBB);
        assert_eq!(b[2047], 0xCC);
        let back = FrameHeader::from_bytes(&b).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.to_bytes(), b);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let b = sample_header().to_bytes();
        assert_eq!(
            FrameHeader::from_bytes(&b[..100]),
            Err(CameraError::InvalidParameter)
        );
        let mut bad = b;
        bad[0] ^= 0xFF;
        assert_eq!(FrameHeader::from_bytes(&bad), Err(CameraError::InvalidParameter));
    }

    #[test]
    fn test_plane_geometry_matches_data() {
        let common = sample_header();
        let data = vec![7u8; 5 * 3 * 4];
        let plane = FramePlane::new(FrameFormat::ColorArgb8888, 5, 3, &common, data).unwrap();
        assert_eq!(plane.format(), Some(FrameFormat::ColorArgb8888));
        assert_eq!((plane.width(), plane.height(), plane.channels()), (5, 3, 4));
        assert_eq!(plane.pixel_depth(), 8);
        assert_eq!(plane.line_stride(), 20);
        assert!(plane.width() * plane.channels() * plane.pixel_depth() / 8 <= plane.line_stride());
        assert!(plane.line_stride() * plane.height() <= plane.data_size());
        assert_eq!(plane.row(2).map(<[u8]>::len), Some(20));
        assert!(plane.row(3).is_none());
        assert_eq!(plane.pixel(4, 2), Some(&[7u8, 7, 7, 7][..]));
        assert!(plane.pixel(5, 0).is_none());
        assert_eq!(plane.header_bytes()[135], 1);
    }

    #[test]
    fn test_plane_geometry_overflow() {
        let common = FrameHeader::default();
        // 20000 * 4 bytes per ARGB pixel exceeds a 16-bit stride.
        assert_eq!(
            FramePlane::new(FrameFormat::ColorArgb8888, 20_000, 1, &common, Vec::new()).unwrap_err(),
            CameraError::Overflow
        );
        assert_eq!(
            FramePlane::new(FrameFormat::Grayscale, 1, 70_000, &common, Vec::new()).unwrap_err(),
            CameraError::Overflow
        );
        assert_eq!(
            plane_geometry(FrameFormat::Grayscale, 20_000, 1),
            Ok((20_000, 1, 20_000))
        );
        assert_eq!(
            plane_geometry(FrameFormat::ColorArgb8888, usize::MAX, 1),
            Err(CameraError::Overflow)
        );
    }

    #[test]
    fn test_plane_lookup_by_format() {
        let common = FrameHeader::default();
        let frame = CameraFrame::new(vec![
            FramePlane::new(FrameFormat::Grayscale, 2, 2, &common, vec![0; 4]).unwrap(),
            FramePlane::new(FrameFormat::PreAgc, 2, 2, &common, vec![0; 8]).unwrap(),
        ]);
        assert!(frame.plane(FrameFormat::PreAgc).is_ok());
        assert_eq!(
            frame.plane(FrameFormat::ColorYuy2).unwrap_err(),
            CameraError::InvalidParameter
        );
        let formats = frame.formats();
        assert!(formats.contains(FrameFormat::Grayscale));
        assert!(!formats.contains(FrameFormat::ColorYuy2));
    }

    #[test]
    fn test_lock_counting() {
        let frame = Arc::new(CameraFrame::new(Vec::new()));
        assert!(!frame.is_locked());
        let a = frame.lock();
        let b = a.clone();
        assert_eq!(frame.lock_count(), 2);
        drop(a);
        assert!(frame.is_locked());
        drop(b);
        assert!(!frame.is_locked());
    }
}
