//! Count-domain image filters applied before AGC.

use crate::error::{CameraError, Result};

fn slope(means: &[f64]) -> f64 {
    let n = means.len();
    if n < 2 {
        return 0.0;
    }
    let cx = (n - 1) as f64 / 2.0;
    let cy = means.iter().sum::<f64>() / n as f64;
    let (num, den) = means.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, &m)| {
        let dx = i as f64 - cx;
        (num + dx * (m - cy), den + dx * dx)
    });
    num / den
}

/// Remove the linear horizontal and vertical gradient, keeping the frame mean.
pub fn gradient_correct(counts: &mut [u16], width: usize, height: usize) {
    if width == 0 || height == 0 || counts.len() < width * height {
        return;
    }
    let mut col = vec![0.0f64; width];
    let mut row = vec![0.0f64; height];
    for (y, line) in counts.chunks(width).take(height).enumerate() {
        for (x, &c) in line.iter().enumerate() {
            col[x] += c as f64;
            row[y] += c as f64;
        }
    }
    col.iter_mut().for_each(|c| *c /= height as f64);
    row.iter_mut().for_each(|r| *r /= width as f64);

    let (sx, sy) = (slope(&col), slope(&row));
    if sx == 0.0 && sy == 0.0 {
        return;
    }
    let cx = (width - 1) as f64 / 2.0;
    let cy = (height - 1) as f64 / 2.0;
    for (y, line) in counts.chunks_mut(width).take(height).enumerate() {
        let dy = sy * (y as f64 - cy);
        for (x, c) in line.iter_mut().enumerate() {
            let v = *c as f64 - sx * (x as f64 - cx) - dy;
            *c = v.round().clamp(0.0, u16::MAX as f64) as u16;
        }
    }
}

/// Per-pixel offset map that flattens a uniform scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSceneCorrection {
    width: u16,
    height: u16,
    offsets: Vec<i16>,
}

impl FlatSceneCorrection {
    const MAGIC: [u8; 4] = *b"FSC1";
    const HEADER_LEN: usize = 8;

    /// Build from a frame of a flat scene: each offset moves its pixel to the
    /// frame mean.
    pub fn from_frame(counts: &[u16], width: usize, height: usize) -> Result<Self> {
        let n = width * height;
        if n == 0 || counts.len() != n || width > u16::MAX as usize || height > u16::MAX as usize {
            return Err(CameraError::InvalidParameter);
        }
        let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / n as f64;
        let offsets = counts
            .iter()
            .map(|&c| (mean - c as f64).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect();
        Ok(Self {
            width: width as u16,
            height: height as u16,
            offsets,
        })
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn height(&self) -> usize {
        self.height as usize
    }

    pub fn apply(&self, counts: &mut [u16]) -> Result<()> {
        if counts.len() != self.offsets.len() {
            return Err(CameraError::InvalidParameter);
        }
        for (c, &o) in counts.iter_mut().zip(&self.offsets) {
            *c = (*c as i32 + o as i32).clamp(0, u16::MAX as i32) as u16;
        }
        Ok(())
    }

    /// Storage form: magic, width, height (little-endian), then offsets.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.offsets.len() * 2);
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend(self.offsets.iter().flat_map(|o| o.to_le_bytes()));
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::HEADER_LEN || raw[..4] != Self::MAGIC {
            return Err(CameraError::VerifyFailed);
        }
        let width = u16::from_le_bytes([raw[4], raw[5]]);
        let height = u16::from_le_bytes([raw[6], raw[7]]);
        let body = &raw[Self::HEADER_LEN..];
        if body.len() != width as usize * height as usize * 2 {
            return Err(CameraError::VerifyFailed);
        }
        let offsets = body
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self {
            width,
            height,
            offsets,
        })
    }
}
