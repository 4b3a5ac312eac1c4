//! Automatic gain control: maps raw sensor counts to 8-bit display levels.
//!
//! The engine is stateful only for HistEQ, which blends its transform with
//! the previous frame's. Parameters are clamped, never rejected, so a frame
//! is always produced.

use crate::histeq::{self, HistEqState};
use crate::settings::{CameraSettings, LinearAgcParams};
use crate::types::{AgcMode, LinearAgcLockMode};
use std::time::Duration;

/// Highest output level.
pub const OUTPUT_MAX: f32 = 255.0;

/// Live AGC metrics recorded into the frame header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgcMetrics {
    Linear {
        min: u32,
        max: u32,
    },
    HistEq {
        num_bins: u16,
        bin_width: u16,
        gain_limit_factor: f32,
    },
}

impl AgcMetrics {
    pub fn mode(&self) -> AgcMode {
        match self {
            Self::Linear { .. } => AgcMode::Linear,
            Self::HistEq { .. } => AgcMode::HistEq,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgcEngine {
    histeq: HistEqState,
    last_mode: Option<AgcMode>,
}

impl AgcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget blending history.
    pub fn reset(&mut self) {
        self.histeq.reset();
        self.last_mode = None;
    }

    /// Run the active AGC mode over one frame of counts.
    ///
    /// `interval` is the time since the previous frame; `None` for the first
    /// frame of a stream. `out` is resized to `counts.len()`.
    pub fn process(
        &mut self,
        counts: &[u16],
        settings: &CameraSettings,
        interval: Option<Duration>,
        out: &mut Vec<u8>,
    ) -> AgcMetrics {
        out.resize(counts.len(), 0);
        let mode = settings.agc_mode();
        if self.last_mode != Some(mode) {
            self.histeq.reset();
            self.last_mode = Some(mode);
        }
        match mode {
            AgcMode::Linear => linear(counts, settings.linear(), out),
            AgcMode::HistEq => histeq::equalize(
                counts,
                &settings.histeq().clamped(),
                interval,
                &mut self.histeq,
                out,
            ),
        }
    }

    /// Current HistEQ transform indexed by count, once a HistEQ frame ran.
    pub fn histeq_transform(&self) -> Option<&[f32]> {
        self.histeq.transform()
    }
}

/// Raw count extrema, `(0, 0)` for an empty frame.
pub fn extrema(counts: &[u16]) -> (u32, u32) {
    let mut it = counts.iter().copied();
    let Some(first) = it.next() else {
        return (0, 0);
    };
    let (lo, hi) = it.fold((first, first), |(lo, hi), c| (lo.min(c), hi.max(c)));
    (lo as u32, hi as u32)
}

#[inline]
pub(crate) fn quantize(t: f32) -> u8 {
    (t.clamp(0.0, 1.0) * OUTPUT_MAX).round() as u8
}

fn linear(counts: &[u16], params: &LinearAgcParams, out: &mut [u8]) -> AgcMetrics {
    let p = params.clamped();
    let (frame_min, frame_max) = extrema(counts);
    let (lo, hi) = match p.lock_mode() {
        LinearAgcLockMode::Auto => (frame_min, frame_max),
        LinearAgcLockMode::Manual => (p.lock_min(), p.lock_max()),
        LinearAgcLockMode::ManualMin => (p.lock_min(), frame_max),
        LinearAgcLockMode::ManualMax => (frame_min, p.lock_max()),
    };
    let hi = hi.max(lo);
    let span = (hi - lo).max(1) as f32;
    let lo_f = lo as f32;

    for (o, &c) in out.iter_mut().zip(counts) {
        *o = quantize((c as f32 - lo_f) / span);
    }

    AgcMetrics::Linear { min: lo, max: hi }
}
