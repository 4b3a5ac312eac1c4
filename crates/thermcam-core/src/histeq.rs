//! Histogram-equalization AGC.
//!
//! Pipeline per frame: histogram over the frame's count range, plateau clip
//! with optional redistribution, left/right mass trim, gain-limited
//! cumulative transform, exponential blend with the previous transform.
//! The transform lives in count space (one entry per possible u16 count) so
//! consecutive frames with different ranges blend point for point.

use crate::agc::{extrema, quantize, AgcMetrics};
use crate::settings::HistEqAgcParams;
use crate::types::{HistEqGainLimitFactorMode, HistEqPlateauRedistributionMode};
use std::time::Duration;

/// Upper bound on histogram bins; bin width grows with the count range.
pub const MAX_BINS: u32 = 1024;

/// Output levels a single bin may claim at gain limit 1.
const OUTPUT_LEVELS: f32 = 256.0;

/// Factor curve used when the gain-limit-factor mode is auto.
const AUTO_FACTOR_YMIN: f32 = 0.25;
const AUTO_FACTOR_XMAX: u32 = 1000;

const LUT_LEN: usize = u16::MAX as usize + 1;

#[derive(Debug, Default)]
pub(crate) struct HistEqState {
    lut: Vec<f32>,
    scratch: Vec<f32>,
    hist: Vec<f32>,
    primed: bool,
}

impl HistEqState {
    pub(crate) fn reset(&mut self) {
        self.primed = false;
    }

    pub(crate) fn transform(&self) -> Option<&[f32]> {
        self.primed.then_some(self.lut.as_slice())
    }
}

/// Gain-limit multiplier: ramps from `ymin` at zero scene range up to 1 at
/// `xmax` counts. `xmax == 0` disables the curve.
fn gain_limit_factor(ymin: f32, xmax: u32, scene_range: u32) -> f32 {
    if xmax == 0 {
        return 1.0;
    }
    let x = (scene_range as f32 / xmax as f32).min(1.0);
    ymin + (1.0 - ymin) * x
}

/// Weight given to the new transform. Longer intervals weigh it more.
fn blend_weight(alpha_time_seconds: f32, interval: Option<Duration>) -> f32 {
    match interval {
        Some(dt) if alpha_time_seconds > 0.0 => {
            1.0 - (-dt.as_secs_f32() / alpha_time_seconds).exp()
        }
        _ => 1.0,
    }
}

fn clip_plateau(hist: &mut [f32], total: f32, p: &HistEqAgcParams) {
    let threshold = p.plateau() * total;
    let active: Vec<bool> = hist.iter().map(|&h| h > 0.0 && h < threshold).collect();

    let mut excess = 0.0f32;
    for h in hist.iter_mut() {
        if *h > threshold {
            excess += *h - threshold;
            *h = threshold;
        }
    }
    if excess <= 0.0 {
        return;
    }

    match p.plateau_redistribution_mode() {
        HistEqPlateauRedistributionMode::Disabled => {}
        HistEqPlateauRedistributionMode::AllBins => {
            let share = excess / hist.len() as f32;
            hist.iter_mut().for_each(|h| *h += share);
        }
        HistEqPlateauRedistributionMode::ActiveBinsOnly => {
            let n_active = active.iter().filter(|&&a| a).count();
            if n_active > 0 {
                let share = excess / n_active as f32;
                for (h, &is_active) in hist.iter_mut().zip(active.iter()) {
                    if is_active {
                        *h += share;
                    }
                }
            }
        }
    }
}

/// Remove `fraction` of `mass` starting from one end of the histogram.
fn trim<'a>(bins: impl Iterator<Item = &'a mut f32>, mass: f32, fraction: f32) {
    let mut remaining = mass * fraction;
    for h in bins {
        if remaining <= 0.0 {
            break;
        }
        let cut = (*h).min(remaining);
        *h -= cut;
        remaining -= cut;
    }
}

pub(crate) fn equalize(
    counts: &[u16],
    p: &HistEqAgcParams,
    interval: Option<Duration>,
    state: &mut HistEqState,
    out: &mut [u8],
) -> AgcMetrics {
    if counts.is_empty() {
        return AgcMetrics::HistEq {
            num_bins: 0,
            bin_width: 1,
            gain_limit_factor: 1.0,
        };
    }

    let (min, max) = extrema(counts);
    let range = max - min + 1;
    let bin_width = range.div_ceil(MAX_BINS).max(1);
    let num_bins = range.div_ceil(bin_width) as usize;

    let hist = &mut state.hist;
    hist.clear();
    hist.resize(num_bins, 0.0);
    for &c in counts {
        hist[((c as u32 - min) / bin_width) as usize] += 1.0;
    }

    let total = counts.len() as f32;
    clip_plateau(hist, total, p);

    let clipped_mass: f32 = hist.iter().sum();
    trim(hist.iter_mut(), clipped_mass, p.trim_left());
    trim(hist.iter_mut().rev(), clipped_mass, p.trim_right());
    let mass: f32 = hist.iter().sum();

    let first = hist.iter().position(|&h| h > 0.0);
    let last = hist.iter().rposition(|&h| h > 0.0);
    let scene_range = match (first, last) {
        (Some(a), Some(b)) => (b - a + 1) as u32 * bin_width,
        _ => 0,
    };
    let factor = match p.gain_limit_factor_mode() {
        HistEqGainLimitFactorMode::Auto => {
            gain_limit_factor(AUTO_FACTOR_YMIN, AUTO_FACTOR_XMAX, scene_range)
        }
        HistEqGainLimitFactorMode::Manual => gain_limit_factor(
            p.gain_limit_factor_ymin(),
            p.gain_limit_factor_xmax(),
            scene_range,
        ),
    };
    let cap = p.gain_limit() * factor / OUTPUT_LEVELS;

    // Per-bin share of the output range; zero mass leaves every share at 0.
    if mass > 0.0 {
        hist.iter_mut().for_each(|h| *h = (*h / mass).min(cap));
    } else {
        hist.iter_mut().for_each(|h| *h = 0.0);
    }
    let used: f32 = hist.iter().sum();
    let offset = ((1.0 - used) / 2.0).max(0.0);

    let next = &mut state.scratch;
    next.clear();
    next.resize(LUT_LEN, offset);
    let mut cumulative = offset;
    for (b, &share) in hist.iter().enumerate() {
        let level = cumulative + share / 2.0;
        cumulative += share;
        let start = (min + b as u32 * bin_width) as usize;
        let end = (start + bin_width as usize).min(max as usize + 1);
        next[start..end].fill(level);
    }
    next[max as usize + 1..].fill(cumulative);

    let alpha = if state.primed {
        blend_weight(p.alpha_time_seconds(), interval)
    } else {
        1.0
    };
    if alpha >= 1.0 || state.lut.len() != LUT_LEN {
        std::mem::swap(&mut state.lut, &mut state.scratch);
    } else {
        for (cur, &new) in state.lut.iter_mut().zip(state.scratch.iter()) {
            *cur += alpha * (new - *cur);
        }
    }
    state.primed = true;

    for (o, &c) in out.iter_mut().zip(counts) {
        *o = quantize(state.lut[c as usize]);
    }

    tracing::trace!(
        num_bins,
        bin_width,
        factor,
        alpha,
        offset,
        "histeq transform updated"
    );

    AgcMetrics::HistEq {
        num_bins: num_bins as u16,
        bin_width: bin_width as u16,
        gain_limit_factor: factor,
    }
}
