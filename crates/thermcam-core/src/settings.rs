//! Camera configuration: AGC parameter sets and the per-camera tunables.
//!
//! Setters validate against the documented closed intervals and leave the
//! stored value untouched on rejection. The AGC engine never calls setters;
//! it works from [`HistEqAgcParams::clamped`] / [`LinearAgcParams::clamped`]
//! so a frame is always produced.

use crate::error::{CameraError, Result};
use crate::types::{
    AgcMode, ColorPalette, Filter, FilterState, HistEqGainLimitFactorMode,
    HistEqPlateauRedistributionMode, LinearAgcLockMode, ShutterMode, TemperatureUnit,
};
use serde::{Deserialize, Serialize};

pub const PLATEAU_RANGE: (f32, f32) = (0.0, 1.0);
pub const GAIN_LIMIT_RANGE: (f32, f32) = (0.0, 256.0);
pub const GAIN_LIMIT_FACTOR_YMIN_RANGE: (f32, f32) = (0.0, 1.0);
pub const GAIN_LIMIT_FACTOR_XMAX_MAX: u32 = 65535;
pub const ALPHA_TIME_RANGE: (f32, f32) = (0.0, 6.0);
pub const TRIM_RANGE: (f32, f32) = (0.0, 0.49);
pub const LINEAR_LOCK_MAX: u32 = 65535;
pub const EMISSIVITY_RANGE: (f32, f32) = (0.0, 1.0);

fn check_f32(value: f32, (lo, hi): (f32, f32)) -> Result<f32> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(value)
    } else {
        Err(CameraError::InvalidParameter)
    }
}

fn check_u32(value: u32, hi: u32) -> Result<u32> {
    if value <= hi {
        Ok(value)
    } else {
        Err(CameraError::InvalidParameter)
    }
}

fn clamp_f32(value: f32, (lo, hi): (f32, f32), fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(lo, hi)
    }
}

/// Linear AGC parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearAgcParams {
    lock_mode: LinearAgcLockMode,
    lock_min: u32,
    lock_max: u32,
}

impl Default for LinearAgcParams {
    fn default() -> Self {
        Self {
            lock_mode: LinearAgcLockMode::Auto,
            lock_min: 0,
            lock_max: LINEAR_LOCK_MAX,
        }
    }
}

impl LinearAgcParams {
    pub fn lock_mode(&self) -> LinearAgcLockMode {
        self.lock_mode
    }

    pub fn set_lock_mode(&mut self, mode: LinearAgcLockMode) {
        self.lock_mode = mode;
    }

    pub fn lock_min(&self) -> u32 {
        self.lock_min
    }

    pub fn set_lock_min(&mut self, v: u32) -> Result<()> {
        self.lock_min = check_u32(v, LINEAR_LOCK_MAX)?;
        Ok(())
    }

    pub fn lock_max(&self) -> u32 {
        self.lock_max
    }

    pub fn set_lock_max(&mut self, v: u32) -> Result<()> {
        self.lock_max = check_u32(v, LINEAR_LOCK_MAX)?;
        Ok(())
    }

    /// Copy with every value forced into its interval.
    pub fn clamped(&self) -> Self {
        Self {
            lock_mode: self.lock_mode,
            lock_min: self.lock_min.min(LINEAR_LOCK_MAX),
            lock_max: self.lock_max.min(LINEAR_LOCK_MAX),
        }
    }
}

/// Histogram-equalization AGC parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistEqAgcParams {
    plateau: f32,
    plateau_redistribution_mode: HistEqPlateauRedistributionMode,
    gain_limit: f32,
    gain_limit_factor_mode: HistEqGainLimitFactorMode,
    gain_limit_factor_ymin: f32,
    gain_limit_factor_xmax: u32,
    alpha_time_seconds: f32,
    trim_left: f32,
    trim_right: f32,
}

impl Default for HistEqAgcParams {
    fn default() -> Self {
        Self {
            plateau: 0.05,
            plateau_redistribution_mode: HistEqPlateauRedistributionMode::ActiveBinsOnly,
            gain_limit: 4.0,
            gain_limit_factor_mode: HistEqGainLimitFactorMode::Auto,
            gain_limit_factor_ymin: 0.25,
            gain_limit_factor_xmax: 1000,
            alpha_time_seconds: 2.0,
            trim_left: 0.005,
            trim_right: 0.005,
        }
    }
}

impl HistEqAgcParams {
    pub fn plateau(&self) -> f32 {
        self.plateau
    }

    pub fn set_plateau(&mut self, v: f32) -> Result<()> {
        self.plateau = check_f32(v, PLATEAU_RANGE)?;
        Ok(())
    }

    pub fn plateau_redistribution_mode(&self) -> HistEqPlateauRedistributionMode {
        self.plateau_redistribution_mode
    }

    pub fn set_plateau_redistribution_mode(&mut self, mode: HistEqPlateauRedistributionMode) {
        self.plateau_redistribution_mode = mode;
    }

    pub fn gain_limit(&self) -> f32 {
        self.gain_limit
    }

    pub fn set_gain_limit(&mut self, v: f32) -> Result<()> {
        self.gain_limit = check_f32(v, GAIN_LIMIT_RANGE)?;
        Ok(())
    }

    pub fn gain_limit_factor_mode(&self) -> HistEqGainLimitFactorMode {
        self.gain_limit_factor_mode
    }

    pub fn set_gain_limit_factor_mode(&mut self, mode: HistEqGainLimitFactorMode) {
        self.gain_limit_factor_mode = mode;
    }

    pub fn gain_limit_factor_ymin(&self) -> f32 {
        self.gain_limit_factor_ymin
    }

    pub fn set_gain_limit_factor_ymin(&mut self, v: f32) -> Result<()> {
        self.gain_limit_factor_ymin = check_f32(v, GAIN_LIMIT_FACTOR_YMIN_RANGE)?;
        Ok(())
    }

    pub fn gain_limit_factor_xmax(&self) -> u32 {
        self.gain_limit_factor_xmax
    }

    pub fn set_gain_limit_factor_xmax(&mut self, v: u32) -> Result<()> {
        self.gain_limit_factor_xmax = check_u32(v, GAIN_LIMIT_FACTOR_XMAX_MAX)?;
        Ok(())
    }

    pub fn alpha_time_seconds(&self) -> f32 {
        self.alpha_time_seconds
    }

    pub fn set_alpha_time_seconds(&mut self, v: f32) -> Result<()> {
        self.alpha_time_seconds = check_f32(v, ALPHA_TIME_RANGE)?;
        Ok(())
    }

    pub fn trim_left(&self) -> f32 {
        self.trim_left
    }

    pub fn set_trim_left(&mut self, v: f32) -> Result<()> {
        self.trim_left = check_f32(v, TRIM_RANGE)?;
        Ok(())
    }

    pub fn trim_right(&self) -> f32 {
        self.trim_right
    }

    pub fn set_trim_right(&mut self, v: f32) -> Result<()> {
        self.trim_right = check_f32(v, TRIM_RANGE)?;
        Ok(())
    }

    /// Copy with every value forced into its interval.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            plateau: clamp_f32(self.plateau, PLATEAU_RANGE, d.plateau),
            plateau_redistribution_mode: self.plateau_redistribution_mode,
            gain_limit: clamp_f32(self.gain_limit, GAIN_LIMIT_RANGE, d.gain_limit),
            gain_limit_factor_mode: self.gain_limit_factor_mode,
            gain_limit_factor_ymin: clamp_f32(
                self.gain_limit_factor_ymin,
                GAIN_LIMIT_FACTOR_YMIN_RANGE,
                d.gain_limit_factor_ymin,
            ),
            gain_limit_factor_xmax: self.gain_limit_factor_xmax.min(GAIN_LIMIT_FACTOR_XMAX_MAX),
            alpha_time_seconds: clamp_f32(self.alpha_time_seconds, ALPHA_TIME_RANGE, d.alpha_time_seconds),
            trim_left: clamp_f32(self.trim_left, TRIM_RANGE, d.trim_left),
            trim_right: clamp_f32(self.trim_right, TRIM_RANGE, d.trim_right),
        }
    }
}

/// Image sub-region over which thermography extrema and spot are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermographyWindow {
    pub x0: usize,
    pub y0: usize,
    pub w: usize,
    pub h: usize,
}

impl ThermographyWindow {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            w: width,
            h: height,
        }
    }

    /// Non-empty and contained in a `width` x `height` image.
    pub fn validate(&self, width: usize, height: usize) -> Result<()> {
        let fits_x = self.x0.checked_add(self.w).is_some_and(|x1| x1 <= width);
        let fits_y = self.y0.checked_add(self.h).is_some_and(|y1| y1 <= height);
        if self.w == 0 || self.h == 0 || !fits_x || !fits_y {
            return Err(CameraError::InvalidParameter);
        }
        Ok(())
    }

    /// Intersect with the image bounds; falls back to the full image when
    /// nothing remains.
    pub fn clamped(&self, width: usize, height: usize) -> Self {
        let x0 = self.x0.min(width.saturating_sub(1));
        let y0 = self.y0.min(height.saturating_sub(1));
        let w = self.w.min(width - x0.min(width));
        let h = self.h.min(height - y0.min(height));
        if w == 0 || h == 0 {
            Self::full(width, height)
        } else {
            Self { x0, y0, w, h }
        }
    }

    /// Center pixel, used as the spot sample.
    pub fn center(&self) -> (usize, usize) {
        (self.x0 + self.w / 2, self.y0 + self.h / 2)
    }
}

/// Every tunable of one camera. Values are applied at the next frame boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    agc_mode: AgcMode,
    linear: LinearAgcParams,
    histeq: HistEqAgcParams,
    color_palette: ColorPalette,
    shutter_mode: ShutterMode,
    temperature_unit: TemperatureUnit,
    scene_emissivity: f32,
    thermography_offset: f32,
    thermography_window: Option<ThermographyWindow>,
    gradient_correction: FilterState,
    flat_scene_correction: FilterState,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            agc_mode: AgcMode::Linear,
            linear: LinearAgcParams::default(),
            histeq: HistEqAgcParams::default(),
            color_palette: ColorPalette::WhiteHot,
            shutter_mode: ShutterMode::Auto,
            temperature_unit: TemperatureUnit::Celsius,
            scene_emissivity: 1.0,
            thermography_offset: 0.0,
            thermography_window: None,
            gradient_correction: FilterState::Enabled,
            flat_scene_correction: FilterState::Enabled,
        }
    }
}

impl CameraSettings {
    pub fn agc_mode(&self) -> AgcMode {
        self.agc_mode
    }

    pub fn set_agc_mode(&mut self, mode: AgcMode) {
        self.agc_mode = mode;
    }

    pub fn linear(&self) -> &LinearAgcParams {
        &self.linear
    }

    pub fn linear_mut(&mut self) -> &mut LinearAgcParams {
        &mut self.linear
    }

    pub fn histeq(&self) -> &HistEqAgcParams {
        &self.histeq
    }

    pub fn histeq_mut(&mut self) -> &mut HistEqAgcParams {
        &mut self.histeq
    }

    pub fn color_palette(&self) -> ColorPalette {
        self.color_palette
    }

    pub fn set_color_palette(&mut self, palette: ColorPalette) {
        self.color_palette = palette;
    }

    pub fn shutter_mode(&self) -> ShutterMode {
        self.shutter_mode
    }

    pub fn set_shutter_mode(&mut self, mode: ShutterMode) {
        self.shutter_mode = mode;
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.temperature_unit
    }

    pub fn set_temperature_unit(&mut self, unit: TemperatureUnit) {
        self.temperature_unit = unit;
    }

    pub fn scene_emissivity(&self) -> f32 {
        self.scene_emissivity
    }

    pub fn set_scene_emissivity(&mut self, v: f32) -> Result<()> {
        self.scene_emissivity = check_f32(v, EMISSIVITY_RANGE)?;
        Ok(())
    }

    pub fn thermography_offset(&self) -> f32 {
        self.thermography_offset
    }

    pub fn set_thermography_offset(&mut self, v: f32) -> Result<()> {
        if !v.is_finite() {
            return Err(CameraError::InvalidParameter);
        }
        self.thermography_offset = v;
        Ok(())
    }

    /// Configured window, or the full `width` x `height` image when unset.
    pub fn thermography_window(&self, width: usize, height: usize) -> ThermographyWindow {
        self.thermography_window
            .map(|w| w.clamped(width, height))
            .unwrap_or_else(|| ThermographyWindow::full(width, height))
    }

    pub fn set_thermography_window(
        &mut self,
        window: ThermographyWindow,
        width: usize,
        height: usize,
    ) -> Result<()> {
        window.validate(width, height)?;
        self.thermography_window = Some(window);
        Ok(())
    }

    pub fn filter_state(&self, filter: Filter) -> FilterState {
        match filter {
            Filter::GradientCorrection => self.gradient_correction,
            Filter::FlatSceneCorrection => self.flat_scene_correction,
        }
    }

    pub fn set_filter_state(&mut self, filter: Filter, state: FilterState) {
        match filter {
            Filter::GradientCorrection => self.gradient_correction = state,
            Filter::FlatSceneCorrection => self.flat_scene_correction = state,
        }
    }

    /// Check values that bypassed the setters, e.g. after deserializing.
    /// The thermography window is checked when applied to a camera.
    pub fn validate(&self) -> Result<()> {
        if self.linear.clamped() != self.linear || self.histeq.clamped() != self.histeq {
            return Err(CameraError::InvalidParameter);
        }
        check_f32(self.scene_emissivity, EMISSIVITY_RANGE)?;
        if !self.thermography_offset.is_finite() {
            return Err(CameraError::InvalidParameter);
        }
        Ok(())
    }

    /// Window as configured, without clamping.
    pub fn configured_thermography_window(&self) -> Option<ThermographyWindow> {
        self.thermography_window
    }
}
