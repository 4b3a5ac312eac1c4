//! Radiometric conversion from sensor counts to scene temperature.

use crate::settings::ThermographyWindow;
use crate::types::TemperatureUnit;
use serde::{Deserialize, Serialize};

const ZERO_CELSIUS_K: f32 = 273.15;
const MIN_EMISSIVITY: f32 = 0.01;

/// Per-sensor linear model, loaded from the sensor profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Radiometry {
    /// Count slope of the apparent-temperature model.
    pub counts_per_kelvin: f32,
    /// Count reading at `reference_celsius`.
    pub reference_counts: f32,
    pub reference_celsius: f32,
    /// Diode reading at `diode_reference_celsius`.
    pub diode_reference_counts: f32,
    pub diode_reference_celsius: f32,
    pub diode_celsius_per_count: f32,
}

impl Default for Radiometry {
    fn default() -> Self {
        Self {
            counts_per_kelvin: 40.0,
            reference_counts: 8192.0,
            reference_celsius: 25.0,
            diode_reference_counts: 4000.0,
            diode_reference_celsius: 25.0,
            diode_celsius_per_count: 0.01,
        }
    }
}

impl Radiometry {
    /// Sensor housing temperature from the FPA diode reading.
    pub fn environment_celsius(&self, diode_count: u32) -> f32 {
        self.diode_reference_celsius
            + (diode_count as f32 - self.diode_reference_counts) * self.diode_celsius_per_count
    }

    /// Blackbody temperature the pixel would read at emissivity 1.
    pub fn apparent_celsius(&self, count: u16) -> f32 {
        let slope = if self.counts_per_kelvin.abs() < f32::EPSILON {
            1.0
        } else {
            self.counts_per_kelvin
        };
        self.reference_celsius + (count as f32 - self.reference_counts) / slope
    }

    /// Inverse of [`Self::apparent_celsius`], clamped to the count range.
    pub fn counts_for_celsius(&self, celsius: f32) -> u16 {
        let c = self.reference_counts + (celsius - self.reference_celsius) * self.counts_per_kelvin;
        c.round().clamp(0.0, u16::MAX as f32) as u16
    }
}

/// Per-frame conversion context: emissivity, offset and unit applied on top
/// of the sensor model.
#[derive(Debug, Clone, Copy)]
pub struct Thermometer {
    radiometry: Radiometry,
    emissivity: f32,
    env_k4: f32,
    offset: f32,
    unit: TemperatureUnit,
}

impl Thermometer {
    pub fn new(
        radiometry: Radiometry,
        environment_celsius: f32,
        emissivity: f32,
        offset: f32,
        unit: TemperatureUnit,
    ) -> Self {
        let env_k = (environment_celsius + ZERO_CELSIUS_K).max(0.0);
        let emissivity = if emissivity.is_finite() {
            emissivity.clamp(MIN_EMISSIVITY, 1.0)
        } else {
            1.0
        };
        Self {
            radiometry,
            emissivity,
            env_k4: env_k.powi(4),
            offset: if offset.is_finite() { offset } else { 0.0 },
            unit,
        }
    }

    /// Scene temperature in Celsius, corrected for emissivity and offset.
    ///
    /// Radiance from a grey body is `eps * T^4 + (1 - eps) * Te^4` where `Te`
    /// is the reflected environment; the apparent reading is solved for `T`.
    pub fn celsius(&self, count: u16) -> f32 {
        let apparent_k = (self.radiometry.apparent_celsius(count) + ZERO_CELSIUS_K).max(0.0);
        let t = if self.emissivity >= 1.0 {
            apparent_k
        } else {
            let t4 = (apparent_k.powi(4) - (1.0 - self.emissivity) * self.env_k4) / self.emissivity;
            t4.max(0.0).powf(0.25)
        };
        t - ZERO_CELSIUS_K + self.offset
    }

    /// Scene temperature in the configured unit.
    pub fn temperature(&self, count: u16) -> f32 {
        self.unit.from_celsius(self.celsius(count))
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }
}

/// Kelvin in unsigned 10.6 fixed point, saturating.
pub fn kelvin_fixed_10_6(celsius: f32) -> u16 {
    ((celsius + ZERO_CELSIUS_K) * 64.0)
        .round()
        .clamp(0.0, u16::MAX as f32) as u16
}

/// One annotated sample: pixel coordinates and value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub x: u16,
    pub y: u16,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    pub min: Sample,
    pub max: Sample,
    pub spot: Sample,
}

/// Extrema and center spot of `values` inside `window`.
///
/// `values` is row-major with `width` columns. The window must already be
/// clamped to the image.
pub fn window_stats(values: &[f32], width: usize, window: &ThermographyWindow) -> WindowStats {
    let at = |x: usize, y: usize| Sample {
        x: x as u16,
        y: y as u16,
        value: values.get(y * width + x).copied().unwrap_or(0.0),
    };
    let (cx, cy) = window.center();
    let mut stats = WindowStats {
        min: at(window.x0, window.y0),
        max: at(window.x0, window.y0),
        spot: at(cx, cy),
    };
    for y in window.y0..window.y0 + window.h {
        for x in window.x0..window.x0 + window.w {
            let s = at(x, y);
            if s.value < stats.min.value {
                stats.min = s;
            }
            if s.value > stats.max.value {
                stats.max = s;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thermometer(emissivity: f32, unit: TemperatureUnit) -> Thermometer {
        Thermometer::new(Radiometry::default(), 25.0, emissivity, 0.0, unit)
    }

    #[test]
    fn test_apparent_reference_point() {
        let r = Radiometry::default();
        assert!((r.apparent_celsius(8192) - 25.0).abs() < 1e-4);
        assert!((r.apparent_celsius(8192 + 400) - 35.0).abs() < 1e-4);
        assert_eq!(r.counts_for_celsius(35.0), 8592);
    }

    #[test]
    fn test_environment_from_diode() {
        let r = Radiometry::default();
        assert!((r.environment_celsius(4000) - 25.0).abs() < 1e-4);
        assert!((r.environment_celsius(4500) - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_unit_emissivity_is_apparent() {
        let t = thermometer(1.0, TemperatureUnit::Celsius);
        assert!((t.celsius(8592) - 35.0).abs() < 1e-3);
    }

    #[test]
    fn test_low_emissivity_reads_hotter_above_ambient() {
        let t = thermometer(0.8, TemperatureUnit::Celsius);
        let c = t.celsius(8592);
        assert!(c > 35.0, "{c}");
        // at ambient the correction vanishes
        assert!((t.celsius(8192) - 25.0).abs() < 0.05);
    }

    #[test]
    fn test_units_and_offset() {
        let k = thermometer(1.0, TemperatureUnit::Kelvin);
        assert!((k.temperature(8192) - 298.15).abs() < 1e-2);
        let f = thermometer(1.0, TemperatureUnit::Fahrenheit);
        assert!((f.temperature(8192) - 77.0).abs() < 1e-2);
        let off = Thermometer::new(Radiometry::default(), 25.0, 1.0, 2.5, TemperatureUnit::Celsius);
        assert!((off.celsius(8192) - 27.5).abs() < 1e-3);
    }

    #[test]
    fn test_fixed_10_6() {
        assert_eq!(kelvin_fixed_10_6(-ZERO_CELSIUS_K), 0);
        assert_eq!(kelvin_fixed_10_6(26.85), (300.0f32 * 64.0).round() as u16);
        assert_eq!(kelvin_fixed_10_6(5000.0), u16::MAX);
    }

    #[test]
    fn test_window_stats() {
        let values = vec![
            1.0, 2.0, 3.0, //
            4.0, 9.0, 0.5, //
            7.0, 8.0, 6.0,
        ];
        let full = ThermographyWindow::full(3, 3);
        let s = window_stats(&values, 3, &full);
        assert_eq!((s.min.x, s.min.y, s.min.value), (2, 1, 0.5));
        assert_eq!((s.max.x, s.max.y, s.max.value), (1, 1, 9.0));
        assert_eq!((s.spot.x, s.spot.y), (1, 1));

        let corner = ThermographyWindow { x0: 0, y0: 0, w: 2, h: 1 };
        let s = window_stats(&values, 3, &corner);
        assert_eq!(s.min.value, 1.0);
        assert_eq!(s.max.value, 2.0);
        assert_eq!((s.spot.x, s.spot.y), (1, 0));
    }
}
