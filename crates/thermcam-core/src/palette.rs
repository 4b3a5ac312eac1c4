//! Color palettes and colorspace conversion of AGC output.
//!
//! Every palette is a 256-entry table indexed by the 8-bit AGC level.
//! Built-in tables are generated from gradient stops; the five user slots
//! start out as white hot and can be replaced at runtime.

use crate::error::{CameraError, Result};
use crate::types::ColorPalette;

pub const PALETTE_LEN: usize = 256;

/// One palette entry, stored in b, g, r, a order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaletteEntry {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl PaletteEntry {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { b, g, r, a: 0xFF }
    }

    pub fn to_bgra(self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }

    pub fn from_bgra(raw: [u8; 4]) -> Self {
        Self {
            b: raw[0],
            g: raw[1],
            r: raw[2],
            a: raw[3],
        }
    }
}

pub type PaletteData = [PaletteEntry; PALETTE_LEN];

type Stop = (u8, [u8; 3]);

const WHITE_HOT: &[Stop] = &[(0, [0, 0, 0]), (255, [255, 255, 255])];
const BLACK_HOT: &[Stop] = &[(0, [255, 255, 255]), (255, [0, 0, 0])];
const SPECTRA: &[Stop] = &[
    (0, [16, 0, 64]),
    (48, [0, 0, 255]),
    (96, [0, 200, 255]),
    (144, [0, 255, 64]),
    (192, [255, 255, 0]),
    (224, [255, 96, 0]),
    (255, [255, 0, 0]),
];
const PRISM: &[Stop] = &[
    (0, [96, 0, 160]),
    (51, [0, 64, 255]),
    (102, [0, 224, 128]),
    (153, [224, 240, 0]),
    (204, [255, 96, 0]),
    (255, [255, 0, 128]),
];
const TYRIAN: &[Stop] = &[
    (0, [0, 0, 0]),
    (96, [102, 2, 60]),
    (176, [200, 64, 128]),
    (255, [255, 240, 250]),
];
const IRON: &[Stop] = &[
    (0, [0, 0, 16]),
    (40, [32, 0, 128]),
    (96, [160, 0, 160]),
    (144, [232, 64, 32]),
    (200, [255, 168, 0]),
    (255, [255, 255, 224]),
];
const AMBER: &[Stop] = &[(0, [0, 0, 0]), (160, [192, 112, 0]), (255, [255, 224, 128])];
const HI: &[Stop] = &[
    (0, [0, 0, 0]),
    (229, [229, 229, 229]),
    (230, [255, 64, 0]),
    (255, [255, 0, 0]),
];
const GREEN: &[Stop] = &[(0, [0, 0, 0]), (200, [0, 200, 40]), (255, [200, 255, 200])];

fn stops(palette: ColorPalette) -> &'static [Stop] {
    match palette {
        ColorPalette::WhiteHot => WHITE_HOT,
        ColorPalette::BlackHot => BLACK_HOT,
        ColorPalette::Spectra => SPECTRA,
        ColorPalette::Prism => PRISM,
        ColorPalette::Tyrian => TYRIAN,
        ColorPalette::Iron => IRON,
        ColorPalette::Amber => AMBER,
        ColorPalette::Hi => HI,
        ColorPalette::Green => GREEN,
        _ => WHITE_HOT,
    }
}

fn gradient(stops: &[Stop]) -> PaletteData {
    let mut table = [PaletteEntry::default(); PALETTE_LEN];
    for (i, entry) in table.iter_mut().enumerate() {
        let upper = stops
            .iter()
            .position(|&(at, _)| at as usize >= i)
            .unwrap_or(stops.len() - 1);
        let (hi_at, hi) = stops[upper];
        let (lo_at, lo) = stops[upper.saturating_sub(1)];
        let t = if hi_at == lo_at {
            1.0
        } else {
            (i as f32 - lo_at as f32) / (hi_at as f32 - lo_at as f32)
        };
        let mix = |c: usize| (lo[c] as f32 + (hi[c] as f32 - lo[c] as f32) * t).round() as u8;
        *entry = PaletteEntry::rgb(mix(0), mix(1), mix(2));
    }
    table
}

/// Palette tables for one camera.
#[derive(Debug, Clone)]
pub struct Palettes {
    builtin: Vec<PaletteData>,
    user: [PaletteData; 5],
}

impl Default for Palettes {
    fn default() -> Self {
        let builtin = ColorPalette::ALL
            .iter()
            .filter(|p| !p.is_user())
            .map(|&p| gradient(stops(p)))
            .collect();
        Self {
            builtin,
            user: [gradient(WHITE_HOT); 5],
        }
    }
}

impl Palettes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, palette: ColorPalette) -> &PaletteData {
        match palette.user_index() {
            Some(i) => &self.user[i],
            None => &self.builtin[palette as usize],
        }
    }

    /// Replace a user palette. Built-in palettes are read-only.
    pub fn set_user(&mut self, palette: ColorPalette, data: &PaletteData) -> Result<()> {
        let i = palette.user_index().ok_or(CameraError::InvalidParameter)?;
        self.user[i] = *data;
        Ok(())
    }
}

/// BT.601 full-range conversion, returns (y, u, v).
pub fn rgb_to_yuv(e: PaletteEntry) -> (u8, u8, u8) {
    let (r, g, b) = (e.r as f32, e.g as f32, e.b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    let q = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    (q(y), q(u), q(v))
}

pub fn rgb565(e: PaletteEntry) -> u16 {
    ((e.r as u16 >> 3) << 11) | ((e.g as u16 >> 2) << 5) | (e.b as u16 >> 3)
}

/// 4 bytes per pixel: b, g, r, a.
pub fn colorize_argb8888(levels: &[u8], table: &PaletteData, out: &mut Vec<u8>) {
    out.clear();
    out.extend(levels.iter().flat_map(|&l| table[l as usize].to_bgra()));
}

/// 2 bytes per pixel, host-endian 5:6:5.
pub fn colorize_rgb565(levels: &[u8], table: &PaletteData, out: &mut Vec<u8>) {
    out.clear();
    out.extend(
        levels
            .iter()
            .flat_map(|&l| rgb565(table[l as usize]).to_ne_bytes()),
    );
}

/// 4 bytes per pixel: v, u, y, a.
pub fn colorize_ayuv(levels: &[u8], table: &PaletteData, out: &mut Vec<u8>) {
    out.clear();
    out.extend(levels.iter().flat_map(|&l| {
        let e = table[l as usize];
        let (y, u, v) = rgb_to_yuv(e);
        [v, u, y, e.a]
    }));
}

/// Packed 4:2:2, `y0 u y1 v` per horizontal pixel pair with chroma averaged
/// over the pair. An odd trailing pixel is written as `y u`.
pub fn colorize_yuy2(levels: &[u8], width: usize, table: &PaletteData, out: &mut Vec<u8>) {
    out.clear();
    if width == 0 {
        return;
    }
    out.reserve(levels.len() * 2);
    for row in levels.chunks(width) {
        for pair in row.chunks(2) {
            let (y0, u0, v0) = rgb_to_yuv(table[pair[0] as usize]);
            match pair.get(1) {
                Some(&l) => {
                    let (y1, u1, v1) = rgb_to_yuv(table[l as usize]);
                    let u = ((u0 as u16 + u1 as u16 + 1) / 2) as u8;
                    let v = ((v0 as u16 + v1 as u16 + 1) / 2) as u8;
                    out.extend_from_slice(&[y0, u, y1, v]);
                }
                None => out.extend_from_slice(&[y0, u0]),
            }
        }
    }
}
