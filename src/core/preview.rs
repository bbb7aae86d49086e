//! Color-mapped previews of index results.
//!
//! Scaling is per result: every call recomputes min/max from the values it is
//! given, so the same index value can render differently across calls.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::{BandArray, VegError, VegResult};

/// Normalized value used for NaN and infinite pixels
pub const NODATA_LEVEL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Palette {
    /// Red -> Yellow -> Green, the usual vegetation ramp
    RdYlGn,
    Greens,
    Viridis,
    Spectral,
    Grayscale,
}

const RDYLGN: &[u32] = &[
    0xa50026, 0xd73027, 0xf46d43, 0xfdae61, 0xfee08b, 0xffffbf, 0xd9ef8b, 0xa6d96a, 0x66bd63,
    0x1a9850, 0x006837,
];
const GREENS: &[u32] = &[
    0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c, 0x00441b,
];
const VIRIDIS: &[u32] = &[
    0x440154, 0x482878, 0x3e4989, 0x31688e, 0x26828e, 0x1f9e89, 0x35b779, 0x6ece58, 0xb5de2b,
    0xfde725,
];
const SPECTRAL: &[u32] = &[
    0x9e0142, 0xd53e4f, 0xf46d43, 0xfdae61, 0xfee08b, 0xffffbf, 0xe6f598, 0xabdda4, 0x66c2a5,
    0x3288bd, 0x5e4fa2,
];
const GRAYSCALE: &[u32] = &[0x000000, 0xffffff];

impl Palette {
    pub const ALL: &'static [Palette] = &[
        Palette::RdYlGn,
        Palette::Greens,
        Palette::Viridis,
        Palette::Spectral,
        Palette::Grayscale,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Palette::RdYlGn => "RdYlGn",
            Palette::Greens => "Greens",
            Palette::Viridis => "viridis",
            Palette::Spectral => "Spectral",
            Palette::Grayscale => "gray",
        }
    }

    pub fn from_name(name: &str) -> VegResult<Self> {
        let wanted = name.trim();
        Palette::ALL
            .iter()
            .copied()
            .find(|palette| palette.name().eq_ignore_ascii_case(wanted))
            .or_else(|| wanted.eq_ignore_ascii_case("grayscale").then_some(Palette::Grayscale))
            .ok_or_else(|| VegError::UnknownPalette(name.to_string()))
    }

    fn stops(&self) -> &'static [u32] {
        match self {
            Palette::RdYlGn => RDYLGN,
            Palette::Greens => GREENS,
            Palette::Viridis => VIRIDIS,
            Palette::Spectral => SPECTRAL,
            Palette::Grayscale => GRAYSCALE,
        }
    }

    /// Color for a normalized value; input is clamped to [0, 1]
    pub fn color(&self, t: f64) -> [u8; 3] {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { NODATA_LEVEL };
        let segments = (stops.len() - 1) as f64;
        let position = t * segments;
        let lower = (position.floor() as usize).min(stops.len() - 2);
        let frac = position - lower as f64;

        let a = unpack(stops[lower]);
        let b = unpack(stops[lower + 1]);
        let mut out = [0u8; 3];
        for i in 0..3 {
            let value = a[i] as f64 + (b[i] as f64 - a[i] as f64) * frac;
            out[i] = value.round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

fn unpack(hex: u32) -> [u8; 3] {
    [(hex >> 16) as u8, (hex >> 8) as u8, hex as u8]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewParams {
    pub palette: Palette,
}

impl Default for PreviewParams {
    fn default() -> Self {
        Self {
            palette: Palette::RdYlGn,
        }
    }
}

/// Linear rescale to [0, 1] using the finite min/max of `values`.
///
/// Non-finite pixels become `NODATA_LEVEL`. A constant input maps to 0.
pub fn rescale_to_unit(values: &BandArray) -> BandArray {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    values.mapv(|v| {
        if !v.is_finite() {
            NODATA_LEVEL
        } else if range > 0.0 {
            (v - min) / range
        } else {
            0.0
        }
    })
}

/// Render index values to an 8-bit RGB image
pub fn render_preview(values: &BandArray, params: &PreviewParams) -> VegResult<RgbImage> {
    let (rows, cols) = values.dim();
    let unit = rescale_to_unit(values);
    let palette = params.palette;
    let mut buffer = vec![0u8; rows * cols * 3];

    log::debug!("Rendering {}x{} preview with {}", cols, rows, palette.name());

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        if cols > 0 {
            buffer
                .par_chunks_mut(cols * 3)
                .zip(unit.axis_iter(ndarray::Axis(0)).into_par_iter())
                .for_each(|(out_row, row)| {
                    for (pixel, &t) in out_row.chunks_mut(3).zip(row.iter()) {
                        pixel.copy_from_slice(&palette.color(t));
                    }
                });
        }
    }

    #[cfg(not(feature = "parallel"))]
    {
        for (pixel, &t) in buffer.chunks_mut(3).zip(unit.iter()) {
            pixel.copy_from_slice(&palette.color(t));
        }
    }

    RgbImage::from_raw(cols as u32, rows as u32, buffer).ok_or_else(|| {
        VegError::InvalidConfig(format!("preview buffer does not fit {}x{}", cols, rows))
    })
}
