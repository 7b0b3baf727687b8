// src/io/render.rs
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use log::info;
use serde::{Deserialize, Serialize};

use super::adapter::{LayerStyle, Visualizer};
use crate::error::{Error, Result};
use crate::raster::BandRaster;

/// RGB color, written as a palette name or `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn named(name: &str) -> Option<Self> {
        Some(match name {
            "black" => Self::new(0, 0, 0),
            "white" => Self::new(255, 255, 255),
            "red" => Self::new(255, 0, 0),
            "green" => Self::new(0, 128, 0),
            "blue" => Self::new(0, 0, 255),
            "yellow" => Self::new(255, 255, 0),
            "orange" => Self::new(255, 165, 0),
            "brown" => Self::new(165, 42, 42),
            "cyan" => Self::new(0, 255, 255),
            "magenta" => Self::new(255, 0, 255),
            "purple" => Self::new(128, 0, 128),
            "gray" | "grey" => Self::new(128, 128, 128),
            "darkgreen" => Self::new(0, 100, 0),
            _ => return None,
        })
    }

    fn lerp(self, other: Self, t: f64) -> Self {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Self::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
        )
    }
}

impl FromStr for Rgb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::invalid_parameter("color", s, "expected a color name or #RRGGBB");
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(invalid());
            }
            let channel =
                |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
            return Ok(Self::new(channel(0)?, channel(2)?, channel(4)?));
        }
        Self::named(&s.to_ascii_lowercase()).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Rgb {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Evenly spaced stops; `t` is clamped to `[0, 1]`.
pub fn interpolate(palette: &[Rgb], t: f64) -> Rgb {
    match palette {
        [] => Rgb::new(0, 0, 0),
        [only] => *only,
        _ => {
            let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
            let scaled = t * (palette.len() - 1) as f64;
            let idx = (scaled.floor() as usize).min(palette.len() - 2);
            palette[idx].lerp(palette[idx + 1], scaled - idx as f64)
        }
    }
}

/// RGBA buffer, row-major. Masked pixels are fully transparent.
pub fn raster_to_rgba(raster: &BandRaster, style: &LayerStyle) -> Vec<u8> {
    let range = style.max - style.min;
    let inv_range = if range.abs() > f64::EPSILON {
        1.0 / range
    } else {
        1.0
    };

    let mut rgba = Vec::with_capacity(raster.values().len() * 4);
    for (&v, &valid) in raster.values().iter().zip(raster.mask().iter()) {
        if valid && v.is_finite() {
            let Rgb { r, g, b } = interpolate(&style.palette, (v as f64 - style.min) * inv_range);
            rgba.extend_from_slice(&[r, g, b, 255]);
        } else {
            rgba.extend_from_slice(&[0, 0, 0, 0]);
        }
    }
    rgba
}

/// Writes each layer as `<dir>/<name>.png`
#[derive(Debug, Clone)]
pub struct PngRenderer {
    output_dir: PathBuf,
}

impl PngRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl Visualizer for PngRenderer {
    fn render_layer(&self, raster: &BandRaster, style: &LayerStyle) -> Result<PathBuf> {
        if style.palette.is_empty() {
            return Err(Error::invalid_parameter(
                "palette",
                style.name.as_str(),
                "needs at least one color",
            ));
        }
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.png", style.name));

        let (rows, cols) = raster.shape();
        let buffer = raster_to_rgba(raster, style);
        let writer = BufWriter::new(File::create(&path)?);
        PngEncoder::new(writer).write_image(
            &buffer,
            cols as u32,
            rows as u32,
            ExtendedColorType::Rgba8,
        )?;

        info!(
            "rendered layer `{}` [{}, {}] to {}",
            style.name,
            style.min,
            style.max,
            path.display()
        );
        Ok(path)
    }
}
