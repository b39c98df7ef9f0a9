//! QR renderer backed by the `qrcode` crate.
//!
//! Two output formats, both returned as base64 data URLs:
//!
//! - **SVG** (`vector` mode): rendered by `qrcode`'s SVG backend.
//! - **PNG** (`raster` mode): modules are painted into an `image::RgbImage`
//!   at an integer scale, then PNG-encoded.
//!
//! `min_size` is a lower bound on the image edge in pixels.  The real size is
//! the smallest whole-pixel multiple of the module grid that reaches it.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use pairlink_core::{QrArtifact, QrFormat};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};

use crate::application::ports::{QrRenderer, RenderError};

/// Modules of blank border on each side when the quiet zone is on.
const QUIET_ZONE_MODULES: u32 = 4;

/// Largest accepted `min_size`, in pixels.
pub const MAX_MIN_SIZE: u32 = 4096;

/// Error correction level.  Higher levels survive more damage but need a
/// denser code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        }
    }
}

/// Rendering parameters, usually built from the `[qr]` config table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrRenderOptions {
    pub format: QrFormat,
    pub min_size: u32,
    pub quiet_zone: bool,
    pub error_correction: ErrorCorrection,
    /// `#rrggbb`
    pub dark_color: String,
    /// `#rrggbb`
    pub light_color: String,
}

impl Default for QrRenderOptions {
    fn default() -> Self {
        Self {
            format: QrFormat::Svg,
            min_size: 300,
            quiet_zone: true,
            error_correction: ErrorCorrection::M,
            dark_color: "#000000".to_string(),
            light_color: "#ffffff".to_string(),
        }
    }
}

/// Renders pairing codes to SVG or PNG data URLs.
#[derive(Debug, Clone)]
pub struct QrCodeRenderer {
    options: QrRenderOptions,
    dark: Rgb<u8>,
    light: Rgb<u8>,
}

impl QrCodeRenderer {
    /// Validates `options` and builds a renderer.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidOption`] if a color is not `#rrggbb`
    /// or `min_size` exceeds [`MAX_MIN_SIZE`].
    pub fn new(options: QrRenderOptions) -> Result<Self, RenderError> {
        if options.min_size > MAX_MIN_SIZE {
            return Err(RenderError::InvalidOption(format!(
                "size {} exceeds {MAX_MIN_SIZE}",
                options.min_size
            )));
        }
        let dark = parse_hex_color(&options.dark_color)?;
        let light = parse_hex_color(&options.light_color)?;
        Ok(Self {
            options,
            dark,
            light,
        })
    }

    pub fn options(&self) -> &QrRenderOptions {
        &self.options
    }

    fn encode(&self, text: &str) -> Result<QrCode, RenderError> {
        QrCode::with_error_correction_level(text.as_bytes(), self.options.error_correction.into())
            .map_err(|e| RenderError::Encode(e.to_string()))
    }

    fn render_svg(&self, code: &QrCode) -> String {
        code.render::<svg::Color<'_>>()
            .min_dimensions(self.options.min_size, self.options.min_size)
            .quiet_zone(self.options.quiet_zone)
            .dark_color(svg::Color(&self.options.dark_color))
            .light_color(svg::Color(&self.options.light_color))
            .build()
    }

    fn render_png(&self, code: &QrCode) -> Result<Vec<u8>, RenderError> {
        let modules = u32::try_from(code.width())
            .map_err(|_| RenderError::Encode("code too large".to_string()))?;
        let border = if self.options.quiet_zone {
            QUIET_ZONE_MODULES
        } else {
            0
        };
        let too_large = || RenderError::Image("image dimensions overflow".to_string());
        let span = modules
            .checked_add(2 * border)
            .ok_or_else(too_large)?;
        let scale = self.options.min_size.div_ceil(span).max(1);
        let edge = span.checked_mul(scale).ok_or_else(too_large)?;

        let colors = code.to_colors();
        let image = RgbImage::from_fn(edge, edge, |x, y| {
            let (mx, my) = (x / scale, y / scale);
            let inside = (border..border + modules).contains(&mx)
                && (border..border + modules).contains(&my);
            if !inside {
                return self.light;
            }
            let index = ((my - border) * modules + (mx - border)) as usize;
            colors[index].select(self.dark, self.light)
        });

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| RenderError::Image(e.to_string()))?;
        Ok(bytes)
    }
}

impl QrRenderer for QrCodeRenderer {
    fn render(&self, text: &str) -> Result<QrArtifact, RenderError> {
        let code = self.encode(text)?;
        let data_url = match self.options.format {
            QrFormat::Svg => {
                let svg = self.render_svg(&code);
                format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
            }
            QrFormat::Png => {
                let png = self.render_png(&code)?;
                format!("data:image/png;base64,{}", STANDARD.encode(png))
            }
        };
        Ok(QrArtifact {
            format: self.options.format,
            data_url,
        })
    }
}

fn parse_hex_color(value: &str) -> Result<Rgb<u8>, RenderError> {
    let invalid = || RenderError::InvalidOption(format!("color {value:?} is not #rrggbb"));
    let hex = value.strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
