//! Configuration types for the conversion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The per-request knobs that arrive with an
//! upload (`format`, `scale`, `resolution`) are parsed leniently into
//! [`RasterOptions`]: anything unrecognised falls back to a default instead of
//! failing the request.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Smallest accepted rasterisation scale factor.
pub const MIN_SCALE: f32 = 0.1;
/// Largest accepted rasterisation scale factor.
pub const MAX_SCALE: f32 = 8.0;
/// PDF user-space units per inch; `resolution` (DPI) maps to `dpi / 72` scale.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Configuration for the conversion pipeline.
///
/// # Example
/// ```rust
/// use pagemill::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .images_concurrency(8)
///     .pages_concurrency(2)
///     .default_scale(1.5)
///     .build()
///     .unwrap();
/// assert_eq!(config.pages_concurrency, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Concurrent page jobs for images→document. Default: 8.
    ///
    /// Each job decodes one upload and re-encodes it for embedding; cheap
    /// compared to rasterisation.
    pub images_concurrency: usize,

    /// Concurrent page jobs for document→images. Default: 2.
    ///
    /// A rasterised page at scale 2 of an A4 sheet is ~35 MB of RGBA before
    /// encoding. Keep this well below `images_concurrency`.
    pub pages_concurrency: usize,

    /// JPEG quality (1–100) for rasterised pages when `format=jpeg`. Default: 90.
    pub output_jpeg_quality: u8,

    /// JPEG quality (1–100) used when re-encoding JPEG uploads for embedding
    /// into a document. PNG uploads are always embedded losslessly. Default: 90.
    pub embed_jpeg_quality: u8,

    /// Scale used when the request carries no valid `scale`/`resolution`. Default: 2.0.
    pub default_scale: f32,

    /// Longest-edge cap for a rendered page in pixels. Default: 10 000.
    pub max_rendered_pixels: u32,

    /// Output format used when the request's `format` is missing or unknown. Default: png.
    pub default_format: OutputFormat,

    /// Directory under which per-request scratch areas are created.
    /// `None` uses the OS temp directory.
    pub scratch_root: Option<PathBuf>,

    /// Which rasterisation backend to bind at startup. Default: pdfium.
    pub renderer: RendererKind,

    /// Explicit pdfium shared library path. `None` binds the system library.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            images_concurrency: 8,
            pages_concurrency: 2,
            output_jpeg_quality: 90,
            embed_jpeg_quality: 90,
            default_scale: 2.0,
            max_rendered_pixels: 10_000,
            default_format: OutputFormat::Png,
            scratch_root: None,
            renderer: RendererKind::default(),
            pdfium_library: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("images_concurrency", &self.images_concurrency)
            .field("pages_concurrency", &self.pages_concurrency)
            .field("output_jpeg_quality", &self.output_jpeg_quality)
            .field("embed_jpeg_quality", &self.embed_jpeg_quality)
            .field("default_scale", &self.default_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("default_format", &self.default_format)
            .field("scratch_root", &self.scratch_root)
            .field("renderer", &self.renderer)
            .field("pdfium_library", &self.pdfium_library)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse per-request raster parameters against this config's defaults.
    pub fn raster_options(
        &self,
        format: Option<&str>,
        scale: Option<&str>,
        resolution: Option<&str>,
    ) -> RasterOptions {
        RasterOptions::from_params(
            format,
            scale,
            resolution,
            self.default_format,
            self.default_scale,
        )
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn images_concurrency(mut self, n: usize) -> Self {
        self.config.images_concurrency = n.max(1);
        self
    }

    pub fn pages_concurrency(mut self, n: usize) -> Self {
        self.config.pages_concurrency = n.max(1);
        self
    }

    pub fn output_jpeg_quality(mut self, q: u8) -> Self {
        self.config.output_jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn embed_jpeg_quality(mut self, q: u8) -> Self {
        self.config.embed_jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn default_scale(mut self, scale: f32) -> Self {
        self.config.default_scale = scale;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn default_format(mut self, format: OutputFormat) -> Self {
        self.config.default_format = format;
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(root.into());
        self
    }

    pub fn renderer(mut self, kind: RendererKind) -> Self {
        self.config.renderer = kind;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConvertError> {
        let c = &self.config;
        if !is_valid_scale(c.default_scale) {
            return Err(ConvertError::InvalidConfig(format!(
                "default scale must be {MIN_SCALE}–{MAX_SCALE}, got {}",
                c.default_scale
            )));
        }
        if c.pages_concurrency > c.images_concurrency {
            return Err(ConvertError::InvalidConfig(format!(
                "pages concurrency ({}) must not exceed images concurrency ({})",
                c.pages_concurrency, c.images_concurrency
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Rasterisation backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// In-process pdfium via `pdfium-render`. (default)
    #[default]
    Pdfium,
    /// Poppler's `pdfinfo` / `pdftoppm` subprocesses.
    Poppler,
}

impl FromStr for RendererKind {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdfium" => Ok(RendererKind::Pdfium),
            "poppler" | "pdftoppm" => Ok(RendererKind::Poppler),
            other => Err(ConvertError::InvalidConfig(format!(
                "unknown renderer '{other}' (expected pdfium or poppler)"
            ))),
        }
    }
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererKind::Pdfium => f.write_str("pdfium"),
            RendererKind::Poppler => f.write_str("poppler"),
        }
    }
}

/// Image format of rasterised pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless. (default)
    #[default]
    Png,
    /// Lossy, quality from [`PipelineConfig::output_jpeg_quality`].
    Jpeg,
}

impl OutputFormat {
    /// Strict parse; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }

    /// File extension used for archive entry names.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Per-request rasterisation parameters after lenient parsing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterOptions {
    pub format: OutputFormat,
    /// Multiplier applied to the page's size in points.
    pub scale: f32,
}

impl RasterOptions {
    /// Resolve form parameters, falling back to defaults on anything invalid.
    ///
    /// `scale` is a direct factor; `resolution` is DPI (`scale = dpi / 72`).
    /// A valid `scale` wins over `resolution`.
    pub fn from_params(
        format: Option<&str>,
        scale: Option<&str>,
        resolution: Option<&str>,
        default_format: OutputFormat,
        default_scale: f32,
    ) -> Self {
        let format = format
            .and_then(OutputFormat::parse)
            .unwrap_or(default_format);

        let from_scale = scale.and_then(parse_number).filter(|s| is_valid_scale(*s));
        let from_resolution = resolution
            .and_then(parse_number)
            .map(|dpi| dpi / POINTS_PER_INCH)
            .filter(|s| is_valid_scale(*s));

        Self {
            format,
            scale: from_scale.or(from_resolution).unwrap_or(default_scale),
        }
    }
}

fn parse_number(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok()
}

fn is_valid_scale(scale: f32) -> bool {
    scale.is_finite() && (MIN_SCALE..=MAX_SCALE).contains(&scale)
}
