//! # asciivid - ASCII video converter library
//!
//! `asciivid` turns video frames into ASCII art, either played back as text in
//! a terminal or rasterized into frames for a video encoder.
//!
//! ## Features
//!
//! - Area-averaged luminance sampling with letterbox/pillarbox padding
//! - Configurable glyph ramps, quantized into equal-width luminance buckets
//! - Glyph rasterization through a monospace font or a built-in bitmap font
//! - Frame-rate resampling by nearest timestamp
//! - Cooperative cancellation and typed errors
//!
//! ## Example
//!
//! ```no_run
//! use asciivid::media::{probe, FfmpegSource, SinkFactory};
//! use asciivid::{CancelToken, ConversionJob, JobOptions};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let job = ConversionJob::new(JobOptions::default().with_columns(120))?;
//! let info = probe(Path::new("input.mp4"))?;
//! let mut source = FfmpegSource::open(Path::new("input.mp4"), &info, None)?;
//!
//! let plan = job.prepare_video(&source)?;
//! let (mut sink, written) = SinkFactory::default().open(
//!     Path::new("ascii_out.mp4"),
//!     plan.frame_dimensions(),
//!     plan.output_fps(),
//! )?;
//! job.export(plan, &mut source, &mut sink, &CancelToken::new(), |p| println!("{}", p.message))?;
//! println!("wrote {}", written.display());
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

mod bitmap_font;
pub mod error;
pub mod font;
pub mod frames;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod preprocessing;
pub mod ramp;
pub mod renderer;
pub mod sampler;
pub mod terminal;

pub use error::{ConvertError, ErrorKind};
pub use font::{FontFace, FontSpec, GlyphAtlas};
pub use job::{ConversionJob, JobReport, VideoPlan};
pub use pipeline::{CancelToken, EmittedFrame, FrameSchedule, FrameSink, FrameSource, Pipeline, PipelineState, TerminalSink};
pub use ramp::GlyphRamp;
pub use renderer::{ForegroundMode, GlyphCell, RasterRenderer, Render, TextRenderer};
pub use sampler::{CellRect, GridLayout, LuminanceGrid};

/// Represents the current phase of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Font, glyph atlas and layout are being prepared
    Preparing,
    /// Frames are being sampled, rendered and written
    Rendering,
    /// Conversion completed successfully
    Complete,
}

/// Progress information for conversion operations
///
/// This struct provides detailed progress information that can be used
/// to display progress in UI applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase of the conversion
    pub phase: ProgressPhase,
    /// Number of frames written so far
    pub completed: usize,
    /// Expected number of frames (0 if unknown)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

impl Progress {
    pub fn preparing() -> Self {
        Self {
            phase: ProgressPhase::Preparing,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: "Preparing glyphs and layout...".to_string(),
        }
    }

    pub fn rendering(completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::Rendering,
            completed,
            total,
            percentage,
            message: format!("Rendering frame {} of {}", completed, total),
        }
    }

    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Conversion complete: {} frames", total_frames),
        }
    }
}

/// Where converted frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Play the ASCII frames in the terminal
    #[default]
    Terminal,
    /// Rasterize the frames and save them as a video
    Video,
}

/// Options for one conversion job
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Target width in characters (columns)
    pub columns: u32,
    /// Output frames per second; 0 keeps the source rate
    pub fps: f64,
    /// Font size in pixels for rasterized output
    pub font_size: f32,
    /// Font used for rasterized output
    pub font: FontSpec,
    /// Fall back to the built-in bitmap font when no font file loads
    pub builtin_font_fallback: bool,
    /// Glyph ramp from darkest to lightest
    pub ramp: String,
    /// Cell width/height override; derived from the font when unset
    pub font_ratio: Option<f32>,
    /// Upper bound on the grid height in rows
    pub max_rows: Option<u32>,
    /// Glyph colour for rasterized output
    pub foreground: [u8; 3],
    pub foreground_mode: ForegroundMode,
    pub mode: OutputMode,
    /// Mux the source's audio into the saved video afterwards
    pub merge_audio: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            columns: 120,
            fps: 0.0,
            font_size: 12.0,
            font: FontSpec::Auto,
            builtin_font_fallback: true,
            ramp: ramp::CLASSIC.to_string(),
            font_ratio: None,
            max_rows: None,
            foreground: renderer::DEFAULT_FOREGROUND,
            foreground_mode: ForegroundMode::Solid,
            mode: OutputMode::Terminal,
            merge_audio: false,
        }
    }
}

impl JobOptions {
    pub fn with_columns(mut self, columns: u32) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn with_font(mut self, font: FontSpec) -> Self {
        self.font = font;
        self
    }

    pub fn with_builtin_font_fallback(mut self, allowed: bool) -> Self {
        self.builtin_font_fallback = allowed;
        self
    }

    pub fn with_ramp(mut self, ramp: impl Into<String>) -> Self {
        self.ramp = ramp.into();
        self
    }

    pub fn with_font_ratio(mut self, font_ratio: Option<f32>) -> Self {
        self.font_ratio = font_ratio;
        self
    }

    pub fn with_max_rows(mut self, max_rows: Option<u32>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_foreground(mut self, foreground: [u8; 3], mode: ForegroundMode) -> Self {
        self.foreground = foreground;
        self.foreground_mode = mode;
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_merge_audio(mut self, merge_audio: bool) -> Self {
        self.merge_audio = merge_audio;
        self
    }

    /// Applies a preset's values on top of the defaults.
    pub fn from_preset(preset: &Preset) -> Self {
        let mut options = Self::default()
            .with_columns(preset.columns)
            .with_fps(preset.fps)
            .with_font_size(preset.font_size)
            .with_font_ratio(preset.font_ratio);
        if let Some(ramp) = &preset.ramp {
            options.ramp = ramp::named(ramp).map(str::to_string).unwrap_or_else(|| ramp.clone());
        }
        options
    }
}

/// Configuration preset defining quality settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub columns: u32,
    #[serde(default)]
    pub fps: f64,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default)]
    pub font_ratio: Option<f32>,
    /// A built-in ramp name or a literal ramp
    #[serde(default)]
    pub ramp: Option<String>,
}

fn default_font_size() -> f32 {
    12.0
}

/// Application configuration with named presets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub presets: HashMap<String, Preset>,
    pub default_preset: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let preset = |columns, font_size, ramp: &str| Preset {
            columns,
            fps: 0.0,
            font_size,
            font_ratio: None,
            ramp: Some(ramp.to_string()),
        };
        let presets = HashMap::from([
            ("default".to_string(), preset(120, 12.0, "classic")),
            ("small".to_string(), preset(80, 10.0, "standard")),
            ("large".to_string(), preset(240, 14.0, "detailed")),
        ]);
        Self {
            presets,
            default_preset: "default".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a `.json` or `.toml` file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).context("parsing config toml")?,
            _ => serde_json::from_str(&text).context("parsing config json")?,
        };
        if !config.presets.contains_key(&config.default_preset) {
            return Err(anyhow!(
                "Config file {} names default preset '{}' but does not define it",
                path.display(),
                config.default_preset
            ));
        }
        Ok(config)
    }

    /// Get a preset by name
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Get job options from a preset name
    pub fn options_from_preset(&self, name: &str) -> anyhow::Result<JobOptions> {
        let preset = self.preset(name).ok_or_else(|| anyhow!("Preset '{}' not found", name))?;
        Ok(JobOptions::from_preset(preset))
    }
}
