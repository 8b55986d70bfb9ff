//! One end-to-end conversion: validated options plus the resources built
//! for them.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ConvertError, Result};
use crate::font::{resolve_font, GlyphAtlas};
use crate::pipeline::{
    fps_in_range, CancelToken, FrameSchedule, FrameSink, FrameSource, Pipeline, TerminalSink, MAX_FPS, MIN_FPS,
};
use crate::ramp::GlyphRamp;
use crate::renderer::{RasterRenderer, TextRenderer};
use crate::sampler::{GridLayout, DEFAULT_CELL_ASPECT};
use crate::{JobOptions, Progress};

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub frames_read: usize,
    pub frames_emitted: usize,
    pub output_fps: f64,
    /// Grid size in cells.
    pub grid: (u32, u32),
}

/// Everything the video path needs before the first frame is read.
///
/// Built by [`ConversionJob::prepare_video`]. The caller opens its sink with
/// [`frame_dimensions`](Self::frame_dimensions) and
/// [`output_fps`](Self::output_fps), then hands both back to
/// [`ConversionJob::export`].
pub struct VideoPlan {
    renderer: RasterRenderer,
    layout: GridLayout,
    schedule: FrameSchedule,
}

impl VideoPlan {
    /// Pixel size of every output frame.
    pub fn frame_dimensions(&self) -> (u32, u32) {
        self.renderer.frame_dimensions(self.layout.cols(), self.layout.rows())
    }

    pub fn output_fps(&self) -> f64 {
        self.schedule.output_fps()
    }

    pub fn grid(&self) -> (u32, u32) {
        (self.layout.cols(), self.layout.rows())
    }
}

impl std::fmt::Debug for VideoPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlan")
            .field("grid", &self.grid())
            .field("frame_dimensions", &self.frame_dimensions())
            .field("output_fps", &self.output_fps())
            .finish()
    }
}

/// A validated conversion.
///
/// Creating a job checks every option, so a bad configuration is reported
/// before any source is touched. Font and glyph metrics are resolved per job
/// and never shared between jobs.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    options: JobOptions,
    ramp: GlyphRamp,
}

impl ConversionJob {
    pub fn new(options: JobOptions) -> Result<Self> {
        if options.columns == 0 {
            return Err(ConvertError::config("cols must be greater than zero"));
        }
        if options.fps != 0.0 && !fps_in_range(options.fps) {
            return Err(ConvertError::config(format!(
                "fps must be 0 (auto) or between {} and {}, got {}",
                MIN_FPS, MAX_FPS, options.fps
            )));
        }
        if !options.font_size.is_finite() || options.font_size <= 0.0 {
            return Err(ConvertError::config(format!("font size must be positive, got {}", options.font_size)));
        }
        if let Some(ratio) = options.font_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(ConvertError::config(format!("font ratio must be positive, got {}", ratio)));
            }
        }
        if options.max_rows == Some(0) {
            return Err(ConvertError::config("max rows must be greater than zero"));
        }
        let ramp = GlyphRamp::new(&options.ramp)?;
        Ok(Self { options, ramp })
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn ramp(&self) -> &GlyphRamp {
        &self.ramp
    }

    fn layout_for(&self, dimensions: (u32, u32), cell_aspect: f32) -> Result<GridLayout> {
        GridLayout::new(dimensions, self.options.columns, cell_aspect, self.options.max_rows)
    }

    /// Plays `source` as text, pacing writes to the output frame rate.
    pub fn play<S, T>(&self, source: &mut S, terminal: &mut T, cancel: &CancelToken) -> Result<JobReport>
    where
        S: FrameSource + ?Sized,
        T: TerminalSink + ?Sized,
    {
        let aspect = self.options.font_ratio.unwrap_or(DEFAULT_CELL_ASPECT);
        let layout = self.layout_for(source.dimensions(), aspect)?;
        let schedule = FrameSchedule::new(source.native_fps(), self.options.fps)?;
        let renderer = TextRenderer::new(self.ramp.clone());
        let grid = (layout.cols(), layout.rows());

        log::info!("playing {}x{} cells at {:.2} fps", grid.0, grid.1, schedule.output_fps());
        let mut pacer = Pacer::new(schedule.output_fps());
        let mut pipeline = Pipeline::new(source, &renderer, layout, schedule, cancel.clone());

        while let Some(item) = pipeline.next() {
            let emitted = item?;
            if let Err(source) = terminal.write(&emitted.frame) {
                pipeline.abort();
                return Err(ConvertError::SinkWrite { frame: emitted.index, source });
            }
            pacer.wait();
        }
        pipeline.complete();

        Ok(JobReport {
            frames_read: pipeline.frames_read(),
            frames_emitted: pipeline.frames_emitted(),
            output_fps: pipeline.output_fps(),
            grid,
        })
    }

    /// Resolves the font, builds the glyph atlas and computes the output
    /// geometry for `source`. Fails before any frame is read.
    pub fn prepare_video<S>(&self, source: &S) -> Result<VideoPlan>
    where
        S: FrameSource + ?Sized,
    {
        let face = resolve_font(&self.options.font, self.options.builtin_font_fallback)?;
        let atlas = GlyphAtlas::build(&face, self.options.font_size, self.ramp.chars())?;
        let aspect = self.options.font_ratio.unwrap_or_else(|| atlas.cell_aspect());
        let layout = self.layout_for(source.dimensions(), aspect)?;
        let schedule = FrameSchedule::new(source.native_fps(), self.options.fps)?;
        let renderer = RasterRenderer::new(self.ramp.clone(), atlas, self.options.foreground, self.options.foreground_mode);

        let plan = VideoPlan { renderer, layout, schedule };
        log::info!("video plan: {:?} using {}", plan, face.describe());
        Ok(plan)
    }

    /// Renders every frame of `source` into `sink`, then finishes the sink.
    ///
    /// The first sink failure aborts the job; nothing is retried.
    pub fn export<S, K, F>(&self, plan: VideoPlan, source: &mut S, sink: &mut K, cancel: &CancelToken, progress: F) -> Result<JobReport>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: Fn(Progress),
    {
        let VideoPlan { renderer, layout, schedule } = plan;
        let grid = (layout.cols(), layout.rows());
        let total = source.len_hint().map(|n| schedule.output_len(n)).unwrap_or(0);

        progress(Progress::preparing());
        let mut pipeline = Pipeline::new(source, &renderer, layout, schedule, cancel.clone());
        progress(Progress::rendering(0, total));

        while let Some(item) = pipeline.next() {
            let emitted = item?;
            if let Err(source) = sink.write(&emitted.frame) {
                pipeline.abort();
                return Err(ConvertError::SinkWrite { frame: emitted.index, source });
            }
            progress(Progress::rendering(emitted.index + 1, total.max(emitted.index + 1)));
        }

        let emitted = pipeline.frames_emitted();
        if let Err(source) = sink.finish() {
            pipeline.abort();
            return Err(ConvertError::SinkWrite { frame: emitted, source });
        }
        pipeline.complete();
        progress(Progress::complete(emitted));

        Ok(JobReport {
            frames_read: pipeline.frames_read(),
            frames_emitted: emitted,
            output_fps: pipeline.output_fps(),
            grid,
        })
    }
}

/// Sleeps away whatever is left of each frame interval.
struct Pacer {
    interval: Duration,
    last: Instant,
}

impl Pacer {
    fn new(fps: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            last: Instant::now(),
        }
    }

    fn wait(&mut self) {
        let elapsed = self.last.elapsed();
        if let Some(rest) = self.interval.checked_sub(elapsed) {
            thread::sleep(rest);
        }
        self.last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontSpec;

    #[test]
    fn rejects_bad_options_up_front() {
        assert!(ConversionJob::new(JobOptions::default().with_columns(0)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_fps(-1.0)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_fps(f64::INFINITY)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_fps(1e-20)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_fps(1e9)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_fps(MIN_FPS)).is_ok());
        assert!(ConversionJob::new(JobOptions::default().with_fps(MAX_FPS)).is_ok());
        assert!(ConversionJob::new(JobOptions::default().with_font_size(0.0)).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_ramp("x")).is_err());
        assert!(ConversionJob::new(JobOptions::default().with_max_rows(Some(0))).is_err());
        assert!(ConversionJob::new(JobOptions::default()).is_ok());
    }

    #[test]
    fn pacer_interval_matches_fps() {
        let secs = |fps: f64| Pacer::new(fps).interval.as_secs_f64();
        assert!((secs(25.0) - 0.04).abs() < 1e-6);
        // Bounds of the accepted range stay representable.
        assert!((secs(MIN_FPS) - 1000.0).abs() < 1e-6);
        assert!((secs(MAX_FPS) - 0.001).abs() < 1e-6);
    }

    #[test]
    fn play_rejects_repeat_heavy_rates_before_reading() {
        struct Slow {
            reads: usize,
        }
        impl FrameSource for Slow {
            fn next_frame(&mut self) -> anyhow::Result<Option<image::RgbImage>> {
                self.reads += 1;
                Ok(None)
            }
            fn native_fps(&self) -> f64 {
                0.5
            }
            fn dimensions(&self) -> (u32, u32) {
                (160, 120)
            }
        }
        struct Nowhere;
        impl TerminalSink for Nowhere {
            fn write(&mut self, _: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let job = ConversionJob::new(JobOptions::default().with_fps(500.0)).unwrap();
        let mut source = Slow { reads: 0 };
        let err = job.play(&mut source, &mut Nowhere, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfiguration);
        assert_eq!(source.reads, 0);
    }

    #[test]
    fn builtin_font_plan_uses_bitmap_cells() {
        struct Still;
        impl FrameSource for Still {
            fn next_frame(&mut self) -> anyhow::Result<Option<image::RgbImage>> {
                Ok(None)
            }
            fn native_fps(&self) -> f64 {
                30.0
            }
            fn dimensions(&self) -> (u32, u32) {
                (160, 120)
            }
        }
        let job = ConversionJob::new(JobOptions::default().with_columns(20).with_font(FontSpec::Builtin)).unwrap();
        let plan = job.prepare_video(&Still).unwrap();
        let (cols, rows) = plan.grid();
        assert_eq!(cols, 20);
        assert_eq!(plan.frame_dimensions(), (cols * 8, rows * 12));
        assert_eq!(plan.output_fps(), 30.0);
    }
}
