//! The frame pipeline: source frames in, rendered frames out, one at a time.

use anyhow::anyhow;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ConvertError, Result};
use crate::renderer::Render;
use crate::sampler::GridLayout;

/// Frame rate assumed when a source does not report a usable one.
pub const FALLBACK_FPS: f64 = 24.0;

/// Lowest accepted frame rate (one frame every ~17 minutes).
pub const MIN_FPS: f64 = 0.001;

/// Highest accepted frame rate.
pub const MAX_FPS: f64 = 1000.0;

/// Most output ticks a single source frame may be repeated for.
pub const MAX_TICKS_PER_FRAME: f64 = 120.0;

/// Whether `fps` is a usable positive rate.
pub fn fps_in_range(fps: f64) -> bool {
    fps.is_finite() && (MIN_FPS..=MAX_FPS).contains(&fps)
}

/// Produces decoded frames in presentation order. Never seeks or rewinds.
pub trait FrameSource {
    /// The next frame, or `None` at end of stream. A trailing frame that was
    /// only partially decoded must be dropped by the source, not returned.
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;

    fn native_fps(&self) -> f64;

    /// `(width, height)` of every frame this source yields.
    fn dimensions(&self) -> (u32, u32);

    /// Total number of frames, when the source knows it up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Consumes rasterized output frames (video path).
pub trait FrameSink {
    fn write(&mut self, frame: &RgbImage) -> anyhow::Result<()>;

    /// Flushes and closes the output once every frame has been written.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Consumes text frames (terminal path).
pub trait TerminalSink {
    fn write(&mut self, text: &str) -> anyhow::Result<()>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn native_fps(&self) -> f64 {
        (**self).native_fps()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    fn write(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish()
    }
}

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Maps output ticks onto source frames by nearest timestamp.
///
/// Output tick `k` shows the source frame nearest to `k * native / target`. Source
/// frames no tick lands on are dropped; frames several ticks land on are
/// repeated.
#[derive(Debug, Clone)]
pub struct FrameSchedule {
    output_fps: f64,
    step: f64,
    next_tick: u64,
}

impl FrameSchedule {
    /// `requested_fps == 0` keeps the source rate. A requested rate outside
    /// [`MIN_FPS`]..=[`MAX_FPS`], or one that would repeat each source frame
    /// more than [`MAX_TICKS_PER_FRAME`] times, is rejected.
    pub fn new(native_fps: f64, requested_fps: f64) -> Result<Self> {
        let native = if fps_in_range(native_fps) {
            native_fps
        } else {
            log::warn!("source reports unusable fps {}, assuming {}", native_fps, FALLBACK_FPS);
            FALLBACK_FPS
        };
        let output_fps = if requested_fps == 0.0 {
            native
        } else if fps_in_range(requested_fps) {
            requested_fps
        } else {
            return Err(ConvertError::config(format!(
                "fps must be 0 (auto) or between {} and {}, got {}",
                MIN_FPS, MAX_FPS, requested_fps
            )));
        };
        if output_fps / native > MAX_TICKS_PER_FRAME {
            return Err(ConvertError::config(format!(
                "{} fps would repeat each {} fps source frame more than {} times",
                output_fps, native, MAX_TICKS_PER_FRAME
            )));
        }
        Ok(Self {
            output_fps,
            step: native / output_fps,
            next_tick: 0,
        })
    }

    pub fn output_fps(&self) -> f64 {
        self.output_fps
    }

    /// Nearest source frame for `tick`; exact ties go to the earlier frame.
    fn target(&self, tick: u64) -> u64 {
        (tick as f64 * self.step - 0.5).ceil().max(0.0) as u64
    }

    /// How many output ticks show source frame `index`. Must be called for
    /// consecutive indices starting at 0.
    pub fn ticks_for(&mut self, index: u64) -> u32 {
        let mut ticks = 0;
        while self.target(self.next_tick) <= index {
            self.next_tick += 1;
            ticks += 1;
        }
        ticks
    }

    /// Expected number of output frames for `source_frames` input frames.
    pub fn output_len(&self, source_frames: usize) -> usize {
        (source_frames as f64 / self.step).round() as usize
    }
}

/// Where the pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Reading,
    Sampling,
    Rendering,
    Emitting,
    Draining,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// One output frame and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFrame<T> {
    /// Position in the output sequence.
    pub index: usize,
    /// Index of the source frame it was rendered from.
    pub source_index: usize,
    pub frame: T,
}

struct Repeat<T> {
    frame: T,
    source_index: usize,
    remaining: u32,
}

/// Lazy, single-pass sequence of rendered frames.
///
/// Each call to `next` reads at most one source frame, samples and renders
/// it, and yields it. The sequence ends at end of stream, or after yielding
/// exactly one error (decode failure or cancellation).
pub struct Pipeline<'a, S: FrameSource + ?Sized, R: Render> {
    source: &'a mut S,
    renderer: &'a R,
    layout: GridLayout,
    schedule: FrameSchedule,
    cancel: CancelToken,
    state: PipelineState,
    read: usize,
    emitted: usize,
    repeat: Option<Repeat<R::Output>>,
}

impl<'a, S, R> Pipeline<'a, S, R>
where
    S: FrameSource + ?Sized,
    R: Render,
    R::Output: Clone,
{
    pub fn new(source: &'a mut S, renderer: &'a R, layout: GridLayout, schedule: FrameSchedule, cancel: CancelToken) -> Self {
        Self {
            source,
            renderer,
            layout,
            schedule,
            cancel,
            state: PipelineState::Idle,
            read: 0,
            emitted: 0,
            repeat: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn output_fps(&self) -> f64 {
        self.schedule.output_fps()
    }

    /// Source frames read so far.
    pub fn frames_read(&self) -> usize {
        self.read
    }

    pub fn frames_emitted(&self) -> usize {
        self.emitted
    }

    /// Marks a drained pipeline as done once the caller has flushed its sink.
    pub fn complete(&mut self) {
        if self.state == PipelineState::Draining {
            self.state = PipelineState::Done;
        }
    }

    /// Stops the pipeline after a failure outside it, such as a rejected
    /// sink write. Nothing more is read or emitted.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Failed;
            self.repeat = None;
        }
    }

    fn fail(&mut self, err: ConvertError) -> Option<Result<EmittedFrame<R::Output>>> {
        self.state = PipelineState::Failed;
        self.repeat = None;
        Some(Err(err))
    }

    fn emit(&mut self, frame: R::Output, source_index: usize) -> Option<Result<EmittedFrame<R::Output>>> {
        self.state = PipelineState::Emitting;
        let index = self.emitted;
        self.emitted += 1;
        Some(Ok(EmittedFrame { index, source_index, frame }))
    }
}

impl<'a, S, R> Iterator for Pipeline<'a, S, R>
where
    S: FrameSource + ?Sized,
    R: Render,
    R::Output: Clone,
{
    type Item = Result<EmittedFrame<R::Output>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state.is_terminal() || self.state == PipelineState::Draining {
                return None;
            }

            if self.cancel.is_cancelled() {
                log::info!("cancelled after {} frames", self.emitted);
                self.state = PipelineState::Cancelled;
                self.repeat = None;
                return Some(Err(ConvertError::Cancelled { emitted: self.emitted }));
            }

            if let Some(mut repeat) = self.repeat.take() {
                let source_index = repeat.source_index;
                let frame = if repeat.remaining > 1 {
                    repeat.remaining -= 1;
                    let frame = repeat.frame.clone();
                    self.repeat = Some(repeat);
                    frame
                } else {
                    repeat.frame
                };
                return self.emit(frame, source_index);
            }

            self.state = PipelineState::Reading;
            let index = self.read;
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::debug!("end of stream after {} source frames, {} emitted", self.read, self.emitted);
                    self.state = PipelineState::Draining;
                    return None;
                }
                Err(source) => return self.fail(ConvertError::SourceDecode { frame: index, source }),
            };
            self.read += 1;

            let expected = self.layout.source_dimensions();
            if frame.dimensions() != expected {
                let (w, h) = frame.dimensions();
                return self.fail(ConvertError::SourceDecode {
                    frame: index,
                    source: anyhow!("frame is {}x{}, expected {}x{}", w, h, expected.0, expected.1),
                });
            }

            let ticks = self.schedule.ticks_for(index as u64);
            if ticks == 0 {
                continue;
            }

            self.state = PipelineState::Sampling;
            let grid = self.layout.sample(&frame);
            drop(frame);

            self.state = PipelineState::Rendering;
            let rendered = self.renderer.render(&grid);

            if ticks > 1 {
                self.repeat = Some(Repeat {
                    frame: rendered.clone(),
                    source_index: index,
                    remaining: ticks - 1,
                });
            }
            return self.emit(rendered, index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::GlyphRamp;
    use crate::renderer::TextRenderer;
    use image::Rgb;

    struct Frames {
        remaining: usize,
        fps: f64,
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbImage::from_pixel(16, 8, Rgb([128, 128, 128]))))
        }

        fn native_fps(&self) -> f64 {
            self.fps
        }

        fn dimensions(&self) -> (u32, u32) {
            (16, 8)
        }
    }

    fn run(frames: usize, native: f64, requested: f64) -> Vec<usize> {
        let mut source = Frames { remaining: frames, fps: native };
        let renderer = TextRenderer::new(GlyphRamp::default());
        let layout = GridLayout::new(source.dimensions(), 4, 0.5, None).unwrap();
        let schedule = FrameSchedule::new(source.native_fps(), requested).unwrap();
        Pipeline::new(&mut source, &renderer, layout, schedule, CancelToken::new())
            .map(|f| f.unwrap().source_index)
            .collect()
    }

    #[test]
    fn auto_fps_is_one_to_one() {
        assert_eq!(run(10, 30.0, 0.0), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn half_rate_takes_every_other_frame() {
        assert_eq!(run(10, 30.0, 15.0), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn higher_rate_repeats_frames() {
        assert_eq!(run(3, 10.0, 20.0), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn schedule_falls_back_on_bad_fps() {
        let schedule = FrameSchedule::new(f64::NAN, 0.0).unwrap();
        assert_eq!(schedule.output_fps(), FALLBACK_FPS);
        assert_eq!(schedule.output_len(100), 100);
    }

    #[test]
    fn schedule_rejects_out_of_range_rates() {
        assert!(FrameSchedule::new(30.0, 1e-20).is_err());
        assert!(FrameSchedule::new(30.0, 1e9).is_err());
        assert!(FrameSchedule::new(30.0, f64::NAN).is_err());
        // 0.1 fps source played at 1000 fps repeats each frame 10000 times.
        let err = FrameSchedule::new(0.1, 1000.0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfiguration);
        assert!(FrameSchedule::new(1.0, MAX_TICKS_PER_FRAME).is_ok());
    }

    #[test]
    fn absurd_native_rate_falls_back() {
        let schedule = FrameSchedule::new(1e-20, 0.0).unwrap();
        assert_eq!(schedule.output_fps(), FALLBACK_FPS);
        let schedule = FrameSchedule::new(1e12, 0.0).unwrap();
        assert_eq!(schedule.output_fps(), FALLBACK_FPS);
    }

    #[test]
    fn abort_after_emit_fails_the_pipeline() {
        let mut source = Frames { remaining: 3, fps: 25.0 };
        let renderer = TextRenderer::default();
        let layout = GridLayout::new((16, 8), 4, 0.5, None).unwrap();
        let mut pipeline = Pipeline::new(&mut source, &renderer, layout, FrameSchedule::new(25.0, 0.0).unwrap(), CancelToken::new());
        assert!(pipeline.next().unwrap().is_ok());
        pipeline.abort();
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(pipeline.next().is_none());
        assert_eq!(pipeline.frames_read(), 1);
        pipeline.complete();
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn end_of_stream_drains_then_completes() {
        let mut source = Frames { remaining: 1, fps: 25.0 };
        let renderer = TextRenderer::default();
        let layout = GridLayout::new((16, 8), 4, 0.5, None).unwrap();
        let mut pipeline = Pipeline::new(&mut source, &renderer, layout, FrameSchedule::new(25.0, 0.0).unwrap(), CancelToken::new());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.next().unwrap().is_ok());
        assert_eq!(pipeline.state(), PipelineState::Emitting);
        assert!(pipeline.next().is_none());
        assert_eq!(pipeline.state(), PipelineState::Draining);
        pipeline.complete();
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn cancel_before_start_reads_nothing() {
        let mut source = Frames { remaining: 5, fps: 25.0 };
        let renderer = TextRenderer::default();
        let layout = GridLayout::new((16, 8), 4, 0.5, None).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut pipeline = Pipeline::new(&mut source, &renderer, layout, FrameSchedule::new(25.0, 0.0).unwrap(), cancel);
        let err = pipeline.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(pipeline.frames_read(), 0);
        assert!(pipeline.next().is_none());
        drop(pipeline);
        assert_eq!(source.remaining, 5);
    }
}
