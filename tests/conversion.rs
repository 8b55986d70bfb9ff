use asciivid::frames::{ImageDirSink, ImageDirSource};
use asciivid::{
    CancelToken, ConversionJob, ErrorKind, FontSpec, FrameSink, FrameSource, GlyphRamp, JobOptions, ProgressPhase,
    TerminalSink,
};
use image::{Rgb, RgbImage};
use std::cell::RefCell;

struct Synthetic {
    width: u32,
    height: u32,
    fps: f64,
    frames: usize,
    shade: u8,
    reads: usize,
    fail_at: Option<usize>,
    resize_at: Option<usize>,
}

impl Synthetic {
    fn new(width: u32, height: u32, fps: f64, frames: usize) -> Self {
        Self { width, height, fps, frames, shade: 128, reads: 0, fail_at: None, resize_at: None }
    }
}

impl FrameSource for Synthetic {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        if self.reads >= self.frames {
            return Ok(None);
        }
        let index = self.reads;
        self.reads += 1;
        if self.fail_at == Some(index) {
            anyhow::bail!("corrupt packet");
        }
        let (w, h) = if self.resize_at == Some(index) { (self.width / 2, self.height) } else { (self.width, self.height) };
        Ok(Some(RgbImage::from_pixel(w, h, Rgb([self.shade; 3]))))
    }

    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.frames)
    }
}

#[derive(Default)]
struct Collect {
    frames: Vec<(u32, u32)>,
    finished: bool,
    cancel_after: Option<(usize, CancelToken)>,
    fail_at: Option<usize>,
}

impl FrameSink for Collect {
    fn write(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        if self.fail_at == Some(self.frames.len()) {
            anyhow::bail!("disk full");
        }
        self.frames.push(frame.dimensions());
        if let Some((n, token)) = &self.cancel_after {
            if self.frames.len() == *n {
                token.cancel();
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[derive(Default)]
struct Screen {
    frames: Vec<String>,
}

impl TerminalSink for Screen {
    fn write(&mut self, text: &str) -> anyhow::Result<()> {
        self.frames.push(text.to_string());
        Ok(())
    }
}

fn builtin_job(options: JobOptions) -> ConversionJob {
    ConversionJob::new(options.with_font(FontSpec::Builtin).with_font_size(8.0)).unwrap()
}

#[test]
fn mid_gray_frame_plays_as_one_character() {
    let job = ConversionJob::new(JobOptions::default().with_columns(40).with_font_ratio(Some(0.5))).unwrap();
    let mut source = Synthetic::new(320, 250, 1000.0, 1);
    let mut screen = Screen::default();

    let report = job.play(&mut source, &mut screen, &CancelToken::new()).unwrap();
    assert_eq!(report.frames_emitted, 1);

    let expected = GlyphRamp::default().glyph_for(128);
    let text = &screen.frames[0];
    for line in text.lines() {
        assert_eq!(line.chars().count(), 40);
        assert!(line.chars().all(|c| c == expected), "line {:?}", line);
    }
}

#[test]
fn padding_plays_as_spaces() {
    let job = ConversionJob::new(
        JobOptions::default()
            .with_columns(40)
            .with_font_ratio(Some(0.5))
            .with_max_rows(Some(10)),
    )
    .unwrap();
    let mut source = Synthetic::new(100, 400, 1000.0, 1);
    source.shade = 255;
    let mut screen = Screen::default();

    job.play(&mut source, &mut screen, &CancelToken::new()).unwrap();
    let lines: Vec<&str> = screen.frames[0].lines().collect();
    assert_eq!(lines.len(), 10);
    for line in lines {
        assert!(line.starts_with(' ') && line.ends_with(' '), "line {:?}", line);
        assert!(line.trim().chars().all(|c| c == GlyphRamp::default().glyph_for(255)));
    }
}

#[test]
fn cancel_stops_between_frames() {
    let job = builtin_job(JobOptions::default().with_columns(20));
    let mut source = Synthetic::new(160, 120, 30.0, 100);
    let cancel = CancelToken::new();
    let mut sink = Collect { cancel_after: Some((5, cancel.clone())), ..Default::default() };

    let plan = job.prepare_video(&source).unwrap();
    let err = job.export(plan, &mut source, &mut sink, &cancel, |_| {}).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.frame_index(), Some(5));
    assert_eq!(sink.frames.len(), 5);
    assert_eq!(source.reads, 5);
    assert!(!sink.finished);
}

#[test]
fn zero_columns_fail_before_reading() {
    let source = Synthetic::new(160, 120, 30.0, 10);
    let err = ConversionJob::new(JobOptions::default().with_columns(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert_eq!(source.reads, 0);
}

#[test]
fn missing_font_fails_before_reading() {
    let job = ConversionJob::new(
        JobOptions::default()
            .with_font(FontSpec::Path("/nonexistent/fonts/Nope.ttf".into()))
            .with_builtin_font_fallback(false),
    )
    .unwrap();
    let source = Synthetic::new(160, 120, 30.0, 10);
    let err = job.prepare_video(&source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FontUnavailable);
    assert_eq!(source.reads, 0);
}

#[test]
fn sink_failure_reports_frame_index() {
    let job = builtin_job(JobOptions::default().with_columns(20));
    let mut source = Synthetic::new(160, 120, 30.0, 10);
    let mut sink = Collect { fail_at: Some(3), ..Default::default() };

    let plan = job.prepare_video(&source).unwrap();
    let err = job.export(plan, &mut source, &mut sink, &CancelToken::new(), |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
    assert_eq!(err.frame_index(), Some(3));
    assert_eq!(source.reads, 4);
}

#[test]
fn decode_failure_reports_frame_index() {
    let job = builtin_job(JobOptions::default().with_columns(20));
    let mut source = Synthetic::new(160, 120, 30.0, 10);
    source.fail_at = Some(1);
    let mut sink = Collect::default();

    let plan = job.prepare_video(&source).unwrap();
    let err = job.export(plan, &mut source, &mut sink, &CancelToken::new(), |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceDecodeError);
    assert_eq!(err.frame_index(), Some(1));
    assert_eq!(sink.frames.len(), 1);
}

#[test]
fn size_change_mid_stream_is_a_decode_error() {
    let job = builtin_job(JobOptions::default().with_columns(20));
    let mut source = Synthetic::new(160, 120, 30.0, 10);
    source.resize_at = Some(2);
    let mut sink = Collect::default();

    let plan = job.prepare_video(&source).unwrap();
    let err = job.export(plan, &mut source, &mut sink, &CancelToken::new(), |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceDecodeError);
    assert_eq!(err.frame_index(), Some(2));
}

#[test]
fn halving_fps_halves_frames() {
    let job = builtin_job(JobOptions::default().with_columns(20).with_fps(15.0));
    let mut source = Synthetic::new(160, 120, 30.0, 10);
    let mut sink = Collect::default();
    let phases = RefCell::new(Vec::new());

    let plan = job.prepare_video(&source).unwrap();
    let dims = plan.frame_dimensions();
    let report = job
        .export(plan, &mut source, &mut sink, &CancelToken::new(), |p| phases.borrow_mut().push(p.phase))
        .unwrap();

    assert_eq!(report.frames_read, 10);
    assert_eq!(report.frames_emitted, 5);
    assert_eq!(report.output_fps, 15.0);
    assert_eq!(sink.frames.len(), 5);
    assert!(sink.finished);
    // Every frame has the same pixel size.
    assert!(sink.frames.iter().all(|&d| d == dims));

    let phases = phases.into_inner();
    assert_eq!(phases.first(), Some(&ProgressPhase::Preparing));
    assert_eq!(phases.last(), Some(&ProgressPhase::Complete));
}

#[test]
fn doubling_fps_repeats_frames() {
    let job = builtin_job(JobOptions::default().with_columns(20).with_fps(20.0));
    let mut source = Synthetic::new(160, 120, 10.0, 3);
    let mut sink = Collect::default();

    let plan = job.prepare_video(&source).unwrap();
    let report = job.export(plan, &mut source, &mut sink, &CancelToken::new(), |_| {}).unwrap();
    assert_eq!(report.frames_emitted, 6);
    assert_eq!(sink.frames.len(), 6);
}

#[test]
fn png_directory_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();
    for i in 0..3u8 {
        RgbImage::from_pixel(64, 48, Rgb([i * 100; 3]))
            .save(input.join(format!("f{:03}.png", i)))
            .unwrap();
    }

    let job = builtin_job(JobOptions::default().with_columns(16));
    let mut source = ImageDirSource::open(&input, 12.0).unwrap();
    let plan = job.prepare_video(&source).unwrap();
    let (w, h) = plan.frame_dimensions();

    let output = dir.path().join("out");
    let mut sink = ImageDirSink::create(&output).unwrap();
    let report = job.export(plan, &mut source, &mut sink, &CancelToken::new(), |_| {}).unwrap();
    assert_eq!(report.frames_emitted, 3);

    let written = image::open(output.join("frame_00002.png")).unwrap().to_rgb8();
    assert_eq!(written.dimensions(), (w, h));
    // The darkest frame maps to the first ramp glyph, which still draws pixels.
    let first = image::open(output.join("frame_00000.png")).unwrap().to_rgb8();
    assert_eq!(first.dimensions(), (w, h));
    assert!(first.pixels().any(|p| p.0 != [0, 0, 0]));
}

#[test]
fn portrait_plays_with_side_padding_by_default() {
    let job = ConversionJob::new(JobOptions::default().with_columns(40)).unwrap();
    let mut source = Synthetic::new(90, 160, 1000.0, 1);
    source.shade = 255;
    let mut screen = Screen::default();

    job.play(&mut source, &mut screen, &CancelToken::new()).unwrap();
    let lines: Vec<&str> = screen.frames[0].lines().collect();
    assert_eq!(lines.len(), 17);
    let bright = GlyphRamp::default().glyph_for(255);
    for line in lines {
        assert_eq!(line.chars().count(), 40);
        assert!(line.starts_with(' ') && line.ends_with(' '), "line {:?}", line);
        let body = line.trim();
        assert!(!body.is_empty() && body.chars().all(|c| c == bright), "line {:?}", line);
    }
}

#[test]
fn unrepresentable_fps_is_rejected_up_front() {
    for fps in [1e-20, 1e9, f64::NAN, -5.0] {
        let err = ConversionJob::new(JobOptions::default().with_fps(fps)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration, "fps {}", fps);
    }

    // 1 fps source asked for 500 fps would repeat every frame 500 times.
    let job = builtin_job(JobOptions::default().with_columns(20).with_fps(500.0));
    let source = Synthetic::new(160, 120, 1.0, 10);
    let err = job.prepare_video(&source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert_eq!(source.reads, 0);
}
