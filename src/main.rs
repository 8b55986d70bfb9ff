use anyhow::{anyhow, bail, Context, Result};
use asciivid::frames::{ImageDirSink, ImageDirSource};
use asciivid::media::{self, FfmpegSource, SinkFactory};
use asciivid::preprocessing::{resolve_preprocess_filter, PREPROCESS_PRESETS};
use asciivid::terminal::AnsiTerminal;
use asciivid::{
    ramp, AppConfig, CancelToken, ConversionJob, ConvertError, ErrorKind, FontSpec, ForegroundMode, FrameSink,
    FrameSource, JobOptions, JobReport, OutputMode, Progress, ProgressPhase,
};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::from_file(path);
    }

    // App data dir first, then the working directory, then built-in defaults
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("asciivid");
        tried.push(d.join("config.json"));
        tried.push(d.join("config.toml"));
    }
    tried.push(PathBuf::from("asciivid.json"));
    tried.push(PathBuf::from("asciivid.toml"));

    for p in &tried {
        if p.exists() {
            log::debug!("using config {}", p.display());
            return AppConfig::from_file(p);
        }
    }
    Ok(AppConfig::default())
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Draw frames in this terminal
    Play,
    /// Render frames into a video file
    Save,
}

fn parse_rgb(s: &str) -> Result<[u8; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected R,G,B, got '{}'", s));
    }
    let mut rgb = [0u8; 3];
    for (slot, part) in rgb.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|_| format!("'{}' is not a value in 0-255", part))?;
    }
    Ok(rgb)
}

#[derive(Parser, Debug)]
#[command(version, about = "Play or render videos as ASCII art.")]
struct Args {
    /// Input video file or directory of png/jpg frames
    input: Option<PathBuf>,

    /// Play in the terminal or save a rendered video
    #[arg(long, value_enum, default_value_t = Mode::Play)]
    mode: Mode,

    /// Output video path (save mode). Defaults to <input>_ascii.mp4
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write numbered png frames into the output directory instead of a video
    #[arg(long, default_value_t = false)]
    png_frames: bool,

    /// Named preset from the config file
    #[arg(long)]
    preset: Option<String>,

    /// Config file (.json or .toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Characters per row
    #[arg(long)]
    cols: Option<u32>,

    /// Output frames per second (0 keeps the source rate)
    #[arg(long)]
    fps: Option<f64>,

    /// Frame rate assumed for a directory of frames
    #[arg(long, default_value_t = 24.0)]
    input_fps: f64,

    /// Glyph size in pixels (save mode)
    #[arg(long)]
    font_size: Option<f32>,

    /// Character cell width:height ratio used for sampling
    #[arg(long)]
    font_ratio: Option<f32>,

    /// TrueType/OpenType font file (save mode)
    #[arg(long, conflicts_with = "builtin_font")]
    font: Option<PathBuf>,

    /// Use the built-in bitmap font
    #[arg(long, default_value_t = false)]
    builtin_font: bool,

    /// Fail instead of falling back to the built-in font
    #[arg(long, default_value_t = false)]
    no_font_fallback: bool,

    /// Ramp name (classic, standard, detailed) or literal characters, darkest first
    #[arg(long)]
    ramp: Option<String>,

    /// Cap on rows; taller sources are pillarboxed
    #[arg(long)]
    max_rows: Option<u32>,

    /// Glyph colour as R,G,B
    #[arg(long, value_parser = parse_rgb)]
    fg: Option<[u8; 3]>,

    /// Scale the glyph colour by cell brightness
    #[arg(long, default_value_t = false)]
    shaded: bool,

    /// Copy the source audio into <output>_with_audio.mp4
    #[arg(long, default_value_t = false)]
    merge_audio: bool,

    /// Custom ffmpeg filter chain applied before sampling
    #[arg(long, conflicts_with = "preprocess_preset")]
    preprocess: Option<String>,

    /// Named preprocessing filter
    #[arg(long)]
    preprocess_preset: Option<String>,

    /// List preprocessing presets and exit
    #[arg(long, default_value_t = false)]
    list_preprocess_presets: bool,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn options(&self, config: &AppConfig) -> Result<JobOptions> {
        let preset = self.preset.as_deref().unwrap_or(&config.default_preset);
        let mut options = config.options_from_preset(preset)?;

        if let Some(cols) = self.cols {
            options = options.with_columns(cols);
        }
        if let Some(fps) = self.fps {
            options = options.with_fps(fps);
        }
        if let Some(size) = self.font_size {
            options = options.with_font_size(size);
        }
        if self.font_ratio.is_some() {
            options = options.with_font_ratio(self.font_ratio);
        }
        if let Some(r) = &self.ramp {
            options = options.with_ramp(ramp::named(r).map(str::to_string).unwrap_or_else(|| r.clone()));
        }
        if let Some(path) = &self.font {
            options = options.with_font(FontSpec::Path(path.clone()));
        } else if self.builtin_font {
            options = options.with_font(FontSpec::Builtin);
        }
        let fg_mode = if self.shaded { ForegroundMode::Shaded } else { ForegroundMode::Solid };
        let fg = self.fg.unwrap_or(options.foreground);

        Ok(options
            .with_max_rows(self.max_rows)
            .with_builtin_font_fallback(!self.no_font_fallback)
            .with_foreground(fg, fg_mode)
            .with_merge_audio(self.merge_audio)
            .with_mode(match self.mode {
                Mode::Play => OutputMode::Terminal,
                Mode::Save => OutputMode::Video,
            }))
    }
}

fn open_source(input: &Path, args: &Args, filter: Option<&str>) -> Result<Box<dyn FrameSource>> {
    if input.is_dir() {
        if filter.is_some() {
            bail!("preprocessing filters need a video input, not a frame directory");
        }
        return Ok(Box::new(ImageDirSource::open(input, args.input_fps)?));
    }
    if !input.exists() {
        bail!("input {} does not exist", input.display());
    }
    let info = media::probe(input)?;
    Ok(Box::new(FfmpegSource::open(input, &info, filter)?))
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("ascii");
    input.with_file_name(format!("{}_ascii.mp4", stem))
}

/// Cancellation is a normal way to stop; anything else is a failure.
fn finish_run(result: asciivid::error::Result<JobReport>) -> Result<Option<JobReport>> {
    match result {
        Ok(report) => Ok(Some(report)),
        Err(ConvertError::Cancelled { emitted }) => {
            println!("Cancelled after {} frames.", emitted);
            Ok(None)
        }
        Err(e) => Err(explain(e)),
    }
}

fn explain(e: ConvertError) -> anyhow::Error {
    if e.kind() == ErrorKind::FontUnavailable {
        log::error!("try --builtin-font or --font <path>");
    }
    e.into()
}

fn play(job: &ConversionJob, source: &mut dyn FrameSource, cancel: &CancelToken) -> Result<()> {
    let result = {
        let mut terminal = AnsiTerminal::stdout()?;
        job.play(source, &mut terminal, cancel)
    };
    if let Some(report) = finish_run(result)? {
        log::info!("played {} frames at {:.2} fps", report.frames_emitted, report.output_fps);
    }
    Ok(())
}

fn save(job: &ConversionJob, args: &Args, input: &Path, source: &mut dyn FrameSource, cancel: &CancelToken) -> Result<()> {
    let plan = job.prepare_video(&*source).map_err(explain)?;
    let requested = args.output.clone().unwrap_or_else(|| default_output(input));
    let (width, height) = plan.frame_dimensions();

    let (mut sink, written): (Box<dyn FrameSink>, PathBuf) = if args.png_frames {
        (Box::new(ImageDirSink::create(&requested)?), requested.clone())
    } else {
        let (sink, path) = SinkFactory::default().open(&requested, (width, height), plan.output_fps())?;
        (Box::new(sink), path)
    };
    println!(
        "Rendering {}x{} cells into {}x{} frames at {:.2} fps -> {}",
        plan.grid().0,
        plan.grid().1,
        width,
        height,
        plan.output_fps(),
        written.display()
    );

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .map_err(|e| anyhow!("progress template: {}", e))?
            .progress_chars("#>-"),
    );
    let result = job.export(plan, source, &mut sink, cancel, |p: Progress| match p.phase {
        ProgressPhase::Preparing => pb.set_message(p.message),
        ProgressPhase::Rendering => {
            pb.set_length(p.total as u64);
            pb.set_position(p.completed as u64);
        }
        ProgressPhase::Complete => pb.finish_with_message("Done"),
    });
    if result.is_err() {
        pb.abandon();
    }
    drop(sink);

    let Some(report) = finish_run(result)? else {
        return Ok(());
    };
    println!("Wrote {} frames to {}", report.frames_emitted, written.display());

    if job.options().merge_audio {
        if args.png_frames || input.is_dir() {
            log::warn!("--merge-audio needs a video input and video output; skipped");
        } else {
            let merged = media::audio_output_path(&written);
            media::merge_audio(&written, input, &merged)
                .with_context(|| format!("merging audio into {}", merged.display()))?;
            println!("Audio merged into {}", merged.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    if args.list_preprocess_presets {
        for preset in PREPROCESS_PRESETS {
            println!("{:<16} {}", preset.name, preset.description);
        }
        return Ok(());
    }

    let input = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("an input video or frame directory is required"))?;
    let config = load_config(args.config.as_deref())?;
    let job = ConversionJob::new(args.options(&config)?)?;
    let filter = resolve_preprocess_filter(args.preprocess.as_deref(), args.preprocess_preset.as_deref())?;

    let cancel = CancelToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || token.cancel()).context("installing Ctrl-C handler")?;

    let mut source = open_source(&input, &args, filter.as_deref())?;
    match job.options().mode {
        OutputMode::Terminal => play(&job, source.as_mut(), &cancel),
        OutputMode::Video => save(&job, &args, &input, source.as_mut(), &cancel),
    }
}
