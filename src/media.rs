//! ffmpeg-backed collaborators: probing, decoding to raw frames, encoding
//! raw frames, and muxing the source audio back in.
//!
//! Requires `ffmpeg` and `ffprobe` on PATH at runtime.

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcCommand, Stdio};
use std::thread::{self, JoinHandle};

use crate::pipeline::{FrameSink, FrameSource};
use crate::preprocessing::source_filter_chain;

/// Stream metadata reported by ffprobe.
///
/// `width` and `height` are the displayed size: ffmpeg applies the stream's
/// rotation while decoding, so a quarter turn swaps the stored dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Display rotation in degrees as the stream reports it, normalised to
    /// `0..360`.
    pub rotation: u32,
    pub fps: f64,
    /// Frame count, when the container records it.
    pub frames: Option<usize>,
}

/// Queries ffprobe for the first video stream of `path`.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    let output = ProcCommand::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames:stream_tags=rotate:stream_side_data=rotation",
        ])
        .args(["-of", "default=noprint_wrappers=1"])
        .arg(path)
        .stderr(Stdio::piped())
        .output()
        .context("running ffprobe (is it installed and on PATH?)")?;

    if !output.status.success() {
        bail!("ffprobe failed on {}: {}", path.display(), String::from_utf8_lossy(&output.stderr).trim());
    }
    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("reading stream info of {}", path.display()))?;
    log::info!(
        "probe: {}x{} @ {:.3} fps, rotation {} ({})",
        info.width,
        info.height,
        info.fps,
        info.rotation,
        path.display()
    );
    Ok(info)
}

fn parse_rate(value: &str) -> Option<f64> {
    let mut parts = value.splitn(2, '/');
    let num: f64 = parts.next()?.trim().parse().ok()?;
    let den: f64 = match parts.next() {
        Some(d) => d.trim().parse().ok()?,
        None => 1.0,
    };
    (den > 0.0).then(|| num / den)
}

pub(crate) fn parse_probe_output(text: &str) -> Result<VideoInfo> {
    let mut width = None;
    let mut height = None;
    let mut fps = 0.0;
    let mut frames = None;
    let mut rotation = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "width" => width = value.trim().parse().ok(),
            "height" => height = value.trim().parse().ok(),
            "r_frame_rate" => fps = parse_rate(value).unwrap_or(0.0),
            "nb_frames" => frames = value.trim().parse().ok(),
            // Display-matrix side data wins over the legacy rotate tag.
            "rotation" => rotation = value.trim().parse::<f64>().ok().or(rotation),
            "TAG:rotate" => rotation = rotation.or_else(|| value.trim().parse::<f64>().ok()),
            _ => {}
        }
    }

    // Any quarter turn swaps the axes of the decoded frames.
    let rotation = rotation.map(|r| (r.round() as i64).rem_euclid(360) as u32).unwrap_or(0);
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            let (width, height) = if rotation % 180 == 90 { (h, w) } else { (w, h) };
            Ok(VideoInfo { width, height, rotation, fps, frames })
        }
        _ => Err(anyhow!("no video stream found")),
    }
}

pub(crate) fn decode_args(input: &Path, filter: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec!["-loglevel".into(), "error".into(), "-i".into(), input.display().to_string()];
    if let Some(vf) = source_filter_chain(filter) {
        args.push("-vf".into());
        args.push(vf);
    }
    args.extend(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"].map(String::from));
    args
}

/// Decodes a video file into RGB frames through an ffmpeg pipe.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
    frame_len: usize,
    finished: bool,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSource {
    /// `filter` is an ffmpeg filter chain applied before frames are read; it
    /// must not change the frame size.
    pub fn open(path: &Path, info: &VideoInfo, filter: Option<&str>) -> Result<Self> {
        let mut child = ProcCommand::new("ffmpeg")
            .args(decode_args(path, filter))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("running ffmpeg (is it installed and on PATH?)")?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("ffmpeg stdout unavailable"))?;
        let stderr = drain_stderr(&mut child);

        Ok(Self {
            child,
            stdout,
            info: *info,
            frame_len: info.width as usize * info.height as usize * 3,
            finished: false,
            stderr,
        })
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stdout.read(&mut buf[filled..]).context("reading ffmpeg output")?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().context("waiting for ffmpeg")?;
        let stderr = collected(self.stderr.take());
        if !status.success() {
            bail!("ffmpeg decoder failed: {}", stderr.trim());
        }
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.frame_len];
        let filled = self.fill(&mut buf)?;
        if filled < self.frame_len {
            self.finished = true;
            if filled > 0 {
                log::warn!("dropping truncated last frame ({} of {} bytes)", filled, self.frame_len);
            }
            self.wait()?;
            return Ok(None);
        }
        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.info.width, self.info.height))
    }

    fn native_fps(&self) -> f64 {
        self.info.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn len_hint(&self) -> Option<usize> {
        self.info.frames
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Container and encoder settings for one output attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub extension: &'static str,
    pub codec: &'static str,
    pub args: &'static [&'static str],
}

/// Output attempts in order of preference.
pub const DEFAULT_PROFILES: &[EncoderProfile] = &[
    EncoderProfile { extension: "mp4", codec: "libx264", args: &["-pix_fmt", "yuv420p", "-crf", "18"] },
    EncoderProfile { extension: "mp4", codec: "mpeg4", args: &["-pix_fmt", "yuv420p", "-q:v", "3"] },
    EncoderProfile { extension: "avi", codec: "mjpeg", args: &["-pix_fmt", "yuvj420p", "-q:v", "3"] },
];

pub(crate) fn encode_args(output: &Path, (width, height): (u32, u32), fps: f64, profile: &EncoderProfile) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"]
        .map(String::from)
        .to_vec();
    args.extend(["-s".to_string(), format!("{}x{}", width, height)]);
    args.extend(["-r".to_string(), format!("{}", fps)]);
    args.extend(["-i", "-", "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2", "-c:v", profile.codec].map(String::from));
    args.extend(profile.args.iter().map(|a| a.to_string()));
    args.push(output.display().to_string());
    args
}

/// Encodes raw RGB frames through an ffmpeg pipe.
///
/// Odd frame sizes are padded to even ones, which most encoders require.
pub struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSink {
    pub fn spawn(path: &Path, dimensions: (u32, u32), fps: f64, profile: &EncoderProfile) -> Result<Self> {
        let mut child = ProcCommand::new("ffmpeg")
            .args(encode_args(path, dimensions, fps, profile))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("running ffmpeg encoder (is it installed and on PATH?)")?;
        let stdin = child.stdin.take();
        let stderr = drain_stderr(&mut child);
        Ok(Self { child, stdin, path: path.to_path_buf(), stderr })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for FfmpegSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| anyhow!("encoder input already closed"))?;
        stdin.write_all(frame.as_raw()).context("writing frame to ffmpeg")
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait().context("waiting for ffmpeg encoder")?;
        let stderr = collected(self.stderr.take());
        if !status.success() {
            bail!("ffmpeg encoder failed for {}: {}", self.path.display(), stderr.trim());
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            drop(self.stdin.take());
            let _ = self.child.wait();
        }
    }
}

/// Reads the child's stderr on its own thread so a chatty ffmpeg never
/// blocks on a full pipe while we are busy with stdin or stdout.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut err = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut text = String::new();
        let _ = err.read_to_string(&mut text);
        text
    }))
}

fn collected(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

pub(crate) fn parse_encoders(text: &str) -> HashSet<String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6 && flags.starts_with('V')).then(|| name.to_string())
        })
        .collect()
}

fn available_encoders() -> Result<HashSet<String>> {
    let output = ProcCommand::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stderr(Stdio::null())
        .output()
        .context("running ffmpeg (is it installed and on PATH?)")?;
    Ok(parse_encoders(&String::from_utf8_lossy(&output.stdout)))
}

/// Opens the first output the local ffmpeg can encode, trying profiles in
/// order (MP4/H.264, MP4/MPEG-4, then AVI/MJPEG).
#[derive(Debug, Clone)]
pub struct SinkFactory {
    profiles: Vec<EncoderProfile>,
}

impl Default for SinkFactory {
    fn default() -> Self {
        Self { profiles: DEFAULT_PROFILES.to_vec() }
    }
}

impl SinkFactory {
    pub fn new(profiles: Vec<EncoderProfile>) -> Self {
        Self { profiles }
    }

    /// Returns the opened sink and the path it writes to, which carries the
    /// chosen profile's extension.
    pub fn open(&self, output: &Path, dimensions: (u32, u32), fps: f64) -> Result<(FfmpegSink, PathBuf)> {
        let encoders = available_encoders()?;
        for profile in &self.profiles {
            if !encoders.contains(profile.codec) {
                log::warn!("encoder {} unavailable, trying next", profile.codec);
                continue;
            }
            let path = output.with_extension(profile.extension);
            match FfmpegSink::spawn(&path, dimensions, fps, profile) {
                Ok(sink) => {
                    log::info!("writing {} with {}", path.display(), profile.codec);
                    return Ok((sink, path));
                }
                Err(e) => log::warn!("could not start {} encoder: {:#}", profile.codec, e),
            }
        }
        Err(anyhow!("no usable video encoder among {} candidates", self.profiles.len()))
    }
}

/// Path of the audio-merged copy of `video`: `<stem>_with_audio.mp4`.
pub fn audio_output_path(video: &Path) -> PathBuf {
    let stem = video.file_stem().and_then(|s| s.to_str()).unwrap_or("ascii_out");
    video.with_file_name(format!("{}_with_audio.mp4", stem))
}

pub(crate) fn merge_args(video: &Path, audio_source: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    args.extend(["-i".to_string(), video.display().to_string()]);
    args.extend(["-i".to_string(), audio_source.display().to_string()]);
    args.extend(["-c:v", "copy", "-map", "0:v:0", "-map", "1:a:0", "-shortest"].map(String::from));
    args.push(output.display().to_string());
    args
}

/// Copies the video stream of `video` and the first audio stream of
/// `audio_source` into `output`.
pub fn merge_audio(video: &Path, audio_source: &Path, output: &Path) -> Result<()> {
    let result = ProcCommand::new("ffmpeg")
        .args(merge_args(video, audio_source, output))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .context("running ffmpeg for audio merge")?;

    if !result.status.success() {
        bail!("ffmpeg audio merge failed: {}", String::from_utf8_lossy(&result.stderr).trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_larger_than_a_pipe_does_not_stall_the_child() {
        // 256 KiB on stderr, then block until stdin closes.
        let mut child = ProcCommand::new("sh")
            .args(["-c", "head -c 262144 /dev/zero | tr '\\0' x >&2; cat >/dev/null; exit 3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let handle = drain_stderr(&mut child);
        drop(child.stdin.take());
        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(collected(handle).len(), 262144);
    }

    #[test]
    fn parses_ffprobe_output() {
        let info = parse_probe_output("width=1920\nheight=1080\nr_frame_rate=30000/1001\nnb_frames=240\n").unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.frames, Some(240));
    }

    #[test]
    fn probe_output_tolerates_missing_counts() {
        let info = parse_probe_output("width=640\nheight=480\nr_frame_rate=0/0\nnb_frames=N/A\n").unwrap();
        assert_eq!(info.fps, 0.0);
        assert_eq!(info.frames, None);
        assert!(parse_probe_output("r_frame_rate=25/1\n").is_err());
    }

    #[test]
    fn quarter_turn_swaps_decoded_size() {
        let phone = "width=1920\nheight=1080\nr_frame_rate=30/1\nside_data_type=Display Matrix\nrotation=-90\n";
        let info = parse_probe_output(phone).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
        assert_eq!(info.rotation, 270);

        let tagged = parse_probe_output("width=640\nheight=480\nTAG:rotate=90\n").unwrap();
        assert_eq!((tagged.width, tagged.height), (480, 640));

        let flipped = parse_probe_output("width=640\nheight=480\nrotation=180\n").unwrap();
        assert_eq!((flipped.width, flipped.height), (640, 480));
        assert_eq!(parse_probe_output("width=640\nheight=480\n").unwrap().rotation, 0);
    }

    #[test]
    fn decode_args_put_filter_before_raw_output() {
        let args = decode_args(Path::new("in.mp4"), Some("format=gray"));
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "format=gray,format=rgb24");
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"rgb24".to_string()));
        assert!(!decode_args(Path::new("in.mp4"), None).contains(&"-vf".to_string()));
    }

    #[test]
    fn encode_args_describe_raw_input() {
        let args = encode_args(Path::new("out.mp4"), (641, 480), 15.0, &DEFAULT_PROFILES[0]);
        let s = args.iter().position(|a| a == "-s").unwrap();
        assert_eq!(args[s + 1], "641x480");
        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "15");
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn parses_encoder_listing() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264              H.264\n A....D aac                  AAC\n V....D mjpeg                MJPEG\n";
        let encoders = parse_encoders(listing);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("mjpeg"));
        assert!(!encoders.contains("aac"));
    }

    #[test]
    fn merge_maps_video_then_audio() {
        let args = merge_args(Path::new("a.mp4"), Path::new("src.mov"), Path::new("a_with_audio.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i a.mp4 -i src.mov"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0 -shortest"));
    }

    #[test]
    fn audio_output_sits_next_to_video() {
        assert_eq!(
            audio_output_path(Path::new("/tmp/out/ascii.avi")),
            PathBuf::from("/tmp/out/ascii_with_audio.mp4")
        );
    }
}
