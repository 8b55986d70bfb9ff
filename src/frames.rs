//! Image-sequence source and sink: a directory of numbered frames.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::pipeline::{FrameSink, FrameSource};

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Reads `*.png` / `*.jpg` files from one directory in file-name order.
///
/// Every image must match the size of the first one.
pub struct ImageDirSource {
    frames: Vec<PathBuf>,
    next: usize,
    fps: f64,
    dimensions: (u32, u32),
}

impl ImageDirSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        let mut frames: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| is_frame_file(p))
            .collect();
        frames.sort();

        let first = frames
            .first()
            .ok_or_else(|| anyhow!("no png or jpg frames in {}", dir.display()))?;
        let dimensions = image::image_dimensions(first).with_context(|| format!("reading {}", first.display()))?;
        log::debug!("{} frames of {}x{} in {}", frames.len(), dimensions.0, dimensions.1, dir.display());

        Ok(Self { frames, next: 0, fps, dimensions })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        Ok(Some(img.to_rgb8()))
    }

    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }
}

/// Writes frames as `frame_00000.png`, `frame_00001.png`, ... into a directory.
pub struct ImageDirSink {
    dir: PathBuf,
    written: usize,
}

impl ImageDirSink {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf(), written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for ImageDirSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{:05}.png", self.written));
        frame.save(&path).with_context(|| format!("writing {}", path.display()))?;
        self.written += 1;
        Ok(())
    }
}
