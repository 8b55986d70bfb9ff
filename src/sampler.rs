//! Frame sampling: reduces a source frame to one luminance value per
//! character cell.
//!
//! The sampling geometry ([`GridLayout`]) depends only on the source
//! dimensions and the job options, so it is computed once per job and reused
//! for every frame.

use image::RgbImage;
use rayon::prelude::*;

use crate::error::{ConvertError, Result};

/// Cell width / cell height used for terminal output when nothing better is
/// known. Terminal cells are a little more than twice as tall as wide.
pub const DEFAULT_CELL_ASPECT: f32 = 0.43;

/// Rectangle of grid cells, in cell units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.left && col < self.left + self.width && row >= self.top && row < self.top + self.height
    }
}

/// Half-open pixel range `[start, end)` in source coordinates. May extend
/// past the source edges when the cell lies in the padding border.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: i64,
    end: i64,
}

impl Span {
    fn clipped(&self, limit: u32) -> std::ops::Range<u32> {
        let start = self.start.clamp(0, limit as i64) as u32;
        let end = self.end.clamp(0, limit as i64) as u32;
        start..end
    }

    /// At least half of the span lies inside `0..limit`.
    fn mostly_inside(&self, limit: u32) -> bool {
        let inside = self.clipped(limit).len() as i64;
        inside > 0 && inside * 2 >= self.end - self.start
    }
}

fn spans(count: u32, tile: f64, origin: f64) -> Vec<Span> {
    (0..count)
        .map(|i| {
            let start = (origin + i as f64 * tile).round() as i64;
            let end = ((origin + (i + 1) as f64 * tile).round() as i64).max(start + 1);
            Span { start, end }
        })
        .collect()
}

fn content_range(spans: &[Span], limit: u32) -> (u32, u32) {
    let first = spans.iter().position(|s| s.mostly_inside(limit)).unwrap_or(0);
    let count = spans.iter().filter(|s| s.mostly_inside(limit)).count();
    (first as u32, count as u32)
}

/// Default row cap for portrait sources: the rows of a square canvas.
fn portrait_row_bound((src_w, src_h): (u32, u32), cols: u32, aspect: f64) -> Option<u32> {
    (src_h > src_w).then(|| ((cols as f64 * aspect).round() as u32).max(1))
}

/// Sampling geometry for one source size.
///
/// The grid is `cols` wide. Its row count follows the source aspect ratio
/// corrected for the cell aspect, rounded up, or `max_rows` when the frame
/// would be taller than that. Portrait sources without `max_rows` are capped
/// at the rows of a square canvas, so they are pillarboxed instead of
/// growing a tall grid. The cell canvas is centred over the source; cells
/// lying mostly beyond the source edges are black padding.
#[derive(Debug, Clone)]
pub struct GridLayout {
    cols: u32,
    rows: u32,
    source: (u32, u32),
    col_spans: Vec<Span>,
    row_spans: Vec<Span>,
    content: CellRect,
}

impl GridLayout {
    /// `cell_aspect` is cell width divided by cell height.
    pub fn new(source: (u32, u32), cols: u32, cell_aspect: f32, max_rows: Option<u32>) -> Result<Self> {
        let (src_w, src_h) = source;
        if cols == 0 {
            return Err(ConvertError::config("cols must be greater than zero"));
        }
        if src_w == 0 || src_h == 0 {
            return Err(ConvertError::config(format!("source frame is empty ({}x{})", src_w, src_h)));
        }
        if !cell_aspect.is_finite() || cell_aspect <= 0.0 {
            return Err(ConvertError::config(format!("cell aspect must be positive, got {}", cell_aspect)));
        }
        if max_rows == Some(0) {
            return Err(ConvertError::config("max rows must be greater than zero"));
        }

        let aspect = cell_aspect as f64;
        let mut tile_w = src_w as f64 / cols as f64;
        let mut tile_h = tile_w / aspect;
        let exact_rows = src_h as f64 / tile_h;
        let mut rows = ((exact_rows - 1e-9).ceil() as u32).max(1);

        if let Some(limit) = max_rows.or_else(|| portrait_row_bound(source, cols, aspect)) {
            if rows > limit {
                rows = limit;
                tile_h = src_h as f64 / rows as f64;
                tile_w = tile_h * aspect;
            }
        }

        let origin_x = (src_w as f64 - cols as f64 * tile_w) / 2.0;
        let origin_y = (src_h as f64 - rows as f64 * tile_h) / 2.0;
        let col_spans = spans(cols, tile_w, origin_x);
        let row_spans = spans(rows, tile_h, origin_y);

        let (left, width) = content_range(&col_spans, src_w);
        let (top, height) = content_range(&row_spans, src_h);

        log::debug!(
            "grid layout: source {}x{} -> {}x{} cells (exact rows {:.2}), content {}x{} at ({}, {})",
            src_w,
            src_h,
            cols,
            rows,
            exact_rows,
            width,
            height,
            left,
            top
        );

        Ok(Self {
            cols,
            rows,
            source,
            col_spans,
            row_spans,
            content: CellRect { left, top, width, height },
        })
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn source_dimensions(&self) -> (u32, u32) {
        self.source
    }

    /// Cells that overlap at least one source pixel.
    pub fn content(&self) -> CellRect {
        self.content
    }

    /// Area-averages `frame` into one luminance value per cell.
    ///
    /// Only the part of a cell that lies inside the frame is averaged;
    /// padding cells read as black. The frame is expected to match
    /// [`source_dimensions`](Self::source_dimensions).
    pub fn sample(&self, frame: &RgbImage) -> LuminanceGrid {
        let (w, h) = frame.dimensions();
        let luma: Vec<u8> = frame.pixels().map(|p| luminance(*p)).collect();
        let cols = self.cols as usize;

        let mut values = vec![0u8; cols * self.rows as usize];
        values
            .par_chunks_mut(cols)
            .zip(self.row_spans.par_iter())
            .enumerate()
            .for_each(|(row, (out_row, row_span))| {
                let ys = row_span.clipped(h);
                for (col, (out, col_span)) in out_row.iter_mut().zip(&self.col_spans).enumerate() {
                    if !self.content.contains(col as u32, row as u32) {
                        continue;
                    }
                    let xs = col_span.clipped(w);
                    let mut sum = 0u64;
                    for y in ys.clone() {
                        let line = &luma[(y * w) as usize..((y + 1) * w) as usize];
                        sum += line[xs.start as usize..xs.end as usize].iter().map(|&v| v as u64).sum::<u64>();
                    }
                    let area = xs.len() as u64 * ys.len() as u64;
                    if area > 0 {
                        *out = ((sum + area / 2) / area) as u8;
                    }
                }
            });

        LuminanceGrid {
            cols: self.cols,
            rows: self.rows,
            values,
            content: self.content,
        }
    }
}

/// Samples a single frame without keeping the layout around.
pub fn sample_frame(frame: &RgbImage, cols: u32, cell_aspect: f32, max_rows: Option<u32>) -> Result<LuminanceGrid> {
    let layout = GridLayout::new(frame.dimensions(), cols, cell_aspect, max_rows)?;
    Ok(layout.sample(frame))
}

/// One luminance value in `0..=255` per output cell, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuminanceGrid {
    cols: u32,
    rows: u32,
    values: Vec<u8>,
    content: CellRect,
}

impl LuminanceGrid {
    /// Builds a grid with no padding from raw row-major values.
    pub fn from_values(cols: u32, rows: u32, values: Vec<u8>) -> Result<Self> {
        if cols == 0 || rows == 0 || values.len() != cols as usize * rows as usize {
            return Err(ConvertError::config(format!(
                "{} luminance values do not fill a {}x{} grid",
                values.len(),
                cols,
                rows
            )));
        }
        Ok(Self {
            cols,
            rows,
            values,
            content: CellRect { left: 0, top: 0, width: cols, height: rows },
        })
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn get(&self, col: u32, row: u32) -> u8 {
        self.values[(row * self.cols + col) as usize]
    }

    pub fn is_padding(&self, col: u32, row: u32) -> bool {
        !self.content.contains(col, row)
    }

    pub fn content(&self) -> CellRect {
        self.content
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }
}

/// Rec. 709 luma, rounded.
pub(crate) fn luminance(rgb: image::Rgb<u8>) -> u8 {
    let r = rgb[0] as u32;
    let g = rgb[1] as u32;
    let b = rgb[2] as u32;
    ((2126 * r + 7152 * g + 722 * b + 5000) / 10000) as u8
}
