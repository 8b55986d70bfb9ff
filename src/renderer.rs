//! Turns luminance grids into text blocks or rasterized frames.

use image::RgbImage;
use rayon::prelude::*;

use crate::font::GlyphAtlas;
use crate::ramp::GlyphRamp;
use crate::sampler::LuminanceGrid;

/// Default glyph colour for rasterized output.
pub const DEFAULT_FOREGROUND: [u8; 3] = [230, 230, 230];

/// A character choice for one grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphCell {
    pub ch: char,
    pub intensity: u8,
}

impl GlyphCell {
    pub const PADDING: GlyphCell = GlyphCell { ch: ' ', intensity: 0 };
}

/// Quantizes a grid against `ramp`. Padding cells become blanks.
pub fn glyph_cells(grid: &LuminanceGrid, ramp: &GlyphRamp) -> Vec<GlyphCell> {
    let mut cells = Vec::with_capacity(grid.values().len());
    for row in 0..grid.rows() {
        for col in 0..grid.cols() {
            cells.push(cell_at(grid, ramp, col, row));
        }
    }
    cells
}

fn cell_at(grid: &LuminanceGrid, ramp: &GlyphRamp, col: u32, row: u32) -> GlyphCell {
    if grid.is_padding(col, row) {
        return GlyphCell::PADDING;
    }
    let luma = grid.get(col, row);
    GlyphCell { ch: ramp.glyph_for(luma), intensity: luma }
}

/// Something that turns a luminance grid into an output frame.
pub trait Render {
    type Output;

    fn render(&self, grid: &LuminanceGrid) -> Self::Output;
}

/// Terminal path: one line of glyphs per grid row.
#[derive(Debug, Clone, Default)]
pub struct TextRenderer {
    ramp: GlyphRamp,
}

impl TextRenderer {
    pub fn new(ramp: GlyphRamp) -> Self {
        Self { ramp }
    }
}

impl Render for TextRenderer {
    type Output = String;

    fn render(&self, grid: &LuminanceGrid) -> String {
        let mut out = String::with_capacity((grid.cols() as usize + 1) * grid.rows() as usize);
        for row in 0..grid.rows() {
            if row > 0 {
                out.push('\n');
            }
            for col in 0..grid.cols() {
                out.push(cell_at(grid, &self.ramp, col, row).ch);
            }
        }
        out
    }
}

/// How the glyph colour is chosen for a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForegroundMode {
    /// Every glyph uses the foreground colour.
    #[default]
    Solid,
    /// The foreground colour is scaled by the cell's luminance.
    Shaded,
}

/// Video path: draws every cell's glyph into a fixed-size box on black.
pub struct RasterRenderer {
    ramp: GlyphRamp,
    atlas: GlyphAtlas,
    foreground: [u8; 3],
    mode: ForegroundMode,
}

impl RasterRenderer {
    pub fn new(ramp: GlyphRamp, atlas: GlyphAtlas, foreground: [u8; 3], mode: ForegroundMode) -> Self {
        Self { ramp, atlas, foreground, mode }
    }

    pub fn atlas(&self) -> &GlyphAtlas {
        &self.atlas
    }

    /// Pixel size of the frame produced for a `cols x rows` grid.
    pub fn frame_dimensions(&self, cols: u32, rows: u32) -> (u32, u32) {
        let (cw, ch) = self.atlas.cell_size();
        (cols * cw, rows * ch)
    }

    fn colour_for(&self, cell: GlyphCell) -> [u8; 3] {
        match self.mode {
            ForegroundMode::Solid => self.foreground,
            ForegroundMode::Shaded => self.foreground.map(|c| scale(c, cell.intensity)),
        }
    }
}

fn scale(value: u8, by: u8) -> u8 {
    ((value as u32 * by as u32 + 127) / 255) as u8
}

impl Render for RasterRenderer {
    type Output = RgbImage;

    fn render(&self, grid: &LuminanceGrid) -> RgbImage {
        let (cell_w, cell_h) = self.atlas.cell_size();
        let (width, height) = self.frame_dimensions(grid.cols(), grid.rows());
        let mut img = RgbImage::new(width, height);

        let stride = width as usize * 3;
        let band = stride * cell_h as usize;

        img.par_chunks_exact_mut(band).enumerate().for_each(|(row, pixels)| {
            for col in 0..grid.cols() {
                let cell = cell_at(grid, &self.ramp, col, row as u32);
                if cell.ch == ' ' {
                    continue;
                }
                let mask = self.atlas.mask(cell.ch);
                let colour = self.colour_for(cell);
                let x0 = (col * cell_w) as usize;
                for cy in 0..cell_h as usize {
                    let mask_row = &mask[cy * cell_w as usize..(cy + 1) * cell_w as usize];
                    let line = &mut pixels[cy * stride..(cy + 1) * stride];
                    for (cx, &alpha) in mask_row.iter().enumerate() {
                        if alpha == 0 {
                            continue;
                        }
                        let px = (x0 + cx) * 3;
                        for (channel, &c) in colour.iter().enumerate() {
                            line[px + channel] = scale(c, alpha);
                        }
                    }
                }
            }
        });
        img
    }
}
