//! Font resolution and the per-job glyph atlas.
//!
//! Fonts are tried in a fixed order so the same machine always renders the
//! same pixels: an explicit path, then [`FONT_CANDIDATES`], then the built-in
//! bitmap font.

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bitmap_font;
use crate::error::{ConvertError, Result};

/// Monospace fonts tried, in order, when no explicit font is given.
pub const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "C:\\Windows\\Fonts\\consola.ttf",
    "C:\\Windows\\Fonts\\lucon.ttf",
];

/// Which font a job should render with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FontSpec {
    /// First loadable entry of [`FONT_CANDIDATES`].
    #[default]
    Auto,
    /// A specific TrueType/OpenType file.
    Path(PathBuf),
    /// The built-in 8x8 bitmap font.
    Builtin,
}

/// A resolved glyph source.
pub enum FontFace {
    Outline { font: FontVec, origin: PathBuf },
    Bitmap,
}

impl FontFace {
    pub fn describe(&self) -> String {
        match self {
            FontFace::Outline { origin, .. } => origin.display().to_string(),
            FontFace::Bitmap => "built-in 8x8 bitmap".to_string(),
        }
    }
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FontFace").field(&self.describe()).finish()
    }
}

fn load_outline(path: &Path) -> anyhow::Result<FontVec> {
    let data = fs::read(path)?;
    Ok(FontVec::try_from_vec(data)?)
}

/// Resolves `spec` to a font face.
///
/// An explicit path that cannot be loaded is always `FontUnavailable`; the
/// caller decides whether to retry with [`FontSpec::Builtin`]. For
/// [`FontSpec::Auto`], the bitmap font is used only when `builtin_fallback`
/// is set.
pub fn resolve_font(spec: &FontSpec, builtin_fallback: bool) -> Result<FontFace> {
    match spec {
        FontSpec::Builtin => Ok(FontFace::Bitmap),
        FontSpec::Path(path) => load_outline(path)
            .map(|font| FontFace::Outline { font, origin: path.clone() })
            .map_err(|e| ConvertError::FontUnavailable(format!("{}: {}", path.display(), e))),
        FontSpec::Auto => {
            for candidate in FONT_CANDIDATES {
                let path = Path::new(candidate);
                if !path.exists() {
                    continue;
                }
                match load_outline(path) {
                    Ok(font) => {
                        log::info!("using font {}", path.display());
                        return Ok(FontFace::Outline { font, origin: path.to_path_buf() });
                    }
                    Err(e) => log::warn!("skipping font {}: {}", path.display(), e),
                }
            }
            if builtin_fallback {
                log::info!("no monospace font found, using built-in bitmap font");
                Ok(FontFace::Bitmap)
            } else {
                Err(ConvertError::FontUnavailable(format!(
                    "none of {} candidate fonts could be loaded",
                    FONT_CANDIDATES.len()
                )))
            }
        }
    }
}

/// Fixed cell box plus one pre-rendered alpha mask per glyph.
///
/// Built once per job from the ramp's glyphs. Every cell of every frame uses
/// the same box, and glyphs are drawn from the cell's left edge on a shared
/// baseline.
pub struct GlyphAtlas {
    cell_width: u32,
    cell_height: u32,
    masks: HashMap<char, Vec<u8>>,
    blank: Vec<u8>,
}

impl GlyphAtlas {
    pub fn build(face: &FontFace, font_size: f32, glyphs: &[char]) -> Result<Self> {
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(ConvertError::config(format!("font size must be positive, got {}", font_size)));
        }
        let atlas = match face {
            FontFace::Outline { font, .. } => Self::from_outline(font, font_size, glyphs),
            FontFace::Bitmap => Self::from_bitmap(font_size, glyphs),
        };
        log::debug!(
            "glyph atlas: {} glyphs, cell {}x{} px ({})",
            atlas.masks.len(),
            atlas.cell_width,
            atlas.cell_height,
            face.describe()
        );
        Ok(atlas)
    }

    fn empty(cell_width: u32, cell_height: u32) -> Self {
        Self {
            cell_width,
            cell_height,
            masks: HashMap::new(),
            blank: vec![0u8; (cell_width * cell_height) as usize],
        }
    }

    fn from_outline(font: &FontVec, font_size: f32, glyphs: &[char]) -> Self {
        let scale = PxScale::from(font_size);
        let scaled = font.as_scaled(scale);
        let width = scaled.h_advance(scaled.glyph_id('M')).ceil() as u32;
        let height = (scaled.ascent() - scaled.descent() + scaled.line_gap()).ceil() as u32;
        let mut atlas = Self::empty(width.max(1), height.max(1));

        for &ch in glyphs {
            let id = font.glyph_id(ch);
            if id.0 == 0 && ch != ' ' {
                log::warn!("font has no glyph for {:?}, rendering it blank", ch);
                continue;
            }
            let mut mask = atlas.blank.clone();
            let glyph = id.with_scale_and_position(scale, point(0.0, scaled.ascent()));
            if let Some(outline) = font.outline_glyph(glyph) {
                let bounds = outline.px_bounds();
                let (cw, ch_h) = (atlas.cell_width as i32, atlas.cell_height as i32);
                outline.draw(|x, y, coverage| {
                    let px = x as i32 + bounds.min.x as i32;
                    let py = y as i32 + bounds.min.y as i32;
                    if px >= 0 && py >= 0 && px < cw && py < ch_h {
                        let idx = (py * cw + px) as usize;
                        mask[idx] = mask[idx].max((coverage * 255.0).round() as u8);
                    }
                });
            }
            atlas.masks.insert(ch, mask);
        }
        atlas
    }

    fn from_bitmap(font_size: f32, glyphs: &[char]) -> Self {
        let s = ((font_size as u32) / 8).max(1);
        let mut atlas = Self::empty(8 * s, 12 * s);
        let top = 2 * s;

        for &ch in glyphs {
            let Some(bitmap) = bitmap_font::glyph(ch) else {
                log::warn!("built-in font has no glyph for {:?}, rendering it blank", ch);
                continue;
            };
            let mut mask = atlas.blank.clone();
            for y in 0..8 * s {
                for x in 0..8 * s {
                    if bitmap_font::is_set(bitmap, x / s, y / s) {
                        mask[((top + y) * atlas.cell_width + x) as usize] = 255;
                    }
                }
            }
            atlas.masks.insert(ch, mask);
        }
        atlas
    }

    /// `(cell_width, cell_height)` in pixels.
    pub fn cell_size(&self) -> (u32, u32) {
        (self.cell_width, self.cell_height)
    }

    /// Cell width / cell height.
    pub fn cell_aspect(&self) -> f32 {
        self.cell_width as f32 / self.cell_height as f32
    }

    /// Alpha mask (`cell_width * cell_height`, row-major) for `ch`; blank for
    /// glyphs the font could not supply.
    pub fn mask(&self, ch: char) -> &[u8] {
        self.masks.get(&ch).unwrap_or(&self.blank)
    }
}
