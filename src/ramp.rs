use std::collections::HashSet;

use crate::error::{ConvertError, Result};

/// The default ramp (darkest to lightest).
pub const CLASSIC: &str = ".:-=+*#%@/\\|";

/// Ten-step ramp starting from a blank cell.
pub const STANDARD: &str = " .:-=+*#%@";

/// Paul Bourke's extended ramp.
pub const DETAILED: &str = " .'`^,:;Il!i><~+_-?][}{1)(|/tfjrxnuvczXYUJCLQ0OZmwqpdbkhao*#MW&8%B@$";

/// Looks up a built-in ramp by name.
pub fn named(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "classic" => Some(CLASSIC),
        "standard" => Some(STANDARD),
        "detailed" => Some(DETAILED),
        _ => None,
    }
}

/// Ordered glyphs from darkest to lightest, used to quantize luminance.
///
/// A ramp holds at least two distinct, printable characters and does not
/// change for the lifetime of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRamp {
    chars: Vec<char>,
}

impl GlyphRamp {
    pub fn new(spec: &str) -> Result<Self> {
        let chars: Vec<char> = spec.chars().collect();
        if chars.len() < 2 {
            return Err(ConvertError::config(format!(
                "glyph ramp needs at least 2 characters, got {}",
                chars.len()
            )));
        }
        if let Some(c) = chars.iter().find(|c| c.is_control()) {
            return Err(ConvertError::config(format!(
                "glyph ramp contains control character {:?}",
                c
            )));
        }
        let mut seen = HashSet::with_capacity(chars.len());
        if let Some(dup) = chars.iter().find(|c| !seen.insert(**c)) {
            return Err(ConvertError::config(format!(
                "glyph ramp contains duplicate character {:?}",
                dup
            )));
        }
        Ok(Self { chars })
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Always false; a ramp holds at least two glyphs.
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Ramp index for a luminance value: `floor(v * N / 256)`.
    ///
    /// Splits `0..=255` into N equal-width buckets; values on a bucket
    /// boundary land in the lower bucket.
    pub fn index_for(&self, luma: u8) -> usize {
        let n = self.chars.len();
        (luma as usize * n / 256).min(n - 1)
    }

    pub fn glyph_for(&self, luma: u8) -> char {
        self.chars[self.index_for(luma)]
    }
}

impl Default for GlyphRamp {
    fn default() -> Self {
        Self { chars: CLASSIC.chars().collect() }
    }
}
