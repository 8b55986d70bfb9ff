//! Named ffmpeg filter chains applied to source frames before sampling.
//!
//! Every chain here keeps the frame size unchanged, so the decoder can keep
//! reading frames at the probed dimensions.

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy)]
pub struct PreprocessPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub filter: &'static str,
}

pub const PREPROCESS_PRESETS: &[PreprocessPreset] = &[
    PreprocessPreset {
        name: "contours",
        description: "Edge detection with strong contrast; outlines only.",
        filter: "format=gray,edgedetect=mode=colormix:high=0.2:low=0.05,eq=contrast=2.5:brightness=-0.1",
    },
    PreprocessPreset {
        name: "contours-soft",
        description: "Gentler edge detection that keeps more midtones.",
        filter: "format=gray,edgedetect=mode=colormix:high=0.12:low=0.03,eq=contrast=2.0:brightness=-0.05",
    },
    PreprocessPreset {
        name: "bw-contrast",
        description: "Grayscale with a contrast boost; spreads glyphs over the whole ramp.",
        filter: "format=gray,eq=contrast=2.2:brightness=-0.08",
    },
    PreprocessPreset {
        name: "noir-detail",
        description: "Sharpened grayscale that brings out texture.",
        filter: "format=gray,unsharp=5:5:1.0:5:5:0.0,eq=contrast=1.8:brightness=-0.04",
    },
    PreprocessPreset {
        name: "brighten",
        description: "Lifts dark footage so fewer cells fall into the first bucket.",
        filter: "eq=brightness=0.12:contrast=1.1:gamma=1.3",
    },
    PreprocessPreset {
        name: "soft-glow",
        description: "Light blur for smoother gradients and less glyph flicker.",
        filter: "gblur=sigma=1.0,eq=contrast=1.08:brightness=0.02",
    },
];

pub fn find_preprocess_preset(name: &str) -> Option<&'static PreprocessPreset> {
    PREPROCESS_PRESETS.iter().find(|preset| preset.name.eq_ignore_ascii_case(name))
}

/// Picks the filter chain for a run. An explicit chain wins over a preset name.
pub fn resolve_preprocess_filter(preprocess: Option<&str>, preprocess_preset: Option<&str>) -> Result<Option<String>> {
    if let Some(filter) = preprocess {
        let filter = normalize(filter);
        if filter.is_empty() {
            return Err(anyhow!("--preprocess cannot be empty"));
        }
        return Ok(Some(filter.to_string()));
    }

    if let Some(name) = preprocess_preset {
        let preset = find_preprocess_preset(name.trim()).ok_or_else(|| {
            let available = PREPROCESS_PRESETS.iter().map(|p| p.name).collect::<Vec<_>>().join(", ");
            anyhow!("Unknown preprocessing preset '{}'. Available presets: {}", name, available)
        })?;
        return Ok(Some(preset.filter.to_string()));
    }

    Ok(None)
}

fn normalize(filter: &str) -> &str {
    filter.trim().trim_matches(',').trim()
}

/// Adds format conversion so the decoder always emits packed RGB after the
/// user's chain.
pub(crate) fn source_filter_chain(preprocess: Option<&str>) -> Option<String> {
    preprocess
        .map(normalize)
        .filter(|s| !s.is_empty())
        .map(|filter| format!("{},format=rgb24", filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup_ignores_case() {
        assert_eq!(find_preprocess_preset("BW-Contrast").map(|p| p.name), Some("bw-contrast"));
        assert!(find_preprocess_preset("sepia").is_none());
    }

    #[test]
    fn explicit_filter_wins_over_preset() {
        let filter = resolve_preprocess_filter(Some(" hflip, "), Some("contours")).unwrap();
        assert_eq!(filter.as_deref(), Some("hflip"));
    }

    #[test]
    fn empty_or_unknown_filters_are_errors() {
        assert!(resolve_preprocess_filter(Some(" , "), None).is_err());
        let err = resolve_preprocess_filter(None, Some("sepia")).unwrap_err();
        assert!(err.to_string().contains("contours"));
        assert_eq!(resolve_preprocess_filter(None, None).unwrap(), None);
    }

    #[test]
    fn source_chain_ends_in_rgb() {
        assert_eq!(source_filter_chain(Some("format=gray,")).as_deref(), Some("format=gray,format=rgb24"));
        assert_eq!(source_filter_chain(Some("  ")), None);
        assert_eq!(source_filter_chain(None), None);
    }
}
