//! The label font and its metrics.
//!
//! Font sizes are em sizes. egui scales its fonts the same way, so a label
//! laid out on the canvas and one rasterized for export share glyph sizes
//! and baseline position.

use std::path::Path;
use std::sync::Arc;

use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont};

use crate::error::{Error, Result};
use crate::layout::{TextMeasure, TextMetrics};

/// egui font family the canvas draws label text with.
pub const LABEL_FAMILY: &str = "label";

/// Raw bytes of the label font: the file at `path`, or egui's bundled
/// proportional font.
pub fn load_font_bytes(path: Option<&Path>) -> Result<Vec<u8>> {
    if let Some(path) = path {
        return std::fs::read(path)
            .map_err(|e| Error::Font(format!("{}: {}", path.display(), e)));
    }
    let defs = egui::FontDefinitions::default();
    let name = defs
        .families
        .get(&egui::FontFamily::Proportional)
        .and_then(|names| names.first())
        .ok_or_else(|| Error::Font("no built-in proportional font".to_string()))?;
    let data = defs
        .font_data
        .get(name)
        .ok_or_else(|| Error::Font(format!("missing font data for {name}")))?;
    Ok(data.font.to_vec())
}

/// Register `bytes` as [`LABEL_FAMILY`], falling back to the proportional
/// fonts for glyphs it lacks.
pub fn install_label_family(ctx: &egui::Context, bytes: Vec<u8>) -> egui::FontFamily {
    let family = egui::FontFamily::Name(LABEL_FAMILY.into());
    let mut fonts = egui::FontDefinitions::default();
    fonts.font_data.insert(
        LABEL_FAMILY.to_owned(),
        Arc::new(egui::FontData::from_owned(bytes)),
    );
    let mut names = vec![LABEL_FAMILY.to_owned()];
    if let Some(fallback) = fonts.families.get(&egui::FontFamily::Proportional) {
        names.extend(fallback.iter().cloned());
    }
    fonts.families.insert(family.clone(), names);
    ctx.set_fonts(fonts);
    family
}

#[derive(Clone, Debug)]
pub struct LabelFont {
    font: FontArc,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(bytes).map_err(|e| Error::Font(e.to_string()))?;
        Ok(Self { font })
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_bytes(load_font_bytes(path)?)
    }

    pub fn font(&self) -> &FontArc {
        &self.font
    }

    /// Glyph scale for an em size of `font_size` pixels.
    pub fn scale(&self, font_size: f32) -> PxScale {
        let units_per_em = self
            .font
            .units_per_em()
            .unwrap_or_else(|| self.font.height_unscaled());
        PxScale::from(font_size * self.font.height_unscaled() / units_per_em)
    }

    /// Caret positions of each glyph along the baseline, kerning included.
    pub fn layout_glyphs(&self, text: &str, font_size: f32) -> (Vec<(GlyphId, f32)>, f32) {
        let scaled = self.font.as_scaled(self.scale(font_size));
        let mut caret = 0.0;
        let mut prev: Option<GlyphId> = None;
        let mut glyphs = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = prev {
                caret += scaled.kern(prev, id);
            }
            glyphs.push((id, caret));
            caret += scaled.h_advance(id);
            prev = Some(id);
        }
        (glyphs, caret)
    }
}

impl TextMeasure for LabelFont {
    fn measure(&self, text: &str, font_size: f32) -> TextMetrics {
        let scaled = self.font.as_scaled(self.scale(font_size));
        let (_, width) = self.layout_glyphs(text, font_size);
        TextMetrics {
            width,
            ascent: scaled.ascent(),
            descent: -scaled.descent(),
        }
    }
}
