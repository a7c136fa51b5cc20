use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

/// Ascender as a share of the em box when no font could be resolved.
pub const DEFAULT_ASCENDER_RATIO: f32 = 0.8;

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    ascender: i16,
    family: Option<String>,
    face_index: u32,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("units_per_em", &self.units_per_em)
            .field("face_index", &self.face_index)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn ascender_ratio(&self) -> f32 {
        let ratio = f32::from(self.ascender) / f32::from(self.units_per_em.max(1));
        if ratio > 0.0 && ratio <= 1.5 {
            ratio
        } else {
            DEFAULT_ASCENDER_RATIO
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFont {
    pub metrics: FontMetrics,
    pub family: String,
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Resolution order: explicit file, configured family, then the fallback
/// list in order.
pub fn resolve_font(
    db: &fontdb::Database,
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[&str],
) -> Result<ResolvedFont> {
    if let Some(path) = font_path {
        let metrics = load_font_metrics(path)?;
        let family = metrics
            .family()
            .map(|name| name.to_string())
            .or_else(|| font_family.map(|name| name.to_string()))
            .unwrap_or_else(|| "sans-serif".to_string());
        return Ok(ResolvedFont { metrics, family });
    }

    if let Some(family) = font_family {
        return load_font_metrics_from_family(db, family);
    }

    for candidate in fallback {
        if let Ok(resolved) = load_font_metrics_from_family(db, candidate) {
            return Ok(resolved);
        }
    }

    Err(anyhow!("none of the fallback fonts is installed"))
}

#[cfg(target_os = "macos")]
pub fn latin_fallback_fonts() -> &'static [&'static str] {
    &["Arial", "Helvetica", "Noto Sans", "sans-serif"]
}

#[cfg(target_os = "windows")]
pub fn latin_fallback_fonts() -> &'static [&'static str] {
    &["Arial", "Segoe UI", "Noto Sans", "sans-serif"]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn latin_fallback_fonts() -> &'static [&'static str] {
    &["Arial", "Noto Sans", "DejaVu Sans", "sans-serif"]
}

#[cfg(target_os = "macos")]
pub fn cjk_fallback_fonts() -> &'static [&'static str] {
    &["Hiragino Kaku Gothic Pro", "Hiragino Sans", "Noto Sans JP", "sans-serif"]
}

#[cfg(target_os = "windows")]
pub fn cjk_fallback_fonts() -> &'static [&'static str] {
    &["MS Gothic", "Yu Gothic", "Noto Sans JP", "sans-serif"]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn cjk_fallback_fonts() -> &'static [&'static str] {
    &["Noto Sans CJK JP", "Noto Sans JP", "IPAGothic", "sans-serif"]
}

/// Width in pixels using glyph advances, or a per-character estimate when
/// no font is available.
pub fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font
        && let Ok(face) = Face::parse(&font.data, font.face_index)
    {
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            if ch == ' ' {
                advance = advance.saturating_add(u32::from(font.space_advance));
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(font.space_advance);
            advance = advance.saturating_add(u32::from(glyph_advance));
        }
        let units = f32::from(font.units_per_em.max(1));
        return advance as f32 * (font_size / units);
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF00..=0xFFEF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

fn load_font_metrics_from_data(data: &[u8], preferred_family: Option<&str>) -> Result<FontMetrics> {
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(data, index) else {
            continue;
        };
        let family = extract_family_name(&face);
        let units_per_em = face.units_per_em().max(1);
        let space_advance = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(units_per_em / 2);
        let metrics = FontMetrics {
            data: Arc::new(data.to_vec()),
            units_per_em,
            space_advance,
            ascender: face.ascender(),
            family: family.clone(),
            face_index: index,
        };
        if let (Some(preferred), Some(found)) = (preferred_family, &family)
            && found.eq_ignore_ascii_case(preferred)
        {
            return Ok(metrics);
        }
        if fallback.is_none() {
            fallback = Some(metrics);
        }
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn load_font_metrics_from_family(db: &fontdb::Database, family: &str) -> Result<ResolvedFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = load_font_metrics_from_data(&data, Some(family))?;
    let resolved_family = metrics
        .family()
        .map(|name| name.to_string())
        .unwrap_or_else(|| family.to_string());
    Ok(ResolvedFont {
        metrics,
        family: resolved_family,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_weights_scripts_differently() {
        assert_eq!(measure_text_width_px("ab", 20.0, None), 22.0);
        assert_eq!(measure_text_width_px("日本", 20.0, None), 40.0);
        assert_eq!(measure_text_width_px(" ", 20.0, None), 5.0);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let db = fontdb::Database::new();
        let err = resolve_font(&db, Some(Path::new("/nonexistent/font.ttf")), None, &[]).unwrap_err();
        assert!(err.to_string().contains("failed to read font"));
    }

    #[test]
    fn empty_database_resolves_nothing() {
        let db = fontdb::Database::new();
        assert!(resolve_font(&db, None, Some("Arial"), &[]).is_err());
        assert!(resolve_font(&db, None, None, latin_fallback_fonts()).is_err());
    }

    #[test]
    fn garbage_font_data_is_rejected() {
        assert!(load_font_metrics_from_data(b"not a font", None).is_err());
    }
}
