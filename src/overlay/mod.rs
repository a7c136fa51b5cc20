pub mod font;
pub mod layout;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use resvg::render;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::{debug, warn};
use usvg::{Options, Tree, fontdb};

use crate::codec;
use crate::languages;
use crate::pipeline::TranslatedTextBlock;
use crate::settings::RenderSettings;
use font::{
    DEFAULT_ASCENDER_RATIO, ResolvedFont, cjk_fallback_fonts, latin_fallback_fonts,
    measure_text_width_px, resolve_font,
};
use layout::{PlacedLine, font_size_for, layout_block};

const TEXT_FILL: &str = "#000000";

/// Where and how one translated block is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    pub font_size: f32,
    pub font_family: String,
    pub baseline_offset: f32,
    pub lines: Vec<PlacedLine>,
}

/// Draws translated text onto the cleaned slide. Fonts are resolved once,
/// when the renderer is built, and shared by every render call.
pub struct TextOverlayRenderer {
    fontdb: Arc<fontdb::Database>,
    latin: Option<ResolvedFont>,
    cjk: Option<ResolvedFont>,
    max_font_size: u32,
    line_height: f32,
}

impl TextOverlayRenderer {
    /// Uses the system fonts plus any font files named in the settings.
    pub fn new(settings: &RenderSettings) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        Self::with_database(db, settings)
    }

    pub fn with_database(mut db: fontdb::Database, settings: &RenderSettings) -> Self {
        for path in [&settings.latin_font_path, &settings.cjk_font_path]
            .into_iter()
            .flatten()
        {
            if let Err(err) = db.load_font_file(path) {
                warn!("failed to load font file {}: {}", path, err);
            }
        }
        let latin = resolve_script_font(
            &db,
            "latin",
            settings.latin_font_path.as_deref(),
            settings.latin_font_family.as_deref(),
            latin_fallback_fonts(),
        );
        let cjk = resolve_script_font(
            &db,
            "cjk",
            settings.cjk_font_path.as_deref(),
            settings.cjk_font_family.as_deref(),
            cjk_fallback_fonts(),
        );
        Self {
            fontdb: Arc::new(db),
            latin,
            cjk,
            max_font_size: settings.max_font_size.max(1),
            line_height: settings.line_height,
        }
    }

    /// Lays out every block for `target`. Blocks keep their order.
    pub fn layout(&self, blocks: &[TranslatedTextBlock], target: &str) -> Vec<BlockLayout> {
        let cjk = languages::is_cjk(target);
        let (font, fallback) = if cjk {
            (self.cjk.as_ref(), cjk_fallback_fonts())
        } else {
            (self.latin.as_ref(), latin_fallback_fonts())
        };
        let font_family = font_family_attr(font, fallback);
        let ascender = font
            .map(|font| font.metrics.ascender_ratio())
            .unwrap_or(DEFAULT_ASCENDER_RATIO);

        blocks
            .iter()
            .map(|block| {
                let bbox = &block.block.bounding_box;
                let font_size = font_size_for(bbox, self.max_font_size);
                let metrics = font.map(|font| &font.metrics);
                let lines = layout_block(
                    &block.translated_text,
                    bbox,
                    font_size,
                    self.line_height,
                    cjk,
                    |text| measure_text_width_px(text, font_size, metrics),
                );
                BlockLayout {
                    font_size,
                    font_family: font_family.clone(),
                    baseline_offset: font_size * ascender,
                    lines,
                }
            })
            .collect()
    }

    pub fn render(
        &self,
        image: &RgbImage,
        blocks: &[TranslatedTextBlock],
        target: &str,
    ) -> Result<RgbImage> {
        let layouts = self.layout(blocks, target);
        let (width, height) = image.dimensions();
        let png = codec::encode_png(image)?;
        let svg = svg_document(&png, width, height, &layouts);
        debug!(
            "rendering {} block(s), {} line(s)",
            layouts.len(),
            layouts.iter().map(|layout| layout.lines.len()).sum::<usize>()
        );
        self.rasterize(&svg)
    }

    fn rasterize(&self, svg: &str) -> Result<RgbImage> {
        let options = Options {
            fontdb: Arc::clone(&self.fontdb),
            ..Options::default()
        };
        let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;
        let size = tree.size().to_int_size();
        let mut pixmap =
            Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
        render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
        // The slide covers the whole canvas, so every pixel is opaque and the
        // premultiplied channels are the plain colour.
        let rgb = pixmap
            .data()
            .chunks_exact(4)
            .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
            .collect::<Vec<u8>>();
        RgbImage::from_raw(size.width(), size.height(), rgb)
            .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))
    }
}

fn resolve_script_font(
    db: &fontdb::Database,
    script: &str,
    path: Option<&str>,
    family: Option<&str>,
    fallback: &[&str],
) -> Option<ResolvedFont> {
    match resolve_font(db, path.map(Path::new), family, fallback) {
        Ok(resolved) => {
            debug!("{} overlay font: {}", script, resolved.family);
            Some(resolved)
        }
        Err(err) => {
            warn!("{} overlay font unavailable, using estimated widths: {:#}", script, err);
            None
        }
    }
}

fn font_family_attr(font: Option<&ResolvedFont>, fallback: &[&str]) -> String {
    let mut families = Vec::new();
    if let Some(font) = font {
        families.push(font.family.as_str());
    }
    for &name in fallback {
        if !families.iter().any(|family| family.eq_ignore_ascii_case(name)) {
            families.push(name);
        }
    }
    families
        .iter()
        .map(|family| {
            if family.eq_ignore_ascii_case("sans-serif") {
                family.to_string()
            } else {
                format!("'{}'", family.replace('\'', ""))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn svg_document(png: &[u8], width: u32, height: u32, layouts: &[BlockLayout]) -> String {
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(png));
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));
    for layout in layouts {
        for line in &layout.lines {
            svg.push_str(&format!(
                r#"<text x="{x:.1}" y="{y:.1}" font-family="{family}" font-size="{size}" fill="{fill}" xml:space="preserve">{text}</text>"#,
                x = line.x,
                y = line.y + layout.baseline_offset,
                family = escape_xml(&layout.font_family),
                size = layout.font_size,
                fill = TEXT_FILL,
                text = escape_xml(&line.text)
            ));
        }
    }
    svg.push_str("</svg>");
    svg
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
