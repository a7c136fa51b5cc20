use crate::ocr::BoundingBox;

/// One line of text positioned by the top-left corner of its line box.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// Font size in whole pixels: the box height capped at `max_font_size`.
pub fn font_size_for(bbox: &BoundingBox, max_font_size: u32) -> f32 {
    bbox.height.min(max_font_size).max(1) as f32
}

/// CJK text is drawn as a single line at the box origin. Other scripts are
/// greedily word-wrapped to the box width; lines may run below the box.
pub fn layout_block<F>(
    text: &str,
    bbox: &BoundingBox,
    font_size: f32,
    line_height: f32,
    cjk: bool,
    measure: F,
) -> Vec<PlacedLine>
where
    F: Fn(&str) -> f32,
{
    let x = bbox.x as f32;
    let top = bbox.y as f32;
    if text.trim().is_empty() {
        return Vec::new();
    }
    if cjk {
        return vec![PlacedLine {
            text: text.trim().to_string(),
            x,
            y: top,
        }];
    }

    let advance = font_size * line_height;
    let max_width = bbox.width as f32;
    let mut lines = Vec::new();
    let mut y = top;
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = format!("{}{} ", line, word);
        if measure(&candidate) > max_width && !line.is_empty() {
            lines.push(PlacedLine {
                text: line.trim_end().to_string(),
                x,
                y,
            });
            line = format!("{} ", word);
            y += advance;
        } else {
            line = candidate;
        }
    }
    if !line.trim().is_empty() {
        lines.push(PlacedLine {
            text: line.trim_end().to_string(),
            x,
            y,
        });
    }
    lines
}
