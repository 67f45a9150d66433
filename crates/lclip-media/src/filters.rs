//! FFmpeg video filter definitions.
//!
//! Text reaches FFmpeg through two parsers: the filter option parser and the
//! filter graph parser. Values are escaped for both, in that order.

use lclip_models::{CropRect, OutputFormat, OverlayItem, OverlayPosition};

/// Long-form keeps the source size, rounded to even dimensions for yuv420p.
pub const FILTER_EVEN_DIMENSIONS: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// Fit the frame inside a `width`x`height` canvas without cropping.
pub fn filter_scale_pad(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1",
        w = width,
        h = height
    )
}

pub fn filter_crop(crop: &CropRect) -> String {
    format!("crop={}:{}:{}:{}", crop.width, crop.height, crop.x, crop.y)
}

/// Remove characters the engine cannot draw; line breaks become spaces.
pub fn sanitize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape for the filter option parser.
fn escape_option_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// Escape for the filter graph parser.
fn escape_graph_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape an arbitrary string used as a drawtext option value.
pub fn escape_drawtext_value(value: &str) -> String {
    escape_graph_value(&escape_option_value(value))
}

fn position_exprs(position: &OverlayPosition) -> (String, String) {
    match position {
        OverlayPosition::Centered { y_ratio } => (
            "(w-text_w)/2".to_string(),
            format!("h*{:.3}-text_h/2", y_ratio.clamp(0.0, 1.0)),
        ),
        OverlayPosition::Absolute { x, y } => (x.to_string(), y.to_string()),
    }
}

/// One `drawtext` filter shown between the item's start and end offsets.
pub fn filter_drawtext(item: &OverlayItem) -> String {
    let (x, y) = position_exprs(&item.position);
    let mut filter = String::from("drawtext=");
    if let Some(file) = &item.font.file {
        filter.push_str(&format!(
            "fontfile={}:",
            escape_drawtext_value(&file.to_string_lossy())
        ));
    }
    filter.push_str(&format!(
        "text={}:expansion=none:fontsize={}:fontcolor={}:borderw={}:bordercolor=black:x={}:y={}",
        escape_drawtext_value(&sanitize_text(&item.text)),
        item.font.size,
        escape_drawtext_value(&item.font.color),
        item.font.border_width,
        x,
        y
    ));
    filter.push_str(&format!(
        ":enable='between(t,{:.3},{:.3})'",
        item.start_ms as f64 / 1000.0,
        item.end_ms as f64 / 1000.0
    ));
    filter
}

/// The complete per-output video chain: crop, canvas fit, then every overlay.
///
/// Overlays come last so their coordinates refer to the output canvas.
pub fn build_output_filter(format: OutputFormat, crop: Option<&CropRect>, overlays: &[OverlayItem]) -> String {
    let mut chain = Vec::with_capacity(overlays.len() + 2);
    if let Some(crop) = crop {
        chain.push(filter_crop(crop));
    }
    match format.canvas() {
        Some((width, height)) => chain.push(filter_scale_pad(width, height)),
        None => chain.push(FILTER_EVEN_DIMENSIONS.to_string()),
    }
    chain.extend(
        overlays
            .iter()
            .filter(|o| !sanitize_text(&o.text).is_empty() && o.end_ms > o.start_ms)
            .map(filter_drawtext),
    );
    chain.join(",")
}
