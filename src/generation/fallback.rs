//! Local, provider-independent artifacts for when every provider fails.
//!
//! Output depends only on the request, so two runs over the same request
//! produce byte-identical fallbacks.

use super::types::{ContentKind, GeneratedContent, GenerationRequest, ImageData};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use tera::{Context, Tera};

const TEXT_TEMPLATE_NAME: &str = "fallback_text.md";

const TEXT_TEMPLATE: &str = r"# {{ title }}

{{ overview }}
{% if key_points %}
## Key points
{% for point in key_points %}
- {{ point }}{% endfor %}
{% endif %}
## Summary

This is a short offline overview of {{ title }}. A fuller version will be generated when a content service is available.
";

const SVG_WIDTH: u32 = 1024;
const SVG_HEIGHT: u32 = 576;
const OVERVIEW_MAX_CHARS: usize = 320;
const MAX_KEY_POINTS: usize = 5;
const TITLE_LINE_CHARS: usize = 28;
const MAX_TITLE_LINES: usize = 3;

pub const FALLBACK_MODEL: &str = "fallback-template-v1";

pub struct FallbackGenerator {
    tera: Tera,
}

impl FallbackGenerator {
    pub fn new() -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEXT_TEMPLATE_NAME, TEXT_TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn generate(&self, request: &GenerationRequest) -> GeneratedContent {
        match request.kind {
            ContentKind::Text => GeneratedContent::Text(self.render_text(request)),
            ContentKind::Image => GeneratedContent::Images(vec![ImageData::new(
                "image/svg+xml",
                render_svg(request).into_bytes(),
            )]),
        }
    }

    fn render_text(&self, request: &GenerationRequest) -> String {
        let title = title_for(request);
        let (overview, key_points) = summarize_payload(&request.payload);

        let mut context = Context::new();
        context.insert("title", &title);
        context.insert("overview", &overview);
        context.insert("key_points", &key_points);

        match self.tera.render(TEXT_TEMPLATE_NAME, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, "Fallback template failed, using plain layout");
                format!("# {title}\n\n{overview}\n")
            }
        }
    }
}

fn title_for(request: &GenerationRequest) -> String {
    request
        .options
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| request.target.subject_id.trim().to_string(), String::from)
}

fn clean_line(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['#', '-', '*', '>'])
        .trim()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    let cut = cut.rfind(' ').map_or(cut.as_str(), |i| &cut[..i]);
    format!("{}...", cut.trim_end())
}

/// First meaningful line becomes the overview, following lines key points.
fn summarize_payload(payload: &str) -> (String, Vec<String>) {
    let mut lines = payload
        .lines()
        .map(clean_line)
        .filter(|line| !line.is_empty());

    let overview = lines
        .next()
        .map(|line| truncate_chars(line, OVERVIEW_MAX_CHARS))
        .unwrap_or_default();
    let key_points = lines
        .take(MAX_KEY_POINTS)
        .map(|line| truncate_chars(line, OVERVIEW_MAX_CHARS / 2))
        .collect();

    (overview, key_points)
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn wrap_words(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.push_str("...");
        }
    }
    lines
}

/// Hue in degrees derived from the category (or subject), stable across runs.
fn palette_hue(seed: &str) -> u16 {
    let digest = Sha256::digest(seed.trim().to_lowercase().as_bytes());
    u16::from_be_bytes([digest[0], digest[1]]) % 360
}

fn render_svg(request: &GenerationRequest) -> String {
    let title = title_for(request);
    let category = request
        .options
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let hue = palette_hue(category.unwrap_or(&request.target.subject_id));
    let accent = (hue + 40) % 360;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{SVG_WIDTH}" height="{SVG_HEIGHT}" viewBox="0 0 {SVG_WIDTH} {SVG_HEIGHT}">"#
    );
    let _ = write!(
        svg,
        r#"<defs><linearGradient id="bg" x1="0" y1="0" x2="1" y2="1"><stop offset="0" stop-color="hsl({hue},55%,42%)"/><stop offset="1" stop-color="hsl({accent},60%,28%)"/></linearGradient></defs>"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{SVG_WIDTH}" height="{SVG_HEIGHT}" fill="url(#bg)"/>"#
    );

    let lines = wrap_words(&title, TITLE_LINE_CHARS, MAX_TITLE_LINES);
    let line_height = 64;
    let block_height = line_height * u32::try_from(lines.len()).unwrap_or(1);
    let first_baseline = (SVG_HEIGHT - block_height) / 2 + line_height - 12;
    for (i, line) in lines.iter().enumerate() {
        let y = first_baseline + line_height * u32::try_from(i).unwrap_or(0);
        let _ = write!(
            svg,
            r##"<text x="{}" y="{y}" font-family="sans-serif" font-size="52" font-weight="bold" fill="#ffffff" text-anchor="middle">{}</text>"##,
            SVG_WIDTH / 2,
            escape_xml(line)
        );
    }

    for anchor in &request.options.anchors {
        if !(0.0..=1.0).contains(&anchor.x) || !(0.0..=1.0).contains(&anchor.y) {
            continue;
        }
        let cx = anchor.x * f64::from(SVG_WIDTH);
        let cy = anchor.y * f64::from(SVG_HEIGHT);
        let _ = write!(
            svg,
            r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="8" fill="#ffffff" fill-opacity="0.85"/><text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="20" fill="#ffffff">{}</text>"##,
            cx + 14.0,
            cy + 7.0,
            escape_xml(anchor.label.trim())
        );
    }

    if let Some(category) = category {
        let _ = write!(
            svg,
            r##"<text x="{}" y="{}" font-family="sans-serif" font-size="24" fill="#ffffff" fill-opacity="0.8" text-anchor="middle">{}</text>"##,
            SVG_WIDTH / 2,
            SVG_HEIGHT - 40,
            escape_xml(category)
        );
    }

    svg.push_str("</svg>");
    svg
}
