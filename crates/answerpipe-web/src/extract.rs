//! Static main-content extraction.
//!
//! The policy is deliberately simple and deterministic: strip obvious
//! boilerplate subtrees, then take the longest explicitly-marked content
//! container, falling back to the concatenation of paragraph blocks above a
//! noise threshold. No rendering, no site-specific rules.

use html_scraper::{ElementRef, Html, Selector};

/// Paragraph blocks at or below this many chars are treated as noise
/// (button labels, bylines, cookie banners) by the fallback path.
pub const PARAGRAPH_NOISE_THRESHOLD: usize = 50;

const MARKED_CLASSES: [&str; 3] = ["content", "article", "post"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: String,
    pub description: String,
    pub content: String,
}

/// Extract title, meta description, and main text from an HTML document.
pub fn extract_main_content(html: &str) -> ExtractedPage {
    let mut doc = Html::parse_document(html);
    strip_noise(&mut doc);
    ExtractedPage {
        title: extract_title(&doc),
        description: extract_meta_description(&doc),
        content: pick_main_content(&doc),
    }
}

/// Hard cap to the first `max_chars` characters (chars, not bytes).
pub fn truncate_to_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn strip_noise(doc: &mut Html) {
    let Ok(sel) = Selector::parse("script, style, nav, footer, iframe") else {
        return;
    };
    let ids: Vec<_> = doc.select(&sel).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn extract_title(doc: &Html) -> String {
    // The <h1> fallback only applies when there is no <title> element at
    // all; an empty <title> still wins.
    if let Ok(sel) = Selector::parse("title") {
        if let Some(el) = doc.select(&sel).next() {
            return element_text(&el);
        }
    }
    if let Ok(sel) = Selector::parse("h1") {
        if let Some(el) = doc.select(&sel).next() {
            return element_text(&el);
        }
    }
    String::new()
}

fn extract_meta_description(doc: &Html) -> String {
    let Ok(sel) = Selector::parse(r#"meta[name="description"]"#) else {
        return String::new();
    };
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn pick_main_content(doc: &Html) -> String {
    let candidates = marked_containers(doc);
    if !candidates.is_empty() {
        // Longest container wins, even when it is empty: the presence of a
        // marked container suppresses the paragraph fallback.
        return candidates
            .into_iter()
            .max_by_key(|t| t.chars().count())
            .unwrap_or_default();
    }
    paragraph_fallback(doc)
}

fn marked_containers(doc: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse("article, main, div") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in doc.select(&sel) {
        if el.value().classes().any(|c| MARKED_CLASSES.contains(&c)) {
            out.push(element_text(&el));
        }
    }
    out
}

fn paragraph_fallback(doc: &Html) -> String {
    let Ok(sel) = Selector::parse("p") else {
        return String::new();
    };
    let mut blocks = Vec::new();
    for p in doc.select(&sel) {
        let t = element_text(&p);
        if t.chars().count() > PARAGRAPH_NOISE_THRESHOLD {
            blocks.push(t);
        }
    }
    blocks.join("\n")
}

fn element_text(el: &ElementRef) -> String {
    let mut out = String::new();
    for piece in el.text() {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(piece);
    }
    out
}
