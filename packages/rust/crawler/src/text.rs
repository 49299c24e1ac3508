//! Plain-text derivation from raw page HTML.
//!
//! Every persisted record carries both the raw HTML and a plain-text
//! rendering of it. The rendering is deliberately dumb — drop script/style
//! subtrees, take the remaining text, normalize whitespace — because
//! per-site field extraction is a downstream concern, not the crawler's.

use scraper::{ElementRef, Html};

/// Derive plain text from raw HTML.
///
/// Whitespace normalization: each line is trimmed, runs of double spaces
/// split into chunks, and the non-empty chunks joined by newlines.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(doc.root_element(), &mut raw);
    normalize_whitespace(&raw)
}

/// Collect text nodes under `element`, skipping script and style subtrees.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            if matches!(el.value().name(), "script" | "style") {
                continue;
            }
            collect_text(el, out);
        }
    }
}

fn normalize_whitespace(raw: &str) -> String {
    let mut chunks: Vec<&str> = Vec::new();
    for line in raw.lines() {
        for phrase in line.trim().split("  ") {
            let phrase = phrase.trim();
            if !phrase.is_empty() {
                chunks.push(phrase);
            }
        }
    }
    chunks.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"<html><head>
            <style>body { color: red; }</style>
            <script>window.tracker = true;</script>
        </head><body>
            <h1>Quercus robur</h1>
            <p>A large deciduous tree.</p>
        </body></html>"#;

        let text = html_to_text(html);
        assert!(text.contains("Quercus robur"));
        assert!(text.contains("A large deciduous tree."));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("tracker"));
    }

    #[test]
    fn normalizes_whitespace() {
        let html = "<html><body><p>  Leaves alternate,   simple.  </p>\n\n<p>Acorns solitary.</p></body></html>";
        let text = html_to_text(html);

        assert!(!text.contains("  "));
        for line in text.lines() {
            assert_eq!(line, line.trim());
            assert!(!line.is_empty());
        }
        assert!(text.contains("Acorns solitary."));
    }

    #[test]
    fn nested_markup_text_survives() {
        let html = "<html><body><div><span>Fagaceae</span> <em>Quercus</em></div></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Fagaceae"));
        assert!(text.contains("Quercus"));
    }

    #[test]
    fn empty_document_yields_empty_text() {
        assert_eq!(html_to_text("<html><body></body></html>"), "");
    }
}
