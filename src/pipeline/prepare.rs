//! Single-page stylesheet injection.
//!
//! Newsletters are written for email clients: inline styles, fixed-width
//! tables, and no print rules. Before the screenshot we force every element
//! visible, drop page-break hints and collapse the body margins so the
//! capture is one continuous image.

/// Stylesheet injected into every document before capture.
pub const SINGLE_PAGE_CSS: &str = r#"
* { box-sizing: border-box; }
:root, html, body {
  background: #ffffff !important;
  margin: 0 !important;
  padding: 0 !important;
  width: auto !important;
  min-width: 100% !important;
  overflow: visible !important;
}
@page { size: auto; margin: 0; }
body, body * {
  break-before: avoid !important;
  break-after: avoid !important;
  break-inside: avoid !important;
  page-break-before: avoid !important;
  page-break-after: avoid !important;
  page-break-inside: avoid !important;
}
img { max-width: 100%; height: auto; display: block; }
table { border-collapse: collapse; width: 100%; }
* { visibility: visible !important; opacity: 1 !important; }
"#;

/// Insert [`SINGLE_PAGE_CSS`] at the start of the document head.
///
/// * a `<head …>` tag gets the style block right after it;
/// * otherwise an `<html …>` tag gets a new head after it;
/// * otherwise the fragment is wrapped in a full document.
pub fn inject_single_page_css(html: &str) -> String {
    let style = format!("<style>{SINGLE_PAGE_CSS}</style>");

    if let Some(end) = tag_end(html, "head") {
        return format!("{}{}{}", &html[..end], style, &html[end..]);
    }
    if let Some(end) = tag_end(html, "html") {
        return format!("{}<head>{}</head>{}", &html[..end], style, &html[end..]);
    }
    format!("<html><head>{style}</head><body>{html}</body></html>")
}

/// Byte offset just past the first opening `<name>` / `<name …>` tag.
fn tag_end(html: &str, name: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{name}");
    let mut from = 0;
    while let Some(pos) = lower[from..].find(&needle) {
        let start = from + pos;
        let after = start + needle.len();
        // `<header>` and `<html5>` are not `<head>` / `<html>`.
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return lower[after..].find('>').map(|gt| after + gt + 1);
            }
            _ => from = after,
        }
    }
    None
}
