//! Stylesheet injection for content-sized PDF pages.
//!
//! Two blocks go into `<head>`: a margin reset, and an on-load script that
//! measures the rendered `<html>` element and rewrites the `@page` rule so
//! the PDF page matches the content bounds exactly.

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};

use crate::error::{CdpError, Result};

/// Marker attribute making the injection detectable (and idempotent).
const FIT_PAGE_MARKER: &str = "data-fit-page";

const BASE_STYLE: &str =
    "<style data-fit-page=\"base\">html, body { margin: 0; padding: 0; }</style>";

const RESIZE_SCRIPT: &str = r#"<script data-fit-page="resize">
window.addEventListener("load", function () {
  var root = document.documentElement;
  var style = document.createElement("style");
  style.textContent =
    "@page { size: " + root.offsetWidth + "px " + root.offsetHeight + "px; margin: 0; }";
  document.head.appendChild(style);
});
</script>"#;

/// Inject the fit-page blocks. Returns `None` when the document already
/// carries them.
pub fn inject_fit_page(html: &str) -> Result<Option<String>> {
    if html.contains(FIT_PAGE_MARKER) {
        return Ok(None);
    }

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", |el| {
                el.prepend(BASE_STYLE, ContentType::Html);
                el.append(RESIZE_SCRIPT, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| CdpError::PreProcessor(format!("fit-page rewrite failed: {e}")))?;

    if rewritten == html {
        // No <head> in the markup; the browser will synthesize one around
        // whatever comes first, so prepending keeps the blocks inside it.
        return Ok(Some(format!("{BASE_STYLE}{RESIZE_SCRIPT}{html}")));
    }
    Ok(Some(rewritten))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_into_the_head() {
        let html = "<html><head><title>t</title></head><body>x</body></html>";
        let out = inject_fit_page(html).unwrap().unwrap();
        assert!(out.contains("data-fit-page=\"base\""));
        assert!(out.contains("data-fit-page=\"resize\""));
        assert!(out.contains("@page"));
        let head_end = out.find("</head>").unwrap();
        assert!(out.find("data-fit-page=\"resize\"").unwrap() < head_end);
    }

    #[test]
    fn headless_markup_still_gets_the_blocks() {
        let html = "<p>bare</p>";
        let out = inject_fit_page(html).unwrap().unwrap();
        assert!(out.starts_with("<style data-fit-page"));
        assert!(out.ends_with("<p>bare</p>"));
    }

    #[test]
    fn second_injection_is_a_no_op() {
        let html = "<html><head></head><body>x</body></html>";
        let once = inject_fit_page(html).unwrap().unwrap();
        assert!(inject_fit_page(&once).unwrap().is_none());
    }
}
