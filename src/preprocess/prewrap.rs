//! Wrap plain-text files in minimal HTML so they print as fixed-width text.

use std::path::{Path, PathBuf};

use super::encoding::decode_text;
use crate::error::Result;

/// File extensions treated as plain text unless configured otherwise.
pub const DEFAULT_PREWRAP_EXTENSIONS: &[&str] = &["txt", "log"];

/// Whether `path` is a candidate for pre-wrapping.
pub fn wants_prewrap(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Read `path`, decode it and materialize an HTML wrapper in `out_dir`.
pub fn wrap_plain_text(
    path: &Path,
    encoding_label: Option<&str>,
    out_dir: &Path,
) -> Result<PathBuf> {
    let bytes = std::fs::read(path)?;
    let (text, encoding) = decode_text(&bytes, encoding_label);
    tracing::debug!(
        input = %path.display(),
        encoding = encoding.name(),
        "pre-wrapping plain text file"
    );

    let html = format!(
        concat!(
            "<html><head><meta charset=\"utf-8\">",
            "<style>pre {{ white-space: pre-wrap; word-wrap: break-word; ",
            "font-family: monospace; }}</style></head>",
            "<body><pre>{}</pre></body></html>"
        ),
        escape_text(&text)
    );

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("prewrap");
    let out_path = out_dir.join(format!("{stem}.html"));
    std::fs::write(&out_path, html)?;
    Ok(out_path)
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
