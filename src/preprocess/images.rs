//! Image validation: fetch every `<img>` through the cache, fix EXIF
//! orientation, downscale to the printable width, and point the page at
//! local copies.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::metadata::Orientation;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use url::Url;

use crate::cache::FetchCache;
use crate::convert::UrlFilter;
use crate::error::{CdpError, Result};

/// Default pixel density used to translate printable inches into pixels.
pub const DEFAULT_DPI: f64 = 96.0;

#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Downscale images wider than the printable area.
    pub resize: bool,
    /// Rotate per EXIF orientation.
    pub rotate: bool,
    pub dpi: f64,
    /// Printable width in inches (paper minus horizontal margins).
    pub max_width_inches: Option<f64>,
    /// Per-image fetch timeout.
    pub timeout: Duration,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            resize: false,
            rotate: false,
            dpi: DEFAULT_DPI,
            max_width_inches: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct ImagesOutcome {
    pub html: String,
    /// Number of `src` attributes rewritten.
    pub rewritten: usize,
    /// `file://` URLs of the local copies, exempt from URL blocking.
    pub safe_urls: Vec<String>,
}

impl ImagesOutcome {
    pub fn changed(&self) -> bool {
        self.rewritten > 0
    }
}

/// Validate every `<img>` the blacklist allows and rewrite its `src` to a
/// local copy. Individual image failures are logged and leave that image
/// untouched.
pub async fn validate_images(
    html: &str,
    base_url: &Url,
    cache: &FetchCache,
    filter: Option<&UrlFilter>,
    options: &ImageOptions,
    out_dir: &Path,
) -> Result<ImagesOutcome> {
    // The parsed document is not kept across awaits; only the src list is.
    let srcs: Vec<String> = {
        let doc = scraper::Html::parse_document(html);
        let selector = scraper::Selector::parse("img[src]")
            .map_err(|e| CdpError::PreProcessor(format!("bad img selector: {e}")))?;
        let mut seen = Vec::new();
        for img in doc.select(&selector) {
            if let Some(src) = img.value().attr("src") {
                if !seen.iter().any(|s: &String| s == src) {
                    seen.push(src.to_string());
                }
            }
        }
        seen
    };

    let mut replacements: HashMap<String, String> = HashMap::new();
    let mut safe_urls = Vec::new();

    for (index, src) in srcs.iter().enumerate() {
        let resolved = match base_url.join(src) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(src, error = %e, "skipping unresolvable image url");
                continue;
            }
        };
        if resolved.scheme() == "data" {
            continue;
        }
        // Local copies from an earlier pass are already validated.
        if resolved.scheme() == "file" {
            if let Ok(path) = resolved.to_file_path() {
                if path.starts_with(out_dir) {
                    continue;
                }
            }
        }
        if let Some(filter) = filter {
            if filter.is_blocked(resolved.as_str()) {
                tracing::info!(url = %resolved, "image blocked by url blacklist");
                continue;
            }
        }

        match load_and_process(&resolved, cache, options).await {
            Ok((bytes, extension)) => {
                let file_name = format!("img-{index}.{extension}");
                let path = out_dir.join(&file_name);
                if let Err(e) = std::fs::write(&path, &bytes) {
                    tracing::warn!(url = %resolved, error = %e, "failed to store image copy");
                    continue;
                }
                match Url::from_file_path(&path) {
                    Ok(file_url) => {
                        safe_urls.push(file_url.to_string());
                        replacements.insert(src.clone(), file_url.to_string());
                    }
                    Err(()) => {
                        tracing::warn!(path = %path.display(), "image copy path is not absolute");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %resolved, error = %e, "image validation failed, leaving src untouched");
            }
        }
    }

    if replacements.is_empty() {
        return Ok(ImagesOutcome {
            html: html.to_string(),
            rewritten: 0,
            safe_urls,
        });
    }

    let rewritten_count = std::cell::Cell::new(0usize);
    let html = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                if let Some(src) = el.get_attribute("src") {
                    if let Some(replacement) = replacements.get(&src) {
                        el.set_attribute("src", replacement)?;
                        rewritten_count.set(rewritten_count.get() + 1);
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| CdpError::PreProcessor(format!("image rewrite failed: {e}")))?;

    Ok(ImagesOutcome {
        html,
        rewritten: rewritten_count.get(),
        safe_urls,
    })
}

/// Fetch one image and apply rotation/downscaling. Returns the bytes to
/// store and the extension to store them under.
async fn load_and_process(
    url: &Url,
    cache: &FetchCache,
    options: &ImageOptions,
) -> Result<(Vec<u8>, String)> {
    let bytes: Vec<u8> = if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| CdpError::PreProcessor(format!("bad file url {url}")))?;
        std::fs::read(path)?
    } else {
        let (body, _cached) = tokio::time::timeout(
            options.timeout,
            cache.get(url.as_str(), &HashMap::new()),
        )
        .await
        .map_err(|_| CdpError::Timeout(options.timeout))??;
        body.to_vec()
    };

    let reader = image::ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| CdpError::PreProcessor(format!("image sniff failed: {e}")))?;
    let format = reader.format();
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| CdpError::PreProcessor(format!("image decode failed: {e}")))?;
    let orientation = image::ImageDecoder::orientation(&mut decoder)
        .unwrap_or(Orientation::NoTransforms);
    let mut img = image::DynamicImage::from_decoder(decoder)
        .map_err(|e| CdpError::PreProcessor(format!("image decode failed: {e}")))?;

    let mut changed = false;
    if options.rotate && orientation != Orientation::NoTransforms {
        img.apply_orientation(orientation);
        changed = true;
    }
    if options.resize {
        if let Some(max_inches) = options.max_width_inches {
            let max_px = (max_inches * options.dpi).floor().max(1.0) as u32;
            if img.width() > max_px {
                let scale = max_px as f64 / img.width() as f64;
                let height = ((img.height() as f64) * scale).round().max(1.0) as u32;
                img = img.resize_exact(max_px, height, image::imageops::FilterType::Lanczos3);
                changed = true;
            }
        }
    }

    if changed {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .map_err(|e| CdpError::PreProcessor(format!("image encode failed: {e}")))?;
        Ok((out, "png".to_string()))
    } else {
        let extension = format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin")
            .to_string();
        Ok((bytes, extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 10, 10]),
        ));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    async fn test_cache(root: &Path) -> FetchCache {
        FetchCache::new(CacheConfig::new(root)).unwrap()
    }

    #[tokio::test]
    async fn images_are_localized_and_downscaled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wide.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(300, 100)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = test_cache(cache_dir.path()).await;
        let base = Url::parse(&format!("{}/page.html", server.uri())).unwrap();
        let html = r#"<html><body><img src="/wide.png"></body></html>"#;
        let options = ImageOptions {
            resize: true,
            // 1 inch at 96 dpi: the 300px source must shrink to 96px.
            max_width_inches: Some(1.0),
            ..Default::default()
        };

        let outcome = validate_images(html, &base, &cache, None, &options, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.rewritten, 1);
        assert!(outcome.html.contains("file://"));
        assert!(!outcome.html.contains("/wide.png\""));
        assert_eq!(outcome.safe_urls.len(), 1);

        let local = Url::parse(&outcome.safe_urls[0])
            .unwrap()
            .to_file_path()
            .unwrap();
        let stored = image::open(&local).unwrap();
        assert_eq!(stored.width(), 96);
        assert_eq!(stored.height(), 32);
    }

    #[tokio::test]
    async fn second_pass_leaves_local_copies_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(40, 40)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = test_cache(cache_dir.path()).await;
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let html = r#"<img src="img.png">"#;
        let options = ImageOptions::default();

        let first = validate_images(html, &base, &cache, None, &options, dir.path())
            .await
            .unwrap();
        assert_eq!(first.rewritten, 1);

        let second = validate_images(&first.html, &base, &cache, None, &options, dir.path())
            .await
            .unwrap();
        assert_eq!(second.rewritten, 0);
        assert_eq!(second.html, first.html);
    }

    #[tokio::test]
    async fn blacklisted_images_are_not_fetched() {
        let server = MockServer::start().await;
        // No mock mounted: a fetch attempt would 404 and log, not rewrite.
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = test_cache(cache_dir.path()).await;
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let filter = UrlFilter::new(&["*tracker*".to_string()], vec![]).unwrap();
        let html = r#"<img src="tracker/pixel.png">"#;

        let outcome = validate_images(
            html,
            &base,
            &cache,
            Some(&filter),
            &ImageOptions::default(),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.rewritten, 0);
        assert_eq!(outcome.html, html);
    }

    #[tokio::test]
    async fn undecodable_payloads_leave_the_src_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not an image".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = test_cache(cache_dir.path()).await;
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let html = r#"<img src="broken.png">"#;

        let outcome = validate_images(
            html,
            &base,
            &cache,
            None,
            &ImageOptions::default(),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.rewritten, 0);
        assert_eq!(outcome.html, html);
    }
}
