//! The document pre-processor: optional, composable rewrite passes run
//! before the browser ever sees the input.
//!
//! Every pass is independently non-fatal. A pass that fails logs a warning
//! and hands the previous stage's URI onwards; a pass that changes the
//! document materializes a new temporary file and the next pass starts
//! from there.

use std::path::Path;

use url::Url;

use crate::cache::FetchCache;
use crate::convert::{ConvertInput, PageSettings, UrlFilter};
use crate::error::{CdpError, Result};

pub mod encoding;
pub mod fitpage;
pub mod images;
pub mod prewrap;
pub mod sanitize;

pub use images::ImageOptions;
pub use prewrap::DEFAULT_PREWRAP_EXTENSIONS;
pub use sanitize::SanitizePolicy;

/// Which passes run, and how.
#[derive(Debug, Clone, Default)]
pub struct PreProcessorOptions {
    /// Extensions wrapped as plain text. `None` disables the pass.
    pub pre_wrap_extensions: Option<Vec<String>>,
    /// Overrides encoding sniffing for local inputs.
    pub encoding: Option<String>,
    /// Sanitizer policy. `None` disables the pass.
    pub sanitize: Option<SanitizePolicy>,
    /// Inject the content-sized `@page` stylesheets.
    pub fit_page: bool,
    /// Image validation options. `None` disables the pass.
    pub images: Option<ImageOptions>,
}

impl PreProcessorOptions {
    /// Whether any pass needs the document text.
    fn wants_html(&self) -> bool {
        self.sanitize.is_some() || self.fit_page || self.images.is_some()
    }
}

/// The input a conversion should actually navigate to, plus the local URLs
/// the pre-processor created (exempt from URL blocking).
#[derive(Debug)]
pub struct PreparedInput {
    pub input: ConvertInput,
    pub safe_urls: Vec<String>,
}

pub struct PreProcessor {
    options: PreProcessorOptions,
    cache: FetchCache,
    filter: Option<UrlFilter>,
}

impl PreProcessor {
    pub fn new(options: PreProcessorOptions, cache: FetchCache, filter: Option<UrlFilter>) -> Self {
        Self {
            options,
            cache,
            filter,
        }
    }

    /// Run the configured passes. Never fails: every degraded path returns
    /// the last good stage.
    pub async fn prepare(
        &self,
        input: &ConvertInput,
        settings: &PageSettings,
        temp_dir: &Path,
    ) -> PreparedInput {
        let mut current = input.clone();
        let mut safe_urls = Vec::new();

        if let Some(extensions) = &self.options.pre_wrap_extensions {
            if let Some(path) = current.to_file_path() {
                if prewrap::wants_prewrap(&path, extensions) {
                    match prewrap::wrap_plain_text(
                        &path,
                        self.options.encoding.as_deref().or(input.encoding()),
                        temp_dir,
                    )
                    .and_then(|out| {
                        Url::from_file_path(&out).map_err(|()| {
                            CdpError::PreProcessor(format!(
                                "pre-wrap output {} is not absolute",
                                out.display()
                            ))
                        })
                    }) {
                        Ok(url) => {
                            safe_urls.push(url.to_string());
                            current = current.rewritten(url);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "pre-wrap pass skipped");
                        }
                    }
                }
            }
        }

        if !self.options.wants_html() {
            return PreparedInput {
                input: current,
                safe_urls,
            };
        }
        if !matches!(current.url().scheme(), "file" | "http" | "https") {
            return PreparedInput {
                input: current,
                safe_urls,
            };
        }

        let mut html = match self.load_document(&current).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(error = %e, "could not load document, skipping html passes");
                return PreparedInput {
                    input: current,
                    safe_urls,
                };
            }
        };
        // Relative resources keep resolving against where the document
        // really lives, not against the temp copies.
        let base_url = input.url().clone();
        let remote_origin = !input.is_local();
        let mut stage = 0usize;

        if let Some(policy) = &self.options.sanitize {
            match sanitize::sanitize(&html, policy) {
                Ok(outcome) => {
                    for removal in &outcome.removed {
                        tracing::info!(target: "sanitizer", "removed {removal}");
                    }
                    if outcome.changed() {
                        html = outcome.html;
                        self.materialize(
                            &mut html,
                            &base_url,
                            remote_origin,
                            temp_dir,
                            &mut stage,
                            &mut current,
                            &mut safe_urls,
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sanitize pass skipped");
                }
            }
        }

        if self.options.fit_page {
            match fitpage::inject_fit_page(&html) {
                Ok(Some(injected)) => {
                    html = injected;
                    self.materialize(
                        &mut html,
                        &base_url,
                        remote_origin,
                        temp_dir,
                        &mut stage,
                        &mut current,
                        &mut safe_urls,
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "fit-page pass skipped");
                }
            }
        }

        if let Some(image_options) = &self.options.images {
            let mut image_options = image_options.clone();
            if image_options.max_width_inches.is_none() {
                image_options.max_width_inches = settings.printable_width();
            }
            match images::validate_images(
                &html,
                &base_url,
                &self.cache,
                self.filter.as_ref(),
                &image_options,
                temp_dir,
            )
            .await
            {
                Ok(outcome) => {
                    safe_urls.extend(outcome.safe_urls.iter().cloned());
                    if outcome.changed() {
                        html = outcome.html;
                        self.materialize(
                            &mut html,
                            &base_url,
                            remote_origin,
                            temp_dir,
                            &mut stage,
                            &mut current,
                            &mut safe_urls,
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "image validation pass skipped");
                }
            }
        }

        PreparedInput {
            input: current,
            safe_urls,
        }
    }

    async fn load_document(&self, input: &ConvertInput) -> Result<String> {
        let bytes: Vec<u8> = match input.to_file_path() {
            Some(path) => std::fs::read(path)?,
            None => {
                let (body, _cached) = self
                    .cache
                    .get(input.url().as_str(), input.headers())
                    .await?;
                body.to_vec()
            }
        };
        let (text, _encoding) =
            encoding::decode_text(&bytes, self.options.encoding.as_deref().or(input.encoding()));
        Ok(text)
    }

    /// Write the current document state to a new stage file and move the
    /// input URI onto it. Remote documents get a `<base>` tag on first
    /// materialization so relative URLs keep working.
    #[allow(clippy::too_many_arguments)]
    fn materialize(
        &self,
        html: &mut String,
        base_url: &Url,
        remote_origin: bool,
        temp_dir: &Path,
        stage: &mut usize,
        current: &mut ConvertInput,
        safe_urls: &mut Vec<String>,
    ) {
        if remote_origin && *stage == 0 && !html.contains("<base") {
            *html = format!("<base href=\"{base_url}\">{html}");
        }
        *stage += 1;
        let path = temp_dir.join(format!("stage-{stage}.html"));
        if let Err(e) = std::fs::write(&path, html.as_bytes()) {
            tracing::warn!(error = %e, "failed to materialize rewrite stage");
            return;
        }
        match Url::from_file_path(&path) {
            Ok(url) => {
                safe_urls.push(url.to_string());
                *current = current.rewritten(url);
            }
            Err(()) => {
                tracing::warn!(path = %path.display(), "stage path is not absolute");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_cache(root: &Path) -> FetchCache {
        FetchCache::new(CacheConfig::new(root)).unwrap()
    }

    fn processor(options: PreProcessorOptions, cache_root: &Path) -> PreProcessor {
        PreProcessor::new(options, test_cache(cache_root), None)
    }

    #[tokio::test]
    async fn prewrap_rewrites_text_inputs_once() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let cache_root = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, "hello <world>").unwrap();

        let options = PreProcessorOptions {
            pre_wrap_extensions: Some(
                DEFAULT_PREWRAP_EXTENSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ..Default::default()
        };
        let processor = processor(options, cache_root.path());
        let input = ConvertInput::from_path(&source).unwrap();

        let prepared = processor
            .prepare(&input, &PageSettings::default(), temp.path())
            .await;
        let out_path = prepared.input.to_file_path().unwrap();
        assert!(out_path.extension().unwrap() == "html");
        let html = std::fs::read_to_string(&out_path).unwrap();
        assert!(html.contains("hello &lt;world&gt;"));

        // Second application: the html extension no longer matches the
        // pre-wrap set, so nothing further happens.
        let again = processor
            .prepare(&prepared.input, &PageSettings::default(), temp.path())
            .await;
        assert_eq!(again.input.url(), prepared.input.url());
    }

    #[tokio::test]
    async fn sanitize_and_fit_page_materialize_stages() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let cache_root = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.html");
        std::fs::write(
            &source,
            "<html><head></head><body><script>x()</script><p>keep</p></body></html>",
        )
        .unwrap();

        let options = PreProcessorOptions {
            sanitize: Some(SanitizePolicy::default()),
            fit_page: true,
            ..Default::default()
        };
        let processor = processor(options, cache_root.path());
        let input = ConvertInput::from_path(&source).unwrap();

        let prepared = processor
            .prepare(&input, &PageSettings::default(), temp.path())
            .await;
        assert_ne!(prepared.input.url(), input.url());
        let html = std::fs::read_to_string(prepared.input.to_file_path().unwrap()).unwrap();
        assert!(!html.contains("<script>x()"));
        assert!(html.contains("data-fit-page"));
        assert!(html.contains("<p>keep</p>"));
        // Local origin: no base tag injected.
        assert!(!html.contains("<base"));
    }

    #[tokio::test]
    async fn remote_documents_get_a_base_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/page.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head></head><body onload=\"x()\"><p>r</p></body></html>",
            ))
            .mount(&server)
            .await;
        let temp = tempfile::tempdir().unwrap();
        let cache_root = tempfile::tempdir().unwrap();

        let options = PreProcessorOptions {
            sanitize: Some(SanitizePolicy::default()),
            ..Default::default()
        };
        let processor = processor(options, cache_root.path());
        let url = format!("{}/page.html", server.uri());
        let input = ConvertInput::parse(&url).unwrap();

        let prepared = processor
            .prepare(&input, &PageSettings::default(), temp.path())
            .await;
        assert!(prepared.input.is_local());
        let html = std::fs::read_to_string(prepared.input.to_file_path().unwrap()).unwrap();
        assert!(html.contains(&format!("<base href=\"{url}\">")));
        assert!(!html.contains("onload"));
    }

    #[tokio::test]
    async fn failing_pass_propagates_the_previous_uri() {
        let dir = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let cache_root = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.html");
        std::fs::write(&source, "<p>x</p>").unwrap();

        // An element name the selector grammar rejects makes the sanitize
        // pass fail; the input must come through untouched.
        let options = PreProcessorOptions {
            sanitize: Some(SanitizePolicy {
                remove_elements: vec!["<bad>".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let processor = processor(options, cache_root.path());
        let input = ConvertInput::from_path(&source).unwrap();

        let prepared = processor
            .prepare(&input, &PageSettings::default(), temp.path())
            .await;
        assert_eq!(prepared.input.url(), input.url());
    }
}
