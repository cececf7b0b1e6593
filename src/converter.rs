//! The public converter: configuration plus the single-call and pooled
//! conversion entry points.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::browser::{BrowserConfig, BrowserProcess};
use crate::cache::{CacheConfig, FetchCache};
use crate::cdp::target::TargetId;
use crate::convert::{
    run_conversion, ConversionItem, ConversionOptions, ConvertInput, PageSettings, UrlFilter,
    WaitCondition, DEFAULT_CONVERSION_TIMEOUT,
};
use crate::error::{CdpError, Result};
use crate::pool::{BackendFactory, WorkerBackend, WorkerPool};
use crate::preprocess::{PreProcessor, PreProcessorOptions};
use crate::session::Session;

/// Everything a [`Converter`] needs to know. Invalid combinations are
/// rejected by [`ConverterConfig::validate`] when the converter is built,
/// never during a conversion.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub browser: BrowserConfig,
    pub page_settings: PageSettings,
    pub wait: WaitCondition,
    pub conversion_timeout: Duration,
    pub run_javascript: Option<String>,
    pub snapshot: bool,
    pub network_logging: bool,
    pub url_blacklist: Vec<String>,
    pub preprocessor: PreProcessorOptions,
    pub cache: CacheConfig,
    pub concurrency: usize,
    /// HTTP basic auth applied to every navigation.
    pub credentials: Option<(String, String)>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            page_settings: PageSettings::default(),
            wait: WaitCondition::Default,
            conversion_timeout: DEFAULT_CONVERSION_TIMEOUT,
            run_javascript: None,
            snapshot: false,
            network_logging: false,
            url_blacklist: Vec::new(),
            preprocessor: PreProcessorOptions::default(),
            cache: CacheConfig::new(std::env::temp_dir().join("printoxide-cache")),
            concurrency: num_cpus::get(),
            credentials: None,
        }
    }
}

impl ConverterConfig {
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.page_settings.validate()?;
        // Surface bad glob patterns now instead of at navigation time.
        UrlFilter::new(&self.url_blacklist, Vec::new())?;
        if self.concurrency == 0 {
            return Err(CdpError::Config("concurrency must be at least 1".into()));
        }
        if self.conversion_timeout.is_zero() {
            return Err(CdpError::Config(
                "conversion timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConverterConfigBuilder {
    config: Option<ConverterConfig>,
}

impl ConverterConfigBuilder {
    fn config(&mut self) -> &mut ConverterConfig {
        self.config.get_or_insert_with(ConverterConfig::default)
    }

    pub fn browser(mut self, browser: BrowserConfig) -> Self {
        self.config().browser = browser;
        self
    }

    pub fn page_settings(mut self, settings: PageSettings) -> Self {
        self.config().page_settings = settings;
        self
    }

    pub fn wait(mut self, wait: WaitCondition) -> Self {
        self.config().wait = wait;
        self
    }

    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.config().conversion_timeout = timeout;
        self
    }

    pub fn run_javascript(mut self, script: impl Into<String>) -> Self {
        self.config().run_javascript = Some(script.into());
        self
    }

    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.config().snapshot = snapshot;
        self
    }

    pub fn network_logging(mut self, enabled: bool) -> Self {
        self.config().network_logging = enabled;
        self
    }

    pub fn url_blacklist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config().url_blacklist = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn preprocessor(mut self, options: PreProcessorOptions) -> Self {
        self.config().preprocessor = options;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config().cache = cache;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config().concurrency = concurrency;
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config().credentials = Some((user.into(), password.into()));
        self
    }

    pub fn build(mut self) -> Result<ConverterConfig> {
        let config = self.config().clone();
        config.validate()?;
        Ok(config)
    }
}

/// Converts HTML documents to PDF through a headless chromium instance.
///
/// A converter reuses one browser across consecutive [`Converter::convert`]
/// calls and spins up a worker pool (one browser per worker) for list
/// conversions. Configuration setters accumulate and take effect at the
/// next browser launch.
pub struct Converter {
    config: ConverterConfig,
    cache: FetchCache,
    backend: tokio::sync::Mutex<Option<ChromeBackend>>,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Result<Self> {
        config.validate()?;
        let cache = FetchCache::new(config.cache.clone())?;
        Ok(Self {
            config,
            cache,
            backend: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.config.browser.user_agent = Some(user_agent.into());
    }

    pub fn set_proxy(
        &mut self,
        server: Option<String>,
        bypass_list: Option<String>,
        pac_url: Option<String>,
    ) {
        self.config.browser.proxy_server = server;
        self.config.browser.proxy_bypass_list = bypass_list;
        self.config.browser.proxy_pac_url = pac_url;
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.config.browser.window_size = Some((width, height));
    }

    pub fn set_credentials(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.config.credentials = Some((user.into(), password.into()));
    }

    pub fn set_url_blacklist(&mut self, patterns: Vec<String>) -> Result<()> {
        UrlFilter::new(&patterns, Vec::new())?;
        self.config.url_blacklist = patterns;
        Ok(())
    }

    /// Turn a raw input string into a [`ConvertInput`] carrying the
    /// configured credentials.
    pub fn make_input(&self, raw: &str) -> Result<ConvertInput> {
        let mut input = ConvertInput::parse(raw)?;
        if let Some((user, password)) = &self.config.credentials {
            let token = BASE64.encode(format!("{user}:{password}"));
            input = input.with_header("Authorization", format!("Basic {token}"));
        }
        Ok(input)
    }

    /// Convert one input, reusing the browser from previous calls.
    pub async fn convert(&self, raw_input: &str, output: &Path) -> Result<()> {
        let input = self.make_input(raw_input)?;
        let item = ConversionItem::new(input, output);

        let mut guard = self.backend.lock().await;
        if guard.is_none() {
            *guard = Some(ChromeBackend::create(Arc::new(self.config.clone()), self.cache.clone(), 0).await?);
        }
        let outcome = match guard.as_mut() {
            Some(backend) => backend.convert_item(&item).await,
            None => return Err(CdpError::ConnectionClosed),
        };
        if let Err(e) = &outcome {
            if e.is_session_fatal() {
                // The browser is gone; the next call relaunches.
                *guard = None;
            }
        }
        outcome
    }

    /// Convert a batch through the worker pool; results come back in
    /// completion order.
    pub async fn convert_many(&self, items: Vec<ConversionItem>) -> Result<Vec<ConversionItem>> {
        let pool = self.pool();
        for item in items {
            pool.submit(item).await?;
        }
        Ok(pool.join().await)
    }

    /// A worker pool over this converter's configuration, for callers that
    /// want to submit incrementally or cancel.
    pub fn pool(&self) -> WorkerPool {
        WorkerPool::start(
            ChromeBackendFactory {
                config: Arc::new(self.config.clone()),
                cache: self.cache.clone(),
            },
            self.config.concurrency,
        )
    }

    /// Parse a line-delimited list of `input` or `input|output` entries.
    /// Entries without an explicit output get `<stem>.pdf` in `output_dir`.
    pub fn parse_list(&self, content: &str, output_dir: &Path) -> Result<Vec<ConversionItem>> {
        let mut items: Vec<ConversionItem> = Vec::new();
        let mut used_names: Vec<String> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (raw, explicit_output) = match line.split_once('|') {
                Some((input, output)) => (input.trim(), Some(output.trim())),
                None => (line, None),
            };
            let input = self.make_input(raw)?;
            let output = match explicit_output {
                Some(path) => PathBuf::from(path),
                None => {
                    let mut name = derive_pdf_name(&input);
                    if used_names.contains(&name) {
                        name = format!("{}-{}", items.len(), name);
                    }
                    used_names.push(name.clone());
                    output_dir.join(name)
                }
            };
            items.push(ConversionItem::new(input, output));
        }
        Ok(items)
    }

    /// Shut the reused browser down, if one is running.
    pub async fn shutdown(&self) {
        if let Some(backend) = self.backend.lock().await.take() {
            backend.shutdown_browser().await;
        }
    }
}

fn derive_pdf_name(input: &ConvertInput) -> String {
    let stem = input
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| segment.rsplit_once('.').map(|(s, _)| s).unwrap_or(segment))
        .filter(|s| !s.is_empty())
        .unwrap_or("output");
    format!("{stem}.pdf")
}

/// One worker's engine: a browser process, a page target on it, and the
/// pre-processing plumbing. Lives as long as the worker does.
pub struct ChromeBackend {
    config: Arc<ConverterConfig>,
    cache: FetchCache,
    browser: BrowserProcess,
    session: Session,
    target: TargetId,
    temp_root: tempfile::TempDir,
    conversions: usize,
}

impl ChromeBackend {
    async fn create(
        config: Arc<ConverterConfig>,
        cache: FetchCache,
        worker_id: usize,
    ) -> Result<Self> {
        let browser = BrowserProcess::launch(&config.browser).await?;
        let (target, session) = browser.new_target().await?;
        // Readiness ping: a target that cannot report its frame tree is not
        // worth handing conversions to.
        session
            .execute(crate::cdp::page::GetFrameTreeParams::default())
            .await?;
        let temp_root = tempfile::Builder::new()
            .prefix(&format!("printoxide-worker-{worker_id}-"))
            .tempdir()?;
        Ok(Self {
            config,
            cache,
            browser,
            session,
            target,
            temp_root,
            conversions: 0,
        })
    }

    async fn convert_item(&mut self, item: &ConversionItem) -> Result<()> {
        self.conversions += 1;
        let temp_dir = self.temp_root.path().join(format!("job-{}", self.conversions));
        std::fs::create_dir_all(&temp_dir)?;

        let filter = if self.config.url_blacklist.is_empty() {
            None
        } else {
            Some(UrlFilter::new(
                &self.config.url_blacklist,
                vec![item.input.url().to_string()],
            )?)
        };
        let preprocessor = PreProcessor::new(
            self.config.preprocessor.clone(),
            self.cache.clone(),
            filter,
        );
        let prepared = preprocessor
            .prepare(&item.input, &self.config.page_settings, &temp_dir)
            .await;

        let options = ConversionOptions {
            wait: self.config.wait.clone(),
            timeout: self.config.conversion_timeout,
            run_javascript: self.config.run_javascript.clone(),
            snapshot: self.config.snapshot,
            url_blacklist: self.config.url_blacklist.clone(),
            safe_urls: prepared.safe_urls,
            network_logging: self.config.network_logging,
        };
        let outcome = run_conversion(
            &self.session,
            &prepared.input,
            &self.config.page_settings,
            &options,
            &item.output,
        )
        .await;

        if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
            tracing::debug!(error = %e, "failed to remove conversion temp dir");
        }
        outcome
    }

    async fn shutdown_browser(self) {
        let target = self.target.clone();
        if let Err(e) = self.browser.close_target(target).await {
            tracing::debug!(error = %e, "closing page target failed");
        }
        if let Err(e) = self.browser.shutdown().await {
            tracing::warn!(error = %e, "browser shutdown failed");
        }
    }
}

impl WorkerBackend for ChromeBackend {
    fn convert(
        &mut self,
        item: &ConversionItem,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        self.convert_item(item)
    }

    fn shutdown(self) -> impl std::future::Future<Output = ()> + Send {
        self.shutdown_browser()
    }
}

/// Builds one [`ChromeBackend`] per pool worker.
pub struct ChromeBackendFactory {
    config: Arc<ConverterConfig>,
    cache: FetchCache,
}

impl BackendFactory for ChromeBackendFactory {
    type Backend = ChromeBackend;

    fn create(
        &self,
        worker_id: usize,
    ) -> impl std::future::Future<Output = Result<ChromeBackend>> + Send {
        ChromeBackend::create(Arc::clone(&self.config), self.cache.clone(), worker_id)
    }
}
