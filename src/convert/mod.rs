//! One conversion: navigate, wait, script, print, stream out.
//!
//! The sequence is strict: domains are enabled and event subscriptions
//! opened before `Page.navigate` so no readiness signal can be missed, then
//! exactly one wait condition gates progress, then the PDF is pulled out of
//! the browser as an `IO` stream in 64 KiB chunks. Per-conversion failures
//! leave the session reusable for the next item; only a lost connection
//! forces the owning worker to rebuild.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::io::AsyncWriteExt;

use crate::cdp::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams,
};
use crate::cdp::io::{CloseParams as IoCloseParams, ReadParams, StreamHandle};
use crate::cdp::network::{
    EnableParams as NetworkEnableParams, SetExtraHttpHeadersParams,
};
use crate::cdp::page::{
    CaptureSnapshotParams, EnableParams as PageEnableParams, NavigateParams,
    SetLifecycleEventsEnabledParams,
};
use crate::cdp::runtime::EvaluateParams;
use crate::error::{CdpError, Result};
use crate::session::Session;

pub mod input;
pub mod settings;
pub mod wait;

pub use input::ConvertInput;
pub use settings::{filter_page_ranges, Orientation, PageSettings, PaperFormat};
pub use wait::WaitCondition;

use wait::PageEvents;

/// Chunk size for draining the PDF stream out of the browser.
const STREAM_CHUNK: u64 = 64 * 1024;

/// Default upper bound on one whole conversion.
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-conversion behavior beyond the print geometry.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub wait: WaitCondition,
    /// Hard upper bound on the whole conversion.
    pub timeout: Duration,
    /// Script evaluated between readiness and printing.
    pub run_javascript: Option<String>,
    /// Also write an `.mhtml` snapshot next to the PDF.
    pub snapshot: bool,
    /// Glob patterns of URLs the page must not load.
    pub url_blacklist: Vec<String>,
    /// URLs exempt from the blacklist regardless of pattern matches.
    pub safe_urls: Vec<String>,
    /// Trace `Network.*` events while converting.
    pub network_logging: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            wait: WaitCondition::Default,
            timeout: DEFAULT_CONVERSION_TIMEOUT,
            run_javascript: None,
            snapshot: false,
            url_blacklist: Vec::new(),
            safe_urls: Vec::new(),
            network_logging: false,
        }
    }
}

/// Decides whether the page may load a URL.
///
/// The input's own URL is always exempt, as are URLs the pre-processor
/// rewrote to local copies.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    blacklist: GlobSet,
    safe: Vec<String>,
}

impl UrlFilter {
    pub fn new(patterns: &[String], safe: Vec<String>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| CdpError::Config(format!("bad blacklist pattern {pattern}: {e}")))?;
            builder.add(glob);
        }
        let blacklist = builder
            .build()
            .map_err(|e| CdpError::Config(format!("bad blacklist: {e}")))?;
        Ok(Self { blacklist, safe })
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        if self.safe.iter().any(|safe| url.starts_with(safe.as_str())) {
            return false;
        }
        self.blacklist.is_match(url)
    }
}

/// Drive one input through navigate → wait → script → print → stream.
///
/// Writes the PDF to `output` and, when requested, an mhtml snapshot to
/// `output` with its extension swapped.
pub async fn run_conversion(
    session: &Session,
    input: &ConvertInput,
    settings: &PageSettings,
    options: &ConversionOptions,
    output: &Path,
) -> Result<()> {
    // Geometry problems surface before any browser traffic.
    let mut print_params = settings.to_print_params()?;
    print_params.transfer_mode = Some(crate::cdp::page::TransferMode::ReturnAsStream);

    session.execute(PageEnableParams::default()).await?;
    session
        .execute(SetLifecycleEventsEnabledParams::new(true))
        .await?;

    let mut blocker = None;
    if !options.url_blacklist.is_empty() {
        let mut safe = options.safe_urls.clone();
        safe.push(input.url().to_string());
        let filter = UrlFilter::new(&options.url_blacklist, safe)?;
        session.execute(FetchEnableParams::all_requests()).await?;
        let paused = session.subscribe(EventRequestPaused::IDENTIFIER).await?;
        blocker = Some(spawn_request_blocker(session.clone(), paused, filter));
    }

    let mut network_log = None;
    if options.network_logging {
        session.execute(NetworkEnableParams::default()).await?;
        network_log = Some(spawn_network_logger(session).await?);
    }

    if !input.headers().is_empty() {
        session.execute(NetworkEnableParams::default()).await?;
        session
            .execute(SetExtraHttpHeadersParams::new(input.headers().clone()))
            .await?;
    }

    let mut events = PageEvents::open(session).await?;

    let work = async {
        let mut navigate = NavigateParams::new(input.url().as_str());
        if let Some(referrer) = input.headers().get("Referer") {
            navigate = navigate.with_referrer(referrer);
        }
        let resp = session.execute(navigate).await?;
        if let Some(error_text) = &resp.result.error_text {
            return Err(CdpError::Navigation(error_text.clone()));
        }

        options
            .wait
            .wait(session, &mut events, input.is_local())
            .await?;

        if let Some(script) = &options.run_javascript {
            let resp = session
                .execute(EvaluateParams {
                    expression: script.clone(),
                    return_by_value: Some(true),
                    await_promise: Some(true),
                })
                .await?;
            if let Some(exception) = resp.result.exception_details {
                return Err(CdpError::Script(exception.describe()));
            }
        }

        if options.snapshot {
            let resp = session.execute(CaptureSnapshotParams::mhtml()).await?;
            let snapshot_path = output.with_extension("mhtml");
            tokio::fs::write(&snapshot_path, resp.result.data.as_bytes()).await?;
            tracing::debug!(path = %snapshot_path.display(), "wrote mhtml snapshot");
        }

        let resp = session.execute(print_params).await?;
        match (resp.result.stream, resp.result.data) {
            (Some(handle), _) => drain_pdf_stream(session, handle, output).await,
            (None, Some(data)) => {
                let bytes = BASE64
                    .decode(data)
                    .map_err(|e| CdpError::StreamRead(format!("bad inline payload: {e}")))?;
                tokio::fs::write(output, bytes).await?;
                Ok(())
            }
            (None, None) => Err(CdpError::StreamRead(
                "printToPDF returned neither stream nor data".to_string(),
            )),
        }
    };

    let outcome = match tokio::time::timeout(options.timeout, work).await {
        Ok(res) => res,
        Err(_) => Err(CdpError::NavigationTimeout(options.timeout)),
    };

    if let Some(task) = blocker {
        task.abort();
    }
    if let Some(task) = network_log {
        task.abort();
    }
    outcome
}

/// Pull the PDF out of the browser in chunks and append to `output`.
async fn drain_pdf_stream(
    session: &Session,
    handle: StreamHandle,
    output: &Path,
) -> Result<()> {
    let mut file = tokio::fs::File::create(output).await?;
    let mut total = 0usize;
    loop {
        let resp = session
            .execute(ReadParams::chunk(handle.clone(), STREAM_CHUNK))
            .await?;
        let chunk = if resp.result.base64_encoded.unwrap_or(false) {
            BASE64
                .decode(&resp.result.data)
                .map_err(|e| CdpError::StreamRead(format!("bad stream chunk: {e}")))?
        } else {
            resp.result.data.clone().into_bytes()
        };
        total += chunk.len();
        file.write_all(&chunk).await?;
        if resp.result.eof {
            break;
        }
    }
    file.flush().await?;
    if let Err(e) = session.execute(IoCloseParams::new(handle)).await {
        tracing::debug!(error = %e, "closing pdf stream failed");
    }
    tracing::debug!(bytes = total, path = %output.display(), "wrote pdf");
    Ok(())
}

fn spawn_request_blocker(
    session: Session,
    mut paused: crate::session::EventSubscription,
    filter: UrlFilter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request = match serde_json::from_value::<EventRequestPaused>(event.params) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed requestPaused event");
                    continue;
                }
            };
            let verdict = if filter.is_blocked(&request.request.url) {
                tracing::info!(url = %request.request.url, "blocked by url blacklist");
                session
                    .execute(FailRequestParams::blocked(request.request_id))
                    .await
                    .map(drop)
            } else {
                session
                    .execute(ContinueRequestParams::new(request.request_id))
                    .await
                    .map(drop)
            };
            if verdict.is_err() {
                break;
            }
        }
    })
}

async fn spawn_network_logger(session: &Session) -> Result<tokio::task::JoinHandle<()>> {
    use crate::cdp::network::*;

    let mut subscriptions = Vec::new();
    for method in [
        EventRequestWillBeSent::IDENTIFIER,
        EventResponseReceived::IDENTIFIER,
        EventDataReceived::IDENTIFIER,
        EventLoadingFinished::IDENTIFIER,
    ] {
        subscriptions.push(session.subscribe(method).await?);
    }
    Ok(tokio::spawn(async move {
        loop {
            let mut pending = Vec::with_capacity(subscriptions.len());
            for sub in subscriptions.iter_mut() {
                pending.push(Box::pin(sub.next()));
            }
            let (event, ..) = futures::future::select_all(pending).await;
            match event {
                Some(event) => {
                    tracing::debug!(target: "network", method = %event.method, params = %event.params);
                }
                None => break,
            }
        }
    }))
}

/// One queue entry for the worker pool: where it comes from, where it goes,
/// and how it ended.
#[derive(Debug, Clone)]
pub struct ConversionItem {
    pub input: ConvertInput,
    pub output: PathBuf,
    pub status: ConversionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionStatus {
    Pending,
    Success,
    Failed(String),
    Cancelled,
}

impl ConversionItem {
    pub fn new(input: ConvertInput, output: impl Into<PathBuf>) -> Self {
        Self {
            input,
            output: output.into(),
            status: ConversionStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ConversionStatus::Pending)
    }
}
