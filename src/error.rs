use std::io;
use std::time::Duration;

use async_tungstenite::tungstenite;
use thiserror::Error;

use crate::cdp::ChromeError;

pub type Result<T, E = CdpError> = std::result::Result<T, E>;

/// Everything that can go wrong while locating, driving or reading back from
/// a chromium instance.
///
/// Variants map onto three blast radii: fatal to the enclosing convert call
/// (`BrowserNotFound`, `Config`), fatal to the worker's browser/session pair
/// (`BrowserLaunchFailed`, `NoFreePort`, `ConnectionClosed`,
/// `ProtocolParse`), or fatal only to the conversion in flight (everything
/// else). The worker pool uses this split to decide between recording a
/// failed item and rebuilding its browser.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("no chromium executable found")]
    BrowserNotFound,
    #[error("browser exited before devtools became ready: {0}")]
    BrowserLaunchFailed(String),
    #[error("no free port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },
    #[error(transparent)]
    Ws(#[from] tungstenite::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed devtools frame: {0}")]
    ProtocolParse(String),
    #[error("connection to the browser closed")]
    ConnectionClosed,
    #[error(transparent)]
    Chrome(#[from] ChromeError),
    #[error("no reply from the browser within {0:?}")]
    Timeout(Duration),
    #[error("navigation did not complete within {0:?}")]
    NavigationTimeout(Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("pdf stream read failed: {0}")]
    StreamRead(String),
    #[error("cache busy: {0}")]
    CacheBusy(String),
    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),
    #[error("preprocessor pass failed: {0}")]
    PreProcessor(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("conversion cancelled")]
    Cancelled,
}

impl CdpError {
    /// `true` when the session this error surfaced on can no longer be used
    /// and the owning worker must rebuild its browser process.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CdpError::ConnectionClosed
                | CdpError::ProtocolParse(_)
                | CdpError::BrowserLaunchFailed(_)
                | CdpError::NoFreePort { .. }
                | CdpError::Ws(_)
        )
    }
}
