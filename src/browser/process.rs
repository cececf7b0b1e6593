//! The browser child process: spawn, readiness scan, target management and
//! teardown.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::browser::config::BrowserConfig;
use crate::browser::locate::find_chromium;
use crate::browser::port::pick_free_port;
use crate::cdp;
use crate::cdp::target::{CloseTargetParams, CreateTargetParams, TargetId};
use crate::error::{CdpError, Result};
use crate::session::Session;

/// The stderr line prefix announcing the devtools endpoint.
const DEVTOOLS_ANNOUNCEMENT: &str = "DevTools listening on ";

/// Stderr lines kept for the launch-failure diagnostic.
const STDERR_TAIL: usize = 20;

/// The HTTP origin of a running browser's devtools endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserEndpoint {
    host: String,
    port: u16,
}

impl BrowserEndpoint {
    /// Parse host and port out of the announced browser WebSocket URL.
    pub fn from_ws_url(ws_url: &str) -> Result<Self> {
        let url = url::Url::parse(ws_url)
            .map_err(|e| CdpError::BrowserLaunchFailed(format!("bad devtools url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| {
                CdpError::BrowserLaunchFailed(format!("devtools url without host: {ws_url}"))
            })?
            .to_string();
        let port = url.port().ok_or_else(|| {
            CdpError::BrowserLaunchFailed(format!("devtools url without port: {ws_url}"))
        })?;
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn http_origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// The per-target WebSocket URL for `target`.
    pub fn page_ws_url(&self, target: &TargetId) -> String {
        format!(
            "ws://{}:{}/devtools/page/{}",
            self.host,
            self.port,
            target.inner()
        )
    }

    /// Query `/json/version`.
    pub async fn version(&self) -> Result<VersionInfo> {
        let url = format!("{}/json/version", self.http_origin());
        Ok(reqwest::get(&url)
            .await?
            .error_for_status()?
            .json::<VersionInfo>()
            .await?)
    }
}

/// Payload of the `/json/version` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// A supervised browser child plus the session on its browser-level target.
#[derive(Debug)]
pub struct BrowserProcess {
    child: tokio::process::Child,
    endpoint: BrowserEndpoint,
    ws_url: String,
    session: Session,
    session_timeout: Duration,
    shutdown_timeout: Duration,
    /// Removed on drop; `None` when the caller supplied a profile dir.
    user_data_dir: Option<tempfile::TempDir>,
    closed: watch::Receiver<bool>,
}

impl BrowserProcess {
    /// Spawn the browser and wait for it to announce its devtools endpoint.
    ///
    /// Fails with [`CdpError::BrowserLaunchFailed`] when the child exits
    /// before the announcement or stays silent past the startup deadline.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let executable = find_chromium(config.executable.as_deref())?;
        let (start, end) = config.port_range;
        let port = pick_free_port(start, end)?;

        let (user_data_dir, profile_path) = match &config.user_data_dir {
            Some(path) => {
                tokio::fs::create_dir_all(path).await?;
                (None, path.clone())
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("printoxide-profile-")
                    .tempdir()?;
                let path = dir.path().to_path_buf();
                (Some(dir), path)
            }
        };

        tracing::debug!(
            executable = %executable.display(),
            port,
            "launching browser"
        );

        let mut command = tokio::process::Command::new(&executable);
        command
            .args(config.args(port, &profile_path))
            .envs(config.process_envs.clone())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if config.enable_chromium_logging {
            command.stdout(Stdio::inherit());
        } else {
            command.stdout(Stdio::null());
        }

        let mut child = command.spawn().map_err(|e| {
            CdpError::BrowserLaunchFailed(format!(
                "failed to spawn {}: {e}",
                executable.display()
            ))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            CdpError::BrowserLaunchFailed("browser stderr was not captured".to_string())
        })?;
        let mut lines = BufReader::new(stderr).lines();

        let scan = async {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(at) = line.find(DEVTOOLS_ANNOUNCEMENT) {
                            let url = line[at + DEVTOOLS_ANNOUNCEMENT.len()..].trim().to_string();
                            return Ok(url);
                        }
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => {
                        return Err(CdpError::BrowserLaunchFailed(format!(
                            "browser exited before announcing its endpoint: {}",
                            Vec::from(tail).join(" | ")
                        )));
                    }
                    Err(e) => {
                        return Err(CdpError::BrowserLaunchFailed(format!(
                            "failed to read browser stderr: {e}"
                        )));
                    }
                }
            }
        };
        let ws_url = tokio::time::timeout(config.startup_timeout, scan)
            .await
            .map_err(|_| {
                CdpError::BrowserLaunchFailed(format!(
                    "no devtools announcement within {:?}",
                    config.startup_timeout
                ))
            })??;

        let endpoint = BrowserEndpoint::from_ws_url(&ws_url)?;
        let session = Session::connect(&ws_url, config.session_timeout).await?;
        if let Ok(version) = session
            .execute(cdp::browser::GetVersionParams::default())
            .await
        {
            tracing::debug!(
                product = %version.result.product,
                protocol = %version.result.protocol_version,
                "browser version"
            );
        }
        tracing::info!(endpoint = %ws_url, "browser ready");

        // Keep draining stderr so the child never blocks on a full pipe;
        // hitting EOF after readiness means the child went away.
        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "chromium", "{line}");
            }
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            child,
            endpoint,
            ws_url,
            session,
            session_timeout: config.session_timeout,
            shutdown_timeout: config.shutdown_timeout,
            user_data_dir,
            closed: closed_rx,
        })
    }

    pub fn endpoint(&self) -> &BrowserEndpoint {
        &self.endpoint
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// The session on the browser-level target.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Receiver flipping to `true` when the child exits after readiness.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Create a fresh tab and open a dedicated session on it.
    pub async fn new_target(&self) -> Result<(TargetId, Session)> {
        let resp = self.session.execute(CreateTargetParams::blank()).await?;
        let target_id = resp.result.target_id;
        let page_url = self.endpoint.page_ws_url(&target_id);
        let page = Session::connect(&page_url, self.session_timeout).await?;
        Ok((target_id, page))
    }

    pub async fn close_target(&self, target_id: TargetId) -> Result<bool> {
        let resp = self
            .session
            .execute(CloseTargetParams::new(target_id))
            .await?;
        Ok(resp.result.success)
    }

    /// Graceful shutdown: ask the browser to close itself, fall back to
    /// killing the child after the shutdown grace period.
    pub async fn shutdown(mut self) -> Result<()> {
        let graceful = tokio::time::timeout(
            self.shutdown_timeout,
            self.session.execute(cdp::browser::CloseParams::default()),
        )
        .await;
        if let Ok(Err(e)) = graceful {
            tracing::debug!(error = %e, "graceful browser close failed");
        }
        self.session.close();

        match tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await {
            Ok(status) => {
                tracing::debug!(?status, "browser exited");
            }
            Err(_) => {
                tracing::warn!("browser ignored close request, killing it");
                let _ = self.child.kill().await;
            }
        }
        // Dropping `user_data_dir` removes the temporary profile.
        drop(self.user_data_dir.take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::io::Write;

    /// Minimal devtools stub: answers every call per method, serves any
    /// number of connections (browser target plus page targets).
    fn spawn_cdp_stub(listener: tokio::net::TcpListener) {
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let Ok(mut ws) = async_tungstenite::tokio::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if !msg.is_text() {
                            continue;
                        }
                        let call: Value =
                            match serde_json::from_slice(&msg.into_data()) {
                                Ok(call) => call,
                                Err(_) => continue,
                            };
                        let result = match call["method"].as_str() {
                            Some("Target.createTarget") => json!({ "targetId": "T1" }),
                            Some("Target.closeTarget") => json!({ "success": true }),
                            _ => json!({}),
                        };
                        let reply = json!({ "id": call["id"], "result": result });
                        if ws.send(reply.to_string().into()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    #[cfg(unix)]
    fn fake_browser(dir: &std::path::Path, script_body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-chromium");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{script_body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_scans_the_announcement_and_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        spawn_cdp_stub(listener);

        let dir = tempfile::tempdir().unwrap();
        let exe = fake_browser(
            dir.path(),
            &format!(
                "echo \"DevTools listening on ws://127.0.0.1:{port}/devtools/browser/test\" >&2\nsleep 30"
            ),
        );
        let config = BrowserConfig::builder()
            .executable(&exe)
            .shutdown_timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let browser = BrowserProcess::launch(&config).await.unwrap();
        assert_eq!(browser.endpoint().port(), port);
        assert_eq!(browser.endpoint().host(), "127.0.0.1");

        let (target_id, page) = browser.new_target().await.unwrap();
        assert_eq!(target_id.inner(), "T1");
        page.send("Page.enable", json!({})).await.unwrap();

        browser.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_reports_the_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_browser(dir.path(), "echo \"cannot open display\" >&2\nexit 3");
        let config = BrowserConfig::builder().executable(&exe).build().unwrap();

        match BrowserProcess::launch(&config).await {
            Err(CdpError::BrowserLaunchFailed(msg)) => {
                assert!(msg.contains("cannot open display"), "got: {msg}");
            }
            other => panic!("expected BrowserLaunchFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_child_hits_the_startup_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_browser(dir.path(), "sleep 30");
        let config = BrowserConfig::builder()
            .executable(&exe)
            .startup_timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        match BrowserProcess::launch(&config).await {
            Err(CdpError::BrowserLaunchFailed(msg)) => {
                assert!(msg.contains("no devtools announcement"), "got: {msg}");
            }
            other => panic!("expected BrowserLaunchFailed, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_parses_the_announced_url() {
        let endpoint =
            BrowserEndpoint::from_ws_url("ws://127.0.0.1:9222/devtools/browser/uuid").unwrap();
        assert_eq!(endpoint.http_origin(), "http://127.0.0.1:9222");
    }
}
