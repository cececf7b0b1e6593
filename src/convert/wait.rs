//! Wait conditions deciding when a navigated page is ready to print.

use std::time::Duration;

use crate::cdp::page::EventLifecycleEvent;
use crate::cdp::runtime::EvaluateParams;
use crate::error::{CdpError, Result};
use crate::session::{EventSubscription, Session};

/// Cadence of the `window.status` poll.
const WINDOW_STATUS_POLL: Duration = Duration::from_millis(10);

/// When the conversion may proceed from `Navigating` to `Loaded`.
///
/// Exactly one condition governs a conversion; the global conversion
/// timeout stays an independent upper bound on top of whichever is picked.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitCondition {
    /// Poll `window.status` every 10 ms until it equals `value`.
    WindowStatus { value: String, timeout: Duration },
    /// Wait for the first `networkIdle` lifecycle event after navigation.
    NetworkIdle,
    /// After DOM readiness, allow slow media at most this long, then
    /// proceed regardless.
    MediaLoad { timeout: Duration },
    /// Load event for remote inputs, `DOMContentLoaded` for local files.
    Default,
}

/// Lifecycle subscriptions opened before `Page.navigate` so no event can
/// slip through between navigating and waiting.
pub struct PageEvents {
    pub load_fired: EventSubscription,
    pub lifecycle: EventSubscription,
}

impl PageEvents {
    pub async fn open(session: &Session) -> Result<Self> {
        Ok(Self {
            load_fired: session
                .subscribe(crate::cdp::page::EventLoadEventFired::IDENTIFIER)
                .await?,
            lifecycle: session
                .subscribe(EventLifecycleEvent::IDENTIFIER)
                .await?,
        })
    }

    async fn next_lifecycle(&mut self) -> Result<EventLifecycleEvent> {
        loop {
            let event = self
                .lifecycle
                .next()
                .await
                .ok_or(CdpError::ConnectionClosed)?;
            match serde_json::from_value::<EventLifecycleEvent>(event.params) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed lifecycle event");
                }
            }
        }
    }

    async fn wait_lifecycle(&mut self, name: &str) -> Result<()> {
        loop {
            if self.next_lifecycle().await?.name == name {
                return Ok(());
            }
        }
    }

    async fn wait_load_fired(&mut self) -> Result<()> {
        self.load_fired
            .next()
            .await
            .map(|_| ())
            .ok_or(CdpError::ConnectionClosed)
    }
}

impl WaitCondition {
    /// Block until this condition is satisfied.
    ///
    /// `local_input` selects the default milestone; the caller has already
    /// navigated and owns the overall conversion deadline.
    pub async fn wait(
        &self,
        session: &Session,
        events: &mut PageEvents,
        local_input: bool,
    ) -> Result<()> {
        match self {
            WaitCondition::WindowStatus { value, timeout } => {
                wait_for_window_status(session, value, *timeout).await
            }
            WaitCondition::NetworkIdle => {
                events
                    .wait_lifecycle(EventLifecycleEvent::NETWORK_IDLE)
                    .await
            }
            WaitCondition::MediaLoad { timeout } => {
                events
                    .wait_lifecycle(EventLifecycleEvent::DOM_CONTENT_LOADED)
                    .await?;
                // Give slow images and frames a bounded grace period.
                match tokio::time::timeout(*timeout, events.wait_load_fired()).await {
                    Ok(res) => res,
                    Err(_) => {
                        tracing::debug!(?timeout, "media load grace elapsed, proceeding");
                        Ok(())
                    }
                }
            }
            WaitCondition::Default => {
                if local_input {
                    events
                        .wait_lifecycle(EventLifecycleEvent::DOM_CONTENT_LOADED)
                        .await
                } else {
                    events.wait_load_fired().await
                }
            }
        }
    }
}

/// Poll `window.status` until it matches `expected`.
async fn wait_for_window_status(
    session: &Session,
    expected: &str,
    timeout: Duration,
) -> Result<()> {
    let poll = async {
        loop {
            let resp = session
                .execute(EvaluateParams::new("window.status"))
                .await?;
            if let Some(serde_json::Value::String(status)) = &resp.result.result.value {
                if status == expected {
                    return Ok(());
                }
            }
            tokio::time::sleep(WINDOW_STATUS_POLL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| CdpError::NavigationTimeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};

    /// Stub target that reports `window.status == "done"` only after a few
    /// polls, and emits lifecycle events on request.
    fn spawn_status_stub(listener: tokio::net::TcpListener, ready_after_polls: usize) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            let mut polls = 0usize;
            while let Some(Ok(msg)) = ws.next().await {
                if !msg.is_text() {
                    continue;
                }
                let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
                let result = match call["method"].as_str() {
                    Some("Runtime.evaluate") => {
                        polls += 1;
                        let status = if polls > ready_after_polls { "done" } else { "" };
                        json!({ "result": { "type": "string", "value": status } })
                    }
                    _ => json!({}),
                };
                let reply = json!({ "id": call["id"], "result": result });
                if ws.send(reply.to_string().into()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn window_status_polls_until_match() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        spawn_status_stub(listener, 3);

        let session = Session::connect(&url, Duration::from_secs(5)).await.unwrap();
        wait_for_window_status(&session, "done", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn window_status_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        spawn_status_stub(listener, usize::MAX);

        let session = Session::connect(&url, Duration::from_secs(5)).await.unwrap();
        let err = wait_for_window_status(&session, "done", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::NavigationTimeout(_)));
    }
}
