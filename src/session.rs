//! A devtools session: one WebSocket to one target, multiplexing
//! request/response traffic and unsolicited events.
//!
//! One spawned io task owns the [`Connection`] and two tables: in-flight
//! waiters keyed by call id and event subscribers keyed by method name.
//! [`Session`] handles are cheap clones that talk to the io task over an
//! internal channel; the io task is the only writer, so ids stay monotonic
//! and the socket is never written concurrently. Replies are correlated
//! strictly by id, which means a slow command never head-of-line-blocks a
//! fast one.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use fnv::FnvHashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::cdp::{CallId, CdpEvent, Command, CommandResponse, Message};
use crate::conn::Connection;
use crate::error::{CdpError, Result};

/// Default upper bound on waiting for a single command reply.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// How often stale waiters (whose callers stopped listening) are purged.
const WAITER_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

type Waiter = oneshot::Sender<Result<(CallId, Value)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Instruction {
    Call {
        method: Cow<'static, str>,
        params: Value,
        tx: Waiter,
    },
    Subscribe {
        method: String,
        events: mpsc::UnboundedSender<CdpEvent>,
        ack: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        method: String,
        id: SubscriptionId,
    },
    Shutdown,
}

/// Handle to a live devtools session.
#[derive(Debug, Clone)]
pub struct Session {
    instructions: mpsc::UnboundedSender<Instruction>,
    timeout: Duration,
}

impl Session {
    /// Open the WebSocket and spawn the io task that owns it.
    pub async fn connect(ws_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let conn = Connection::connect(ws_url).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(io_loop(conn, rx));
        Ok(Self {
            instructions: tx,
            timeout,
        })
    }

    /// Send a raw command and wait for its reply.
    ///
    /// Returns the reply's `result` subtree. Fails with
    /// [`CdpError::Chrome`] when the reply carries an `error` object,
    /// [`CdpError::Timeout`] when no reply arrives in time and
    /// [`CdpError::ConnectionClosed`] when the session died underneath it.
    pub async fn send(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: Value,
    ) -> Result<Value> {
        self.send_raw(method.into(), params).await.map(|(_, v)| v)
    }

    /// Typed variant of [`Session::send`].
    pub async fn execute<T: Command>(&self, cmd: T) -> Result<CommandResponse<T::Response>> {
        let method = cmd.identifier();
        let params = serde_json::to_value(&cmd)?;
        let (id, value) = self.send_raw(method, params).await?;
        let result = serde_json::from_value(value)?;
        Ok(CommandResponse { id, result })
    }

    async fn send_raw(
        &self,
        method: Cow<'static, str>,
        params: Value,
    ) -> Result<(CallId, Value)> {
        let (tx, rx) = oneshot::channel();
        self.instructions
            .send(Instruction::Call { method, params, tx })
            .map_err(|_| CdpError::ConnectionClosed)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => Err(CdpError::Timeout(self.timeout)),
            Ok(Err(_)) => Err(CdpError::ConnectionClosed),
            Ok(Ok(res)) => res,
        }
    }

    /// Register for event frames named `method`.
    ///
    /// Events are delivered in the order the session receives them; the
    /// subscription unregisters itself when dropped.
    pub async fn subscribe(&self, method: impl Into<String>) -> Result<EventSubscription> {
        let method = method.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.instructions
            .send(Instruction::Subscribe {
                method: method.clone(),
                events: events_tx,
                ack: ack_tx,
            })
            .map_err(|_| CdpError::ConnectionClosed)?;
        let id = ack_rx.await.map_err(|_| CdpError::ConnectionClosed)?;
        Ok(EventSubscription {
            method,
            id,
            events: events_rx,
            instructions: self.instructions.clone(),
        })
    }

    /// Tear the session down, aborting every in-flight command with
    /// [`CdpError::ConnectionClosed`].
    pub fn close(&self) {
        let _ = self.instructions.send(Instruction::Shutdown);
    }

    /// Whether the io task has terminated.
    pub fn is_closed(&self) -> bool {
        self.instructions.is_closed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A registered event listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    method: String,
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<CdpEvent>,
    instructions: mpsc::UnboundedSender<Instruction>,
}

impl EventSubscription {
    /// Next matching event, or `None` once the session is gone.
    pub async fn next(&mut self) -> Option<CdpEvent> {
        self.events.recv().await
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        let _ = self.instructions.send(Instruction::Unsubscribe {
            method: self.method.clone(),
            id: self.id,
        });
    }
}

async fn io_loop(mut conn: Connection, mut rx: mpsc::UnboundedReceiver<Instruction>) {
    let mut waiters: FnvHashMap<CallId, Waiter> = Default::default();
    let mut subscribers: HashMap<String, Vec<(SubscriptionId, mpsc::UnboundedSender<CdpEvent>)>> =
        Default::default();
    let mut next_subscription = 1u64;
    let mut sweep = tokio::time::interval(WAITER_SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            instruction = rx.recv() => match instruction {
                None | Some(Instruction::Shutdown) => break,
                Some(Instruction::Call { method, params, tx }) => {
                    let id = conn.submit_command(method, params);
                    waiters.insert(id, tx);
                }
                Some(Instruction::Subscribe { method, events, ack }) => {
                    let id = SubscriptionId(next_subscription);
                    next_subscription += 1;
                    subscribers.entry(method).or_default().push((id, events));
                    let _ = ack.send(id);
                }
                Some(Instruction::Unsubscribe { method, id }) => {
                    if let Some(subs) = subscribers.get_mut(&method) {
                        subs.retain(|(sub_id, _)| *sub_id != id);
                        if subs.is_empty() {
                            subscribers.remove(&method);
                        }
                    }
                }
            },
            msg = conn.next() => match msg {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(tx) = waiters.remove(&resp.id) {
                        let out = match resp.error {
                            Some(err) => Err(CdpError::Chrome(err)),
                            None => Ok((resp.id, resp.result.unwrap_or(Value::Null))),
                        };
                        let _ = tx.send(out);
                    } else {
                        tracing::debug!(id = %resp.id, "reply for evicted waiter dropped");
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    if let Some(subs) = subscribers.get_mut(event.method.as_ref()) {
                        subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
                    }
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "devtools connection failed");
                    break;
                }
                None => {
                    tracing::debug!("devtools connection closed by peer");
                    break;
                }
            },
            _ = sweep.tick() => {
                waiters.retain(|_, tx| !tx.is_closed());
            }
        }
    }

    // Dropping the waiters resolves every pending `send` with
    // `ConnectionClosed`; dropping the subscriber senders ends every
    // subscription stream.
    drop(waiters);
    drop(subscribers);
    drop(conn);
    rx.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use serde_json::json;

    async fn bind_server() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// A server that echoes each call's params back under `result.params`.
    fn spawn_echo_server(listener: tokio::net::TcpListener) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if !msg.is_text() {
                    continue;
                }
                let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
                let reply = json!({
                    "id": call["id"],
                    "result": { "params": call["params"] }
                });
                if ws.send(reply.to_string().into()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn replies_match_their_call_ids_under_concurrency() {
        let (listener, url) = bind_server().await;

        // Buffer a full batch, then answer in reverse order so correlation
        // cannot accidentally rely on arrival order.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            let mut calls = Vec::new();
            while calls.len() < 100 {
                let msg = ws.next().await.unwrap().unwrap();
                if !msg.is_text() {
                    continue;
                }
                let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
                calls.push(call);
            }
            for call in calls.into_iter().rev() {
                let reply = json!({
                    "id": call["id"],
                    "result": { "n": call["params"]["n"] }
                });
                ws.send(reply.to_string().into()).await.unwrap();
            }
        });

        let session = Session::connect(&url, Duration::from_secs(10)).await.unwrap();
        let sends = (0u64..100)
            .map(|n| {
                let session = session.clone();
                async move { (n, session.send("Test.echo", json!({ "n": n })).await) }
            })
            .collect::<Vec<_>>();
        for (n, result) in futures::future::join_all(sends).await {
            let value = result.unwrap();
            assert_eq!(value["n"], json!(n));
        }
    }

    #[tokio::test]
    async fn error_replies_surface_as_chrome_errors() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
            let reply = json!({
                "id": call["id"],
                "error": { "code": -32000, "message": "Invalid page range" }
            });
            ws.send(reply.to_string().into()).await.unwrap();
        });

        let session = Session::connect(&url, Duration::from_secs(5)).await.unwrap();
        let err = session.send("Page.printToPDF", json!({})).await.unwrap_err();
        match err {
            CdpError::Chrome(chrome) => {
                assert_eq!(chrome.code, -32000);
                assert_eq!(chrome.message, "Invalid page range");
            }
            other => panic!("expected chrome error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_reply_times_out() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            // Swallow the call and never answer.
            let _ = ws.next().await;
            let () = std::future::pending().await;
        });

        let session = Session::connect(&url, Duration::from_millis(200)).await.unwrap();
        let err = session.send("Page.enable", json!({})).await.unwrap_err();
        assert!(matches!(err, CdpError::Timeout(_)));
    }

    #[tokio::test]
    async fn peer_close_fails_in_flight_waiters() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let session = Session::connect(&url, Duration::from_secs(10)).await.unwrap();
        let err = session.send("Page.enable", json!({})).await.unwrap_err();
        assert!(matches!(err, CdpError::ConnectionClosed));
    }

    #[tokio::test]
    async fn events_are_dispatched_in_order_to_subscribers() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            // Wait for the subscriber to be registered client-side.
            let msg = ws.next().await.unwrap().unwrap();
            let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
            let reply = json!({ "id": call["id"], "result": {} });
            ws.send(reply.to_string().into()).await.unwrap();
            for n in 0..5 {
                let event = json!({
                    "method": "Page.lifecycleEvent",
                    "params": { "name": "networkIdle", "n": n }
                });
                ws.send(event.to_string().into()).await.unwrap();
            }
            let event = json!({ "method": "Page.loadEventFired", "params": {} });
            ws.send(event.to_string().into()).await.unwrap();
            let () = std::future::pending().await;
        });

        let session = Session::connect(&url, Duration::from_secs(5)).await.unwrap();
        let mut lifecycle = session.subscribe("Page.lifecycleEvent").await.unwrap();
        let mut load = session.subscribe("Page.loadEventFired").await.unwrap();
        // The ready round trip guarantees the server starts emitting only
        // after both subscriptions are live.
        session.send("Page.enable", json!({})).await.unwrap();

        for n in 0..5 {
            let event = lifecycle.next().await.unwrap();
            assert_eq!(event.method, "Page.lifecycleEvent");
            assert_eq!(event.params["n"], json!(n));
        }
        assert_eq!(load.next().await.unwrap().method, "Page.loadEventFired");
    }

    #[tokio::test]
    async fn typed_execute_round_trip() {
        let (listener, url) = bind_server().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = async_tungstenite::tokio::accept_async(stream).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            let call: Value = serde_json::from_slice(&msg.into_data()).unwrap();
            assert_eq!(call["method"], json!("Page.navigate"));
            assert_eq!(call["params"]["url"], json!("http://example.test/"));
            let reply = json!({ "id": call["id"], "result": { "frameId": "F1" } });
            ws.send(reply.to_string().into()).await.unwrap();
        });

        let session = Session::connect(&url, Duration::from_secs(5)).await.unwrap();
        let resp = session
            .execute(crate::cdp::page::NavigateParams::new("http://example.test/"))
            .await
            .unwrap();
        assert_eq!(resp.result.frame_id.inner(), "F1");
        assert!(resp.result.error_text.is_none());
    }

    #[tokio::test]
    async fn close_aborts_pending_sends() {
        let (listener, url) = bind_server().await;
        spawn_echo_server(listener);

        let session = Session::connect(&url, Duration::from_secs(10)).await.unwrap();
        // Round trip once so the connection is known to be up.
        session.send("Test.echo", json!({})).await.unwrap();
        session.close();
        let err = session.send("Test.echo", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            CdpError::ConnectionClosed | CdpError::Timeout(_)
        ));
    }
}
