//! Low-level WebSocket framing for one devtools endpoint.
//!
//! [`Connection`] owns the socket. Commands are queued with
//! [`Connection::submit_command`] and flushed while the stream is polled;
//! polling also decodes inbound frames into [`Message`]s. The session io
//! loop is the only owner, which is what keeps command ids and the write
//! side single-threaded.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::pin::Pin;

use async_tungstenite::tokio::ConnectStream;
use async_tungstenite::tungstenite;
use async_tungstenite::WebSocketStream;
use futures::stream::Stream;
use futures::task::{Context, Poll};
use futures::Sink;

use crate::cdp::{CallId, Message, MethodCall};
use crate::error::{CdpError, Result};

#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Connection {
    /// Commands waiting to go out.
    pending_commands: VecDeque<MethodCall>,
    ws: WebSocketStream<ConnectStream>,
    /// Next command id; ids start at 1 and are unique per connection.
    next_id: u64,
    needs_flush: bool,
    /// Command handed to the sink but not yet accepted by it.
    pending_flush: Option<MethodCall>,
}

impl Connection {
    pub async fn connect(debug_ws_url: impl AsRef<str>) -> Result<Self> {
        let (ws, _) = async_tungstenite::tokio::connect_async(debug_ws_url.as_ref()).await?;
        Ok(Self {
            pending_commands: Default::default(),
            ws,
            next_id: 1,
            needs_flush: false,
            pending_flush: None,
        })
    }

    fn next_call_id(&mut self) -> CallId {
        let id = CallId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Queue the command and return the id it will be correlated by.
    pub fn submit_command(
        &mut self,
        method: Cow<'static, str>,
        params: serde_json::Value,
    ) -> CallId {
        let id = self.next_call_id();
        tracing::debug!(id = %id, %method, "submit command");
        self.pending_commands.push_back(MethodCall { id, method, params });
        id
    }

    /// Flush any in-progress send and start the next queued one.
    fn start_send_next(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if self.needs_flush {
            if let Poll::Ready(Ok(())) = Sink::poll_flush(Pin::new(&mut self.ws), cx) {
                self.needs_flush = false;
            }
        }
        if self.pending_flush.is_none() && !self.needs_flush {
            if let Some(cmd) = self.pending_commands.pop_front() {
                let msg = serde_json::to_string(&cmd)?;
                Sink::start_send(Pin::new(&mut self.ws), msg.into())?;
                self.pending_flush = Some(cmd);
            }
        }
        Ok(())
    }

}

impl Stream for Connection {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        if let Err(err) = pin.start_send_next(cx) {
            return Poll::Ready(Some(Err(err)));
        }

        if let Some(call) = pin.pending_flush.take() {
            if Sink::poll_ready(Pin::new(&mut pin.ws), cx).is_ready() {
                pin.needs_flush = true;
            } else {
                pin.pending_flush = Some(call);
            }
        }

        loop {
            return match Stream::poll_next(Pin::new(&mut pin.ws), cx) {
                Poll::Ready(Some(Ok(msg))) => match msg {
                    tungstenite::Message::Text(_) | tungstenite::Message::Binary(_) => {
                        match serde_json::from_slice::<Message>(&msg.into_data()) {
                            Ok(msg) => Poll::Ready(Some(Ok(msg))),
                            Err(err) => Poll::Ready(Some(Err(CdpError::ProtocolParse(
                                err.to_string(),
                            )))),
                        }
                    }
                    tungstenite::Message::Close(_) => Poll::Ready(None),
                    // Ping/pong and raw frames carry no protocol payload.
                    _ => continue,
                },
                Poll::Ready(Some(Err(tungstenite::Error::ConnectionClosed)))
                | Poll::Ready(Some(Err(tungstenite::Error::AlreadyClosed))) => {
                    Poll::Ready(None)
                }
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(CdpError::Ws(err)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}
