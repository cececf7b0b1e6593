//! The devtools protocol subset printoxide speaks.
//!
//! The protocol is JSON over a single WebSocket per target. Every outbound
//! frame is a [`MethodCall`]; every inbound frame is either a [`Response`]
//! correlated by `id` or an unsolicited [`CdpEvent`]. Params and returns are
//! hand-written per domain, one module each, mirroring the upstream protocol
//! names in camelCase.

use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod browser;
pub mod fetch;
pub mod io;
pub mod network;
pub mod page;
pub mod runtime;
pub mod target;

/// Identifier correlating a [`MethodCall`] with its [`Response`].
///
/// Unique within one session; assigned monotonically starting at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(u64);

impl CallId {
    pub fn new(id: u64) -> Self {
        CallId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodCall {
    pub id: CallId,
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

/// Anything with a `Domain.method` identifier.
pub trait Method {
    /// The full identifier of this method, like `Page.printToPDF`.
    fn identifier(&self) -> Cow<'static, str>;
}

/// A typed devtools command: serializable params tied to their response type.
pub trait Command: Serialize + Method {
    type Response: DeserializeOwned + fmt::Debug;
}

/// The deserialized `result` of a successfully executed [`Command`].
#[derive(Debug)]
pub struct CommandResponse<T: fmt::Debug> {
    pub id: CallId,
    pub result: T,
}

impl<T: fmt::Debug> std::ops::Deref for CommandResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

/// A reply to a [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: CallId,
    pub result: Option<serde_json::Value>,
    pub error: Option<ChromeError>,
}

/// An unsolicited notification from the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdpEvent {
    pub method: Cow<'static, str>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Method for CdpEvent {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

/// One inbound frame: a reply if it carries an `id`, an event otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(CdpEvent),
}

/// The `error` object a reply carries when the browser rejected a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChromeError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for ChromeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chromium error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChromeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_call_serializes_wire_shape() {
        let call = MethodCall {
            id: CallId::new(7),
            method: "Page.enable".into(),
            params: serde_json::json!({}),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "method": "Page.enable", "params": {}})
        );
    }

    #[test]
    fn inbound_frame_with_id_is_a_response() {
        let msg: Message =
            serde_json::from_str(r#"{"id":3,"result":{"frameId":"F"}}"#).unwrap();
        match msg {
            Message::Response(resp) => {
                assert_eq!(resp.id, CallId::new(3));
                assert!(resp.error.is_none());
            }
            Message::Event(_) => panic!("expected a response"),
        }
    }

    #[test]
    fn inbound_frame_without_id_is_an_event() {
        let msg: Message = serde_json::from_str(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":12.5}}"#,
        )
        .unwrap();
        match msg {
            Message::Event(ev) => assert_eq!(ev.method, "Page.loadEventFired"),
            Message::Response(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn error_reply_deserializes() {
        let msg: Message = serde_json::from_str(
            r#"{"id":9,"error":{"code":-32000,"message":"Invalid page range"}}"#,
        )
        .unwrap();
        match msg {
            Message::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32000);
                assert_eq!(err.message, "Invalid page range");
            }
            Message::Event(_) => panic!("expected a response"),
        }
    }
}
