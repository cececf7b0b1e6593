//! `Network` domain: extra request headers and (optional) traffic events.
//!
//! The event types here are only subscribed when network logging is enabled;
//! nothing else in the conversion path depends on them.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Command, Method};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnableParams {}

impl EnableParams {
    pub const IDENTIFIER: &'static str = "Network.enable";
}

impl Method for EnableParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnableReturns {}

impl Command for EnableParams {
    type Response = EnableReturns;
}

/// Headers merged into every request the page issues, used for the caller's
/// extra headers and for basic-auth credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExtraHttpHeadersParams {
    pub headers: HashMap<String, String>,
}

impl SetExtraHttpHeadersParams {
    pub const IDENTIFIER: &'static str = "Network.setExtraHTTPHeaders";

    pub fn new(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Method for SetExtraHttpHeadersParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetExtraHttpHeadersReturns {}

impl Command for SetExtraHttpHeadersParams {
    type Response = SetExtraHttpHeadersReturns;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequestWillBeSent {
    pub request_id: String,
    pub request: Request,
}

impl EventRequestWillBeSent {
    pub const IDENTIFIER: &'static str = "Network.requestWillBeSent";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub url: String,
    pub status: i64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponseReceived {
    pub request_id: String,
    pub response: ResponseInfo,
}

impl EventResponseReceived {
    pub const IDENTIFIER: &'static str = "Network.responseReceived";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDataReceived {
    pub request_id: String,
    pub data_length: u64,
}

impl EventDataReceived {
    pub const IDENTIFIER: &'static str = "Network.dataReceived";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLoadingFinished {
    pub request_id: String,
}

impl EventLoadingFinished {
    pub const IDENTIFIER: &'static str = "Network.loadingFinished";
}
