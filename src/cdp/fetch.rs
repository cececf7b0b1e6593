//! `Fetch` domain: request interception for URL blacklisting.
//!
//! Only enabled when a blacklist is configured. Paused requests are either
//! continued untouched or failed with `BlockedByClient`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::network::Request;
use super::{Command, Method};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<RequestPattern>>,
}

impl EnableParams {
    pub const IDENTIFIER: &'static str = "Fetch.enable";

    /// Pause every request so the blacklist can be consulted.
    pub fn all_requests() -> Self {
        Self {
            patterns: Some(vec![RequestPattern {
                url_pattern: Some("*".to_string()),
            }]),
        }
    }
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

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequestPaused {
    pub request_id: RequestId,
    pub request: Request,
}

impl EventRequestPaused {
    pub const IDENTIFIER: &'static str = "Fetch.requestPaused";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequestParams {
    pub request_id: RequestId,
}

impl ContinueRequestParams {
    pub const IDENTIFIER: &'static str = "Fetch.continueRequest";

    pub fn new(request_id: RequestId) -> Self {
        Self { request_id }
    }
}

impl Method for ContinueRequestParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContinueRequestReturns {}

impl Command for ContinueRequestParams {
    type Response = ContinueRequestReturns;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    BlockedByClient,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequestParams {
    pub request_id: RequestId,
    pub error_reason: ErrorReason,
}

impl FailRequestParams {
    pub const IDENTIFIER: &'static str = "Fetch.failRequest";

    pub fn blocked(request_id: RequestId) -> Self {
        Self {
            request_id,
            error_reason: ErrorReason::BlockedByClient,
        }
    }
}

impl Method for FailRequestParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FailRequestReturns {}

impl Command for FailRequestParams {
    type Response = FailRequestReturns;
}
