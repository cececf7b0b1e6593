//! `IO` domain: chunked reads of browser-side streams.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{Command, Method};

/// Opaque handle to a stream living inside the browser, as returned by
/// `Page.printToPDF` in `ReturnAsStream` mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub handle: StreamHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ReadParams {
    pub const IDENTIFIER: &'static str = "IO.read";

    pub fn chunk(handle: StreamHandle, size: u64) -> Self {
        Self {
            handle,
            offset: None,
            size: Some(size),
        }
    }
}

impl Method for ReadParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReturns {
    /// When set, `data` is base64 and must be decoded before use.
    #[serde(default)]
    pub base64_encoded: Option<bool>,
    pub data: String,
    pub eof: bool,
}

impl Command for ReadParams {
    type Response = ReadReturns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
    pub handle: StreamHandle,
}

impl CloseParams {
    pub const IDENTIFIER: &'static str = "IO.close";

    pub fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }
}

impl Method for CloseParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CloseReturns {}

impl Command for CloseParams {
    type Response = CloseReturns;
}
