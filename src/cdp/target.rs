//! `Target` domain: tab creation and teardown on the browser connection.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{Command, Method};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetParams {
    pub url: String,
}

impl CreateTargetParams {
    pub const IDENTIFIER: &'static str = "Target.createTarget";

    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn blank() -> Self {
        Self::new("about:blank")
    }
}

impl Method for CreateTargetParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetReturns {
    pub target_id: TargetId,
}

impl Command for CreateTargetParams {
    type Response = CreateTargetReturns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTargetParams {
    pub target_id: TargetId,
}

impl CloseTargetParams {
    pub const IDENTIFIER: &'static str = "Target.closeTarget";

    pub fn new(target_id: TargetId) -> Self {
        Self { target_id }
    }
}

impl Method for CloseTargetParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTargetReturns {
    #[serde(default)]
    pub success: bool,
}

impl Command for CloseTargetParams {
    type Response = CloseTargetReturns;
}
