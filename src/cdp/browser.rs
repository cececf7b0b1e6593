//! `Browser` domain: instance-level commands on the browser connection.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{Command, Method};

/// Ask the browser to shut itself down. Preferred over signalling the child
/// process; the kill path is the fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseParams {}

impl CloseParams {
    pub const IDENTIFIER: &'static str = "Browser.close";
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetVersionParams {}

impl GetVersionParams {
    pub const IDENTIFIER: &'static str = "Browser.getVersion";
}

impl Method for GetVersionParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVersionReturns {
    pub protocol_version: String,
    pub product: String,
    pub user_agent: String,
}

impl Command for GetVersionParams {
    type Response = GetVersionReturns;
}
