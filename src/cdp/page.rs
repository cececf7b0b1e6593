//! `Page` domain: navigation, lifecycle events, printing and snapshots.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::io::StreamHandle;
use super::{Command, Method};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(String);

impl FrameId {
    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FrameId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnableParams {}

impl EnableParams {
    pub const IDENTIFIER: &'static str = "Page.enable";
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

/// `Page.lifecycleEvent` notifications (`networkIdle`, `DOMContentLoaded`,
/// ...) are only emitted after this has been switched on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLifecycleEventsEnabledParams {
    pub enabled: bool,
}

impl SetLifecycleEventsEnabledParams {
    pub const IDENTIFIER: &'static str = "Page.setLifecycleEventsEnabled";

    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Method for SetLifecycleEventsEnabledParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetLifecycleEventsEnabledReturns {}

impl Command for SetLifecycleEventsEnabledParams {
    type Response = SetLifecycleEventsEnabledReturns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl NavigateParams {
    pub const IDENTIFIER: &'static str = "Page.navigate";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

impl<T: Into<String>> From<T> for NavigateParams {
    fn from(url: T) -> Self {
        NavigateParams::new(url)
    }
}

impl Method for NavigateParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

/// `errorText` is set when the navigation was answered but could not be
/// carried out (net errors, blocked loads). An absent `errorText` with a
/// present `loaderId` means the load was started.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateReturns {
    pub frame_id: FrameId,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
}

impl Command for NavigateParams {
    type Response = NavigateReturns;
}

/// How the `Page.printToPDF` payload travels back: inline base64 or as an
/// `IO` stream handle read in chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    #[serde(rename = "ReturnAsBase64")]
    ReturnAsBase64,
    #[serde(rename = "ReturnAsStream")]
    ReturnAsStream,
}

/// 1:1 wire mapping of the resolved print geometry. All lengths in inches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintToPdfParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landscape: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_header_footer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_background: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_top: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_bottom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_right: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_css_page_size: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_mode: Option<TransferMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_tagged_pdf: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_document_outline: Option<bool>,
}

impl PrintToPdfParams {
    pub const IDENTIFIER: &'static str = "Page.printToPDF";
}

impl Method for PrintToPdfParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintToPdfReturns {
    /// Inline payload; present only in `ReturnAsBase64` mode.
    #[serde(default)]
    pub data: Option<String>,
    /// Stream handle; present only in `ReturnAsStream` mode.
    #[serde(default)]
    pub stream: Option<StreamHandle>,
}

impl Command for PrintToPdfParams {
    type Response = PrintToPdfReturns;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Mhtml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshotParams {
    pub format: SnapshotFormat,
}

impl CaptureSnapshotParams {
    pub const IDENTIFIER: &'static str = "Page.captureSnapshot";

    pub fn mhtml() -> Self {
        Self {
            format: SnapshotFormat::Mhtml,
        }
    }
}

impl Method for CaptureSnapshotParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshotReturns {
    pub data: String,
}

impl Command for CaptureSnapshotParams {
    type Response = CaptureSnapshotReturns;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetFrameTreeParams {}

impl GetFrameTreeParams {
    pub const IDENTIFIER: &'static str = "Page.getFrameTree";
}

impl Method for GetFrameTreeParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: FrameId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTree {
    pub frame: Frame,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFrameTreeReturns {
    pub frame_tree: FrameTree,
}

impl Command for GetFrameTreeParams {
    type Response = GetFrameTreeReturns;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLoadEventFired {
    pub timestamp: f64,
}

impl EventLoadEventFired {
    pub const IDENTIFIER: &'static str = "Page.loadEventFired";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDomContentEventFired {
    pub timestamp: f64,
}

impl EventDomContentEventFired {
    pub const IDENTIFIER: &'static str = "Page.domContentEventFired";
}

/// Lifecycle milestones for a frame. `name` is the milestone
/// (`DOMContentLoaded`, `load`, `networkIdle`, ...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLifecycleEvent {
    pub frame_id: FrameId,
    #[serde(default)]
    pub loader_id: Option<String>,
    pub name: String,
    pub timestamp: f64,
}

impl EventLifecycleEvent {
    pub const IDENTIFIER: &'static str = "Page.lifecycleEvent";
    pub const DOM_CONTENT_LOADED: &'static str = "DOMContentLoaded";
    pub const NETWORK_IDLE: &'static str = "networkIdle";
}
