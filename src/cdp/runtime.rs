//! `Runtime` domain: script evaluation inside the page.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{Command, Method};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_by_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub await_promise: Option<bool>,
}

impl EvaluateParams {
    pub const IDENTIFIER: &'static str = "Runtime.evaluate";

    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            return_by_value: Some(true),
            await_promise: None,
        }
    }
}

impl<T: Into<String>> From<T> for EvaluateParams {
    fn from(expr: T) -> Self {
        EvaluateParams::new(expr)
    }
}

impl Method for EvaluateParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

/// Subset of the protocol's `Runtime.RemoteObject` that evaluation results
/// need: primitives come back in `value` when `returnByValue` is set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub line_number: Option<i64>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best human-readable description of the thrown value.
    pub fn describe(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateReturns {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

impl Command for EvaluateParams {
    type Response = EvaluateReturns;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_returns_parse_string_value() {
        let ret: EvaluateReturns =
            serde_json::from_str(r#"{"result":{"type":"string","value":"done"}}"#).unwrap();
        assert_eq!(ret.result.value, Some(serde_json::json!("done")));
        assert!(ret.exception_details.is_none());
    }

    #[test]
    fn exception_description_prefers_the_thrown_value() {
        let ret: EvaluateReturns = serde_json::from_str(
            r#"{"result":{},"exceptionDetails":{"text":"Uncaught","exception":{"description":"Error: boom"}}}"#,
        )
        .unwrap();
        assert_eq!(ret.exception_details.unwrap().describe(), "Error: boom");
    }
}
