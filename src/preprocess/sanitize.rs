//! Policy-driven HTML sanitization.
//!
//! The policy decides what gets stripped; this module only wires it into
//! the rewrite and reports every removal so the caller can log them.

use std::cell::RefCell;

use lol_html::{element, rewrite_str, RewriteStrSettings};

use crate::error::{CdpError, Result};

/// What the sanitizer strips.
#[derive(Debug, Clone)]
pub struct SanitizePolicy {
    /// Elements removed wholesale, with their content.
    pub remove_elements: Vec<String>,
    /// Attributes removed when their name starts with one of these.
    pub attribute_prefixes: Vec<String>,
    /// Strip `href`/`src` values using these URL schemes.
    pub forbidden_schemes: Vec<String>,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self {
            remove_elements: ["script", "object", "embed", "applet"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            attribute_prefixes: vec!["on".to_string()],
            forbidden_schemes: vec!["javascript".to_string()],
        }
    }
}

#[derive(Debug)]
pub struct SanitizeOutcome {
    pub html: String,
    /// One entry per removal, suitable for logging.
    pub removed: Vec<String>,
}

impl SanitizeOutcome {
    pub fn changed(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Run `policy` over `html`.
pub fn sanitize(html: &str, policy: &SanitizePolicy) -> Result<SanitizeOutcome> {
    // The selector macro panics on malformed selectors, so reject bad
    // element names from configuration up front.
    for name in &policy.remove_elements {
        let mut chars = name.chars();
        let valid = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(CdpError::PreProcessor(format!(
                "invalid element name in sanitize policy: {name}"
            )));
        }
    }

    let removed = RefCell::new(Vec::new());
    let element_selector = policy.remove_elements.join(", ");

    let mut handlers = Vec::new();
    if !policy.remove_elements.is_empty() {
        handlers.push(element!(element_selector, |el| {
            removed
                .borrow_mut()
                .push(format!("element <{}>", el.tag_name()));
            el.remove();
            Ok(())
        }));
    }
    handlers.push(element!("*", |el| {
        let names: Vec<String> = el
            .attributes()
            .iter()
            .map(|attr| attr.name())
            .collect();
        for name in names {
            let strip = policy
                .attribute_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
                || (matches!(name.as_str(), "href" | "src")
                    && el
                        .get_attribute(&name)
                        .map(|value| has_forbidden_scheme(&value, &policy.forbidden_schemes))
                        .unwrap_or(false));
            if strip {
                removed
                    .borrow_mut()
                    .push(format!("attribute {name} on <{}>", el.tag_name()));
                el.remove_attribute(&name);
            }
        }
        Ok(())
    }));

    let html = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| CdpError::PreProcessor(format!("sanitize rewrite failed: {e}")))?;

    Ok(SanitizeOutcome {
        html,
        removed: removed.into_inner(),
    })
}

fn has_forbidden_scheme(value: &str, schemes: &[String]) -> bool {
    let trimmed = value.trim_start().to_ascii_lowercase();
    schemes
        .iter()
        .any(|scheme| trimmed.starts_with(&format!("{scheme}:")))
}
