//! What gets converted: a URI plus per-request metadata.

use std::collections::HashMap;
use std::path::Path;

use url::Url;

use crate::error::{CdpError, Result};

/// One document to convert. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ConvertInput {
    url: Url,
    /// Overrides encoding sniffing in the pre-processor.
    encoding: Option<String>,
    /// Extra HTTP request headers sent while navigating.
    headers: HashMap<String, String>,
}

impl ConvertInput {
    /// Accepts `http`, `https`, `file` and `data` URIs, or a filesystem
    /// path which is canonicalized into a `file` URI.
    pub fn parse(input: &str) -> Result<Self> {
        let url = match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "file" | "data") => url,
            Ok(url) => {
                // Single-letter schemes are how windows drive paths parse.
                if url.scheme().len() == 1 {
                    Self::from_path(Path::new(input))?.url
                } else {
                    return Err(CdpError::Config(format!(
                        "unsupported scheme {} in input {input}",
                        url.scheme()
                    )));
                }
            }
            Err(_) => Self::from_path(Path::new(input))?.url,
        };
        Ok(Self {
            url,
            encoding: None,
            headers: HashMap::new(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let absolute = dunce::canonicalize(path)
            .map_err(|e| CdpError::Config(format!("input {}: {e}", path.display())))?;
        let url = Url::from_file_path(&absolute).map_err(|()| {
            CdpError::Config(format!("input path {} is not absolute", path.display()))
        })?;
        Ok(Self {
            url,
            encoding: None,
            headers: HashMap::new(),
        })
    }

    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            encoding: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Local inputs wait on DOM readiness instead of the load event.
    pub fn is_local(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// The local path behind a `file` URI, if that is what this is.
    pub fn to_file_path(&self) -> Option<std::path::PathBuf> {
        if self.is_local() {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }

    /// Swap the URI while keeping encoding and headers, used when a
    /// pre-processor pass materializes a rewritten copy.
    pub(crate) fn rewritten(&self, url: Url) -> Self {
        Self {
            url,
            encoding: self.encoding.clone(),
            headers: self.headers.clone(),
        }
    }
}
