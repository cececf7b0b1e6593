//! Convert HTML documents to PDF by driving a headless chromium instance
//! over the chrome devtools protocol.
//!
//! The crate splits along the protocol's own seams:
//!
//! * [`browser`] locates, launches and supervises the chromium child.
//! * [`session`] multiplexes request/response and event traffic over one
//!   WebSocket per target, correlated by call id.
//! * [`convert`] drives a single conversion: navigate, wait, script,
//!   `printToPDF`, stream read.
//! * [`preprocess`] optionally rewrites the input document (plain-text
//!   wrapping, sanitization, content-sized pages, image validation)
//!   before the browser sees it.
//! * [`cache`] is the on-disk fetch cache behind the pre-processor.
//! * [`pool`] runs many conversions across workers, one browser each.
//! * [`converter`] composes the above behind [`Converter`].
//!
//! ```no_run
//! use printoxide::{Converter, ConverterConfig};
//!
//! # async fn demo() -> printoxide::Result<()> {
//! let converter = Converter::new(ConverterConfig::default())?;
//! converter
//!     .convert("https://example.org/", std::path::Path::new("out.pdf"))
//!     .await?;
//! converter.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod cache;
pub mod cdp;
pub mod conn;
pub mod convert;
pub mod converter;
pub mod error;
pub mod pool;
pub mod preprocess;
pub mod session;

pub use crate::browser::{BrowserConfig, BrowserProcess};
pub use crate::cache::{CacheConfig, CacheLayout, FetchCache};
pub use crate::convert::{
    ConversionItem, ConversionOptions, ConversionStatus, ConvertInput, Orientation, PageSettings,
    PaperFormat, WaitCondition,
};
pub use crate::converter::{Converter, ConverterConfig, ConverterConfigBuilder};
pub use crate::error::{CdpError, Result};
pub use crate::pool::WorkerPool;
pub use crate::preprocess::{ImageOptions, PreProcessorOptions, SanitizePolicy};
pub use crate::session::Session;
