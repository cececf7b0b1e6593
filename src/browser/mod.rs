//! Locating, launching and supervising the chromium child process.

mod config;
mod locate;
mod port;
mod process;

pub use config::{BrowserConfig, BrowserConfigBuilder};
pub use locate::find_chromium;
pub use port::pick_free_port;
pub use process::{BrowserEndpoint, BrowserProcess, VersionInfo};
