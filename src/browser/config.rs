//! Launch configuration and command-line assembly for the browser child.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CdpError, Result};
use crate::session::DEFAULT_SESSION_TIMEOUT;

/// Ports probed for the remote debugging endpoint when the caller does not
/// narrow the range.
pub const DEFAULT_PORT_RANGE: (u16, u16) = (9222, 9322);

/// Deadline for the child to announce its devtools endpoint on stderr.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between `Browser.close` and killing the child.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a browser child is located, launched and torn down.
///
/// Built via [`BrowserConfig::builder`]; invalid combinations are rejected
/// at build time and never during a conversion.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    /// Profile directory. `None` means a unique temporary directory per
    /// process, removed again on shutdown.
    pub user_data_dir: Option<PathBuf>,
    pub port_range: (u16, u16),
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window_size: Option<(u32, u32)>,
    pub user_agent: Option<String>,
    pub proxy_server: Option<String>,
    pub proxy_bypass_list: Option<String>,
    pub proxy_pac_url: Option<String>,
    pub ignore_certificate_errors: bool,
    pub enable_chromium_logging: bool,
    pub disable_crash_reporter: bool,
    /// Caller-supplied flags appended verbatim after the assembled set.
    pub extra_args: Vec<String>,
    pub process_envs: HashMap<String, String>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Per-command reply timeout on the devtools sessions.
    pub session_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            user_data_dir: None,
            port_range: DEFAULT_PORT_RANGE,
            headless: true,
            sandbox: true,
            disable_gpu: true,
            window_size: None,
            user_agent: None,
            proxy_server: None,
            proxy_bypass_list: None,
            proxy_pac_url: None,
            ignore_certificate_errors: false,
            enable_chromium_logging: false,
            disable_crash_reporter: true,
            extra_args: Vec::new(),
            process_envs: HashMap::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl BrowserConfig {
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }

    /// The full launch argument list for `port` and `user_data_dir`.
    pub fn args(&self, port: u16, user_data_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={port}"),
            format!("--user-data-dir={}", user_data_dir.display()),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-sync".to_string(),
            "--disable-translate".to_string(),
            "--disable-background-networking".to_string(),
            "--disable-extensions".to_string(),
            "--disable-default-apps".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--mute-audio".to_string(),
            "--hide-scrollbars".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if !self.sandbox {
            args.push("--no-sandbox".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some((width, height)) = self.window_size {
            args.push(format!("--window-size={width},{height}"));
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        if let Some(proxy) = &self.proxy_server {
            args.push(format!("--proxy-server={proxy}"));
        }
        if let Some(bypass) = &self.proxy_bypass_list {
            args.push(format!("--proxy-bypass-list={bypass}"));
        }
        if let Some(pac) = &self.proxy_pac_url {
            args.push(format!("--proxy-pac-url={pac}"));
        }
        if self.ignore_certificate_errors {
            args.push("--ignore-certificate-errors".to_string());
        }
        if self.enable_chromium_logging {
            args.push("--enable-logging".to_string());
            args.push("--v=1".to_string());
        }
        if self.disable_crash_reporter {
            args.push("--disable-crash-reporter".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[derive(Debug, Default)]
pub struct BrowserConfigBuilder {
    config: Option<BrowserConfig>,
}

impl BrowserConfigBuilder {
    fn config(&mut self) -> &mut BrowserConfig {
        self.config.get_or_insert_with(BrowserConfig::default)
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().executable = Some(path.into());
        self
    }

    pub fn user_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().user_data_dir = Some(path.into());
        self
    }

    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.config().port_range = (start, end);
        self
    }

    pub fn single_port(self, port: u16) -> Self {
        self.port_range(port, port)
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config().headless = headless;
        self
    }

    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.config().sandbox = sandbox;
        self
    }

    pub fn disable_gpu(mut self, disable: bool) -> Self {
        self.config().disable_gpu = disable;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.config().window_size = Some((width, height));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config().user_agent = Some(user_agent.into());
        self
    }

    pub fn proxy_server(mut self, proxy: impl Into<String>) -> Self {
        self.config().proxy_server = Some(proxy.into());
        self
    }

    pub fn proxy_bypass_list(mut self, bypass: impl Into<String>) -> Self {
        self.config().proxy_bypass_list = Some(bypass.into());
        self
    }

    pub fn proxy_pac_url(mut self, pac: impl Into<String>) -> Self {
        self.config().proxy_pac_url = Some(pac.into());
        self
    }

    pub fn ignore_certificate_errors(mut self, ignore: bool) -> Self {
        self.config().ignore_certificate_errors = ignore;
        self
    }

    pub fn enable_chromium_logging(mut self, enable: bool) -> Self {
        self.config().enable_chromium_logging = enable;
        self
    }

    pub fn disable_crash_reporter(mut self, disable: bool) -> Self {
        self.config().disable_crash_reporter = disable;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config().extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config()
            .extra_args
            .extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config().process_envs.insert(key.into(), value.into());
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config().startup_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config().shutdown_timeout = timeout;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config().session_timeout = timeout;
        self
    }

    pub fn build(mut self) -> Result<BrowserConfig> {
        let config = self.config().clone();
        let (start, end) = config.port_range;
        if start > end {
            return Err(CdpError::Config(format!(
                "port range start {start} exceeds end {end}"
            )));
        }
        if config.startup_timeout.is_zero() {
            return Err(CdpError::Config("startup timeout must be non-zero".into()));
        }
        Ok(config)
    }
}
