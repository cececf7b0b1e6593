//! Command-line front end: a thin adapter over [`printoxide::Converter`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use printoxide::convert::DEFAULT_CONVERSION_TIMEOUT;
use printoxide::preprocess::DEFAULT_PREWRAP_EXTENSIONS;
use printoxide::{
    CdpError, ConversionStatus, Converter, ConverterConfig, Orientation, PaperFormat, Result,
    SanitizePolicy, WaitCondition,
};

/// Convert a URL or HTML file to PDF with a headless chromium instance.
#[derive(Debug, Parser)]
#[command(name = "printoxide", version)]
struct Cli {
    /// URL, file path, or (with --input-is-list) a line-delimited list
    /// file; list lines may use `input|outputPath`.
    #[arg(long)]
    input: String,

    /// Treat --input as a list file and convert every line.
    #[arg(long)]
    input_is_list: bool,

    /// Destination PDF path, or the output directory in list mode.
    #[arg(long)]
    output: PathBuf,

    /// Landscape orientation.
    #[arg(long)]
    landscape: bool,

    /// Print header and footer.
    #[arg(long = "display-headerfooter")]
    display_header_footer: bool,

    #[arg(long)]
    print_background: bool,

    /// Zero all margins.
    #[arg(long)]
    no_margins: bool,

    #[arg(long)]
    scale: Option<f64>,

    /// Paper width in inches.
    #[arg(long)]
    paper_width: Option<f64>,

    /// Paper height in inches.
    #[arg(long)]
    paper_height: Option<f64>,

    #[arg(long)]
    margin_top: Option<f64>,

    #[arg(long)]
    margin_bottom: Option<f64>,

    #[arg(long)]
    margin_left: Option<f64>,

    #[arg(long)]
    margin_right: Option<f64>,

    /// Paper format: letter, legal, tabloid, ledger, a0-a6 or fit.
    #[arg(long)]
    paper_format: Option<String>,

    /// Browser window size as WIDTHxHEIGHT.
    #[arg(long)]
    window_size: Option<String>,

    /// Page selection, e.g. `1-5,8,11-13`.
    #[arg(long = "pageranges")]
    page_ranges: Option<String>,

    #[arg(long = "ignore-invalid-pageranges")]
    ignore_invalid_page_ranges: bool,

    /// Chromium executable to use instead of probing.
    #[arg(long, env = "PRINTOXIDE_CHROMIUM")]
    chromium_location: Option<PathBuf>,

    /// Persistent user profile directory.
    #[arg(long = "chromium-userprofile")]
    chromium_user_profile: Option<PathBuf>,

    /// Devtools port search space as `N` or `N-M`.
    #[arg(long = "portrange")]
    port_range: Option<String>,

    #[arg(long)]
    proxy_server: Option<String>,

    #[arg(long)]
    proxy_bypass_list: Option<String>,

    #[arg(long)]
    proxy_pac_url: Option<String>,

    /// HTTP basic auth user.
    #[arg(long)]
    user: Option<String>,

    /// HTTP basic auth password.
    #[arg(long)]
    password: Option<String>,

    /// Convert list items concurrently.
    #[arg(long)]
    multi_threading: bool,

    /// Worker count in list mode; defaults to the logical CPU count.
    #[arg(long)]
    max_concurrency_level: Option<usize>,

    /// Wait until window.status equals this value before printing.
    #[arg(long)]
    wait_for_window_status: Option<String>,

    /// Bound on the window.status wait, in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    wait_for_window_status_timeout: u64,

    /// Per-conversion timeout in milliseconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// After DOM readiness, wait at most this many milliseconds for media.
    #[arg(long)]
    media_load_timeout: Option<u64>,

    /// Per-command devtools reply timeout in milliseconds.
    #[arg(long)]
    web_socket_timeout: Option<u64>,

    /// Print on the first networkIdle lifecycle event.
    #[arg(long)]
    wait_for_network_idle: bool,

    /// Per-image fetch timeout in milliseconds.
    #[arg(long)]
    image_load_timeout: Option<u64>,

    /// Comma-separated extensions wrapped as plain text (default txt,log).
    #[arg(long)]
    pre_wrap_file_extensions: Option<String>,

    /// Text encoding override for local inputs.
    #[arg(long)]
    encoding: Option<String>,

    /// Downscale images to the printable width.
    #[arg(long)]
    image_resize: bool,

    /// Rotate images per EXIF orientation.
    #[arg(long)]
    image_rotate: bool,

    /// Run the HTML sanitizer before converting.
    #[arg(long)]
    sanitize_html: bool,

    /// Javascript evaluated after the page is ready.
    #[arg(long)]
    run_javascript: Option<String>,

    /// Semicolon-separated URL glob patterns to block.
    #[arg(long)]
    url_blacklist: Option<String>,

    /// Also write an mhtml snapshot next to each PDF.
    #[arg(long)]
    snapshot: bool,

    #[arg(long)]
    disk_cache_disabled: bool,

    #[arg(long, env = "PRINTOXIDE_CACHE_DIR")]
    disk_cache_directory: Option<PathBuf>,

    /// Cache size cap in megabytes.
    #[arg(long)]
    disk_cache_size: Option<u64>,

    /// Log file path; `{PID}`, `{DATE}` and `{TIME}` expand.
    #[arg(long, env = "PRINTOXIDE_LOGFILE")]
    logfile: Option<String>,

    #[arg(long)]
    no_sandbox: bool,

    #[arg(long)]
    enable_chromium_logging: bool,

    #[arg(long)]
    disable_gpu: bool,

    #[arg(long)]
    ignore_certificate_errors: bool,

    #[arg(long)]
    disable_crash_reporter: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.logfile.as_deref()) {
        eprintln!("printoxide: {e}");
        std::process::exit(1);
    }
    if let Err(e) = run(cli).await {
        eprintln!("printoxide: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let converter = Converter::new(config)?;

    if cli.input_is_list {
        let content = std::fs::read_to_string(&cli.input)
            .map_err(|e| CdpError::Config(format!("list file {}: {e}", cli.input)))?;
        std::fs::create_dir_all(&cli.output)?;
        let items = converter.parse_list(&content, &cli.output)?;
        let total = items.len();
        let results = converter.convert_many(items).await?;

        let mut failed = 0usize;
        let mut log = String::new();
        for item in &results {
            let line = match &item.status {
                ConversionStatus::Success => format!("ok {} -> {}", item.input.url(), item.output.display()),
                ConversionStatus::Failed(reason) => {
                    failed += 1;
                    format!("failed {} ({reason})", item.input.url())
                }
                ConversionStatus::Cancelled => {
                    failed += 1;
                    format!("cancelled {}", item.input.url())
                }
                ConversionStatus::Pending => {
                    failed += 1;
                    format!("pending {}", item.input.url())
                }
            };
            tracing::info!("{line}");
            log.push_str(&line);
            log.push('\n');
        }
        std::fs::write(cli.output.join("results.log"), log)?;

        if failed > 0 {
            return Err(CdpError::Config(format!(
                "{failed} of {total} conversions failed"
            )));
        }
    } else {
        converter.convert(&cli.input, &cli.output).await?;
        converter.shutdown().await;
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ConverterConfig> {
    let mut config = ConverterConfig::default();

    // Geometry.
    let settings = &mut config.page_settings;
    settings.orientation = if cli.landscape {
        Orientation::Landscape
    } else {
        Orientation::Portrait
    };
    if let Some(format) = &cli.paper_format {
        settings.paper_format = Some(format.parse::<PaperFormat>()?);
    }
    if let Some(width) = cli.paper_width {
        settings.paper_width = width;
    }
    if let Some(height) = cli.paper_height {
        settings.paper_height = height;
    }
    if cli.no_margins {
        settings.margin_top = 0.0;
        settings.margin_bottom = 0.0;
        settings.margin_left = 0.0;
        settings.margin_right = 0.0;
    }
    if let Some(margin) = cli.margin_top {
        settings.margin_top = margin;
    }
    if let Some(margin) = cli.margin_bottom {
        settings.margin_bottom = margin;
    }
    if let Some(margin) = cli.margin_left {
        settings.margin_left = margin;
    }
    if let Some(margin) = cli.margin_right {
        settings.margin_right = margin;
    }
    if let Some(scale) = cli.scale {
        settings.scale = scale;
    }
    settings.print_background = cli.print_background;
    settings.display_header_footer = cli.display_header_footer;
    settings.page_ranges = cli.page_ranges.clone();
    settings.ignore_invalid_page_ranges = cli.ignore_invalid_page_ranges;

    // Browser launch.
    let browser = &mut config.browser;
    browser.executable = cli.chromium_location.clone();
    browser.user_data_dir = cli.chromium_user_profile.clone();
    if let Some(range) = &cli.port_range {
        browser.port_range = parse_port_range(range)?;
    }
    if let Some(size) = &cli.window_size {
        browser.window_size = Some(parse_window_size(size)?);
    }
    browser.proxy_server = cli.proxy_server.clone();
    browser.proxy_bypass_list = cli.proxy_bypass_list.clone();
    browser.proxy_pac_url = cli.proxy_pac_url.clone();
    if cli.no_sandbox {
        browser.sandbox = false;
    }
    if cli.enable_chromium_logging {
        browser.enable_chromium_logging = true;
    }
    if cli.disable_gpu {
        browser.disable_gpu = true;
    }
    if cli.ignore_certificate_errors {
        browser.ignore_certificate_errors = true;
    }
    if cli.disable_crash_reporter {
        browser.disable_crash_reporter = true;
    }
    if let Some(ms) = cli.web_socket_timeout {
        browser.session_timeout = Duration::from_millis(ms);
    }

    // Wait condition, in configured priority.
    config.wait = if let Some(value) = &cli.wait_for_window_status {
        WaitCondition::WindowStatus {
            value: value.clone(),
            timeout: Duration::from_millis(cli.wait_for_window_status_timeout),
        }
    } else if cli.wait_for_network_idle {
        WaitCondition::NetworkIdle
    } else if let Some(ms) = cli.media_load_timeout {
        WaitCondition::MediaLoad {
            timeout: Duration::from_millis(ms),
        }
    } else {
        WaitCondition::Default
    };
    config.conversion_timeout = cli
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CONVERSION_TIMEOUT);

    config.run_javascript = cli.run_javascript.clone();
    config.snapshot = cli.snapshot;
    if let Some(patterns) = &cli.url_blacklist {
        config.url_blacklist = patterns
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }

    // Pre-processor.
    let preprocessor = &mut config.preprocessor;
    preprocessor.encoding = cli.encoding.clone();
    if let Some(extensions) = &cli.pre_wrap_file_extensions {
        preprocessor.pre_wrap_extensions = Some(
            extensions
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        );
    } else {
        preprocessor.pre_wrap_extensions = Some(
            DEFAULT_PREWRAP_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
    }
    if cli.sanitize_html {
        preprocessor.sanitize = Some(SanitizePolicy::default());
    }
    preprocessor.fit_page = config.page_settings.fit_page_to_content();
    if cli.image_resize || cli.image_rotate {
        let mut images = printoxide::ImageOptions {
            resize: cli.image_resize,
            rotate: cli.image_rotate,
            ..Default::default()
        };
        if let Some(ms) = cli.image_load_timeout {
            images.timeout = Duration::from_millis(ms);
        }
        preprocessor.images = Some(images);
    }

    // Cache.
    config.cache.enabled = !cli.disk_cache_disabled;
    if let Some(dir) = &cli.disk_cache_directory {
        config.cache.root = dir.clone();
    }
    if let Some(megabytes) = cli.disk_cache_size {
        config.cache.max_size = megabytes * 1024 * 1024;
    }

    // Pool.
    config.concurrency = if cli.multi_threading {
        cli.max_concurrency_level.unwrap_or_else(num_cpus::get)
    } else {
        1
    };

    if let (Some(user), Some(password)) = (&cli.user, &cli.password) {
        config.credentials = Some((user.clone(), password.clone()));
    }

    Ok(config)
}

fn parse_port_range(raw: &str) -> Result<(u16, u16)> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| CdpError::Config(format!("bad port range: {raw}")))
    };
    match raw.split_once('-') {
        Some((start, end)) => Ok((parse(start)?, parse(end)?)),
        None => {
            let port = parse(raw)?;
            Ok((port, port))
        }
    }
}

fn parse_window_size(raw: &str) -> Result<(u32, u32)> {
    let (width, height) = raw
        .split_once(['x', 'X', ','])
        .ok_or_else(|| CdpError::Config(format!("bad window size: {raw}")))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| CdpError::Config(format!("bad window size: {raw}")))
    };
    Ok((parse(width)?, parse(height)?))
}

/// Expand `{PID}`, `{DATE}` and `{TIME}` in the logfile pattern.
fn expand_logfile_pattern(pattern: &str) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let days = now / 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    let secs = now % 86_400;
    pattern
        .replace("{PID}", &std::process::id().to_string())
        .replace("{DATE}", &format!("{year:04}-{month:02}-{day:02}"))
        .replace(
            "{TIME}",
            &format!("{:02}-{:02}-{:02}", secs / 3600, (secs / 60) % 60, secs % 60),
        )
}

/// Gregorian date from days since the unix epoch.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = if month <= 2 { year + 1 } else { year };
    (year, month, day)
}

#[derive(Clone)]
struct LogWriter(Arc<std::fs::File>);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&*self.0).flush()
    }
}

fn init_logging(logfile: Option<&str>) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match logfile {
        Some(pattern) => {
            let path = expand_logfile_pattern(pattern);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| CdpError::Config(format!("logfile {path}: {e}")))?;
            let writer = LogWriter(Arc::new(file));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
