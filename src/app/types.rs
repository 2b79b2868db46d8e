use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "snapsweep",
    version,
    about = "Batch page screenshots, status probing and image harvesting driven by CSV URL lists"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CommandArg,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandArg {
    /// Capture a screenshot of every URL listed in the CSV
    Screenshot(ScreenshotArgs),
    /// Probe every URL for its HTTP status without capturing anything
    Probe(ProbeArgs),
    /// Download product images from the content container of every product page
    Harvest(HarvestArgs),
}

impl CommandArg {
    pub fn common(&self) -> &CommonArgs {
        match self {
            CommandArg::Screenshot(args) => &args.common,
            CommandArg::Probe(args) => &args.common,
            CommandArg::Harvest(args) => &args.common,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandArg::Screenshot(_) => "screenshot",
            CommandArg::Probe(_) => "probe",
            CommandArg::Harvest(_) => "harvest",
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
    /// Default host used when a CSV row has no scheme/authority
    #[arg(long, value_name = "URL")]
    pub host: String,

    /// CSV file with the rows to process
    #[arg(long, value_name = "FILE")]
    pub csv: String,

    /// HTML report destination (default depends on the command)
    #[arg(long, value_name = "FILE")]
    pub html: Option<String>,

    /// Log file path (default: ./logs/<command>_<timestamp>.log)
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log: Option<String>,

    #[arg(short = 'c', long, value_name = "N", default_value_t = 5)]
    pub concurrency: usize,

    /// Hard navigation timeout per page
    #[arg(long = "timeout", value_name = "MS", default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Best-effort settle wait after the load signal; timing out here is not a failure
    #[arg(long = "settle", value_name = "MS", default_value_t = 3_000)]
    pub settle_ms: u64,

    /// Lower bound of the randomized pre-navigation delay
    #[arg(long, value_name = "MS", default_value_t = 1_000)]
    pub delay_min_ms: u64,

    /// Upper bound of the randomized pre-navigation delay
    #[arg(long, value_name = "MS", default_value_t = 4_000)]
    pub delay_max_ms: u64,

    /// Chat webhook notified after the batch completes
    #[arg(long, value_name = "URL")]
    pub webhook: Option<String>,

    /// HMAC-SHA256 signing secret for the webhook
    #[arg(long, value_name = "SECRET")]
    pub webhook_secret: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_webhook: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ScreenshotArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Directory the screenshots are written to
    #[arg(short = 'o', long, value_name = "DIR", default_value = "./screenshots")]
    pub output: String,

    #[arg(long, value_name = "PX", default_value_t = 1920)]
    pub width: u32,

    #[arg(long, value_name = "PX", default_value_t = 1080)]
    pub height: u32,

    /// Capture the full scroll height instead of the viewport
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub full_page: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Report bucket for 404 responses
    #[arg(long = "treat-404", value_enum, default_value_t = NotFoundPolicy::Warn)]
    pub treat_not_found: NotFoundPolicy,
}

#[derive(Debug, Args, Clone)]
pub struct HarvestArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Directory the images are written to, one subdirectory per product
    #[arg(short = 'o', long, value_name = "DIR", default_value = "./images")]
    pub output: String,

    /// CSS selector matching the images inside the content container
    #[arg(
        long,
        value_name = "SELECTOR",
        default_value = ".stackable-image-container img"
    )]
    pub selector: String,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// 404 rows land in the failed bucket
    Fail,
    /// 404 rows land in a distinct warning bucket
    Warn,
}

/// One row of work parsed from the CSV, consumed exactly once by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub sequence_index: usize,
    pub identifier: String,
    pub target_url_fragment: String,
    pub display_name: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Network,
    NavigationError,
    NoResponse,
    NotFound,
    ServerError,
    ClientError,
    NoImagesFound,
    AllDownloadsFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::NavigationError => "navigation_error",
            ErrorKind::NoResponse => "no_response",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::NoImagesFound => "no_images_found",
            ErrorKind::AllDownloadsFailed => "all_downloads_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Terminal record for one work item. Exactly one is produced per item,
/// regardless of what happened during execution.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub sequence_index: usize,
    pub identifier: String,
    pub display_name: String,
    pub absolute_url: String,
    pub status: OutcomeStatus,
    pub http_status: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: String,
    pub artifact_paths: Vec<String>,
}

impl Outcome {
    pub fn success(
        item: &WorkItem,
        absolute_url: &str,
        http_status: u16,
        artifact_paths: Vec<String>,
    ) -> Self {
        Self {
            sequence_index: item.sequence_index,
            identifier: item.identifier.clone(),
            display_name: item.display_name.clone(),
            absolute_url: absolute_url.to_string(),
            status: OutcomeStatus::Success,
            http_status: Some(http_status),
            error_kind: None,
            error_message: String::new(),
            artifact_paths,
        }
    }

    pub fn failed(
        item: &WorkItem,
        absolute_url: &str,
        http_status: Option<u16>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sequence_index: item.sequence_index,
            identifier: item.identifier.clone(),
            display_name: item.display_name.clone(),
            absolute_url: absolute_url.to_string(),
            status: OutcomeStatus::Failed,
            http_status,
            error_kind: Some(kind),
            error_message: message.into(),
            artifact_paths: Vec::new(),
        }
    }

    pub fn cancelled(item: &WorkItem) -> Self {
        Self::failed(
            item,
            &item.target_url_fragment,
            None,
            ErrorKind::Cancelled,
            "batch cancelled before this item started",
        )
    }
}

/// Maps a navigation response to either a pass-through status (capture may
/// proceed) or a classified failure.
pub fn classify_status(http_status: Option<u16>) -> Result<u16, (ErrorKind, String)> {
    match http_status {
        None => Err((ErrorKind::NoResponse, "no response received".to_string())),
        Some(404) => Err((ErrorKind::NotFound, "HTTP 404".to_string())),
        Some(status) if status >= 500 => Err((ErrorKind::ServerError, format!("HTTP {status}"))),
        Some(status) if status >= 400 => Err((ErrorKind::ClientError, format!("HTTP {status}"))),
        Some(status) => Ok(status),
    }
}

/// Substring heuristic over raw driver errors. Anything unmatched is a plain
/// navigation error.
pub fn classify_driver_error(message: &str) -> (ErrorKind, String) {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") {
        (ErrorKind::Timeout, message.to_string())
    } else if lower.contains("net::") || lower.contains("dns") || lower.contains("name not resolved")
    {
        (ErrorKind::Network, message.to_string())
    } else {
        (ErrorKind::NavigationError, message.to_string())
    }
}

const MAX_CONCURRENCY: usize = 64;

pub fn sanitize_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(idx: usize) -> WorkItem {
        WorkItem {
            sequence_index: idx,
            identifier: format!("id-{idx}"),
            target_url_fragment: "/p/1".to_string(),
            display_name: format!("item-{idx}"),
        }
    }

    #[test]
    fn status_classification_buckets() {
        assert_eq!(classify_status(Some(200)), Ok(200));
        assert_eq!(classify_status(Some(302)), Ok(302));
        assert_eq!(
            classify_status(Some(404)).unwrap_err().0,
            ErrorKind::NotFound
        );
        assert_eq!(
            classify_status(Some(503)).unwrap_err().0,
            ErrorKind::ServerError
        );
        assert_eq!(
            classify_status(Some(403)).unwrap_err().0,
            ErrorKind::ClientError
        );
        assert_eq!(classify_status(None).unwrap_err().0, ErrorKind::NoResponse);
    }

    #[test]
    fn driver_error_heuristic() {
        assert_eq!(
            classify_driver_error("Navigation Timeout Exceeded: 30000ms").0,
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_driver_error("net::ERR_NAME_NOT_RESOLVED").0,
            ErrorKind::Network
        );
        assert_eq!(
            classify_driver_error("lookup failed: name not resolved").0,
            ErrorKind::Network
        );
        assert_eq!(
            classify_driver_error("Protocol error (Page.navigate): target closed").0,
            ErrorKind::NavigationError
        );
    }

    #[test]
    fn outcome_constructors_carry_item_fields() {
        let success = Outcome::success(&item(3), "https://h.test/p/1", 200, vec!["a.png".into()]);
        assert_eq!(success.sequence_index, 3);
        assert_eq!(success.status, OutcomeStatus::Success);
        assert_eq!(success.http_status, Some(200));

        let failed = Outcome::failed(
            &item(4),
            "https://h.test/p/1",
            Some(404),
            ErrorKind::NotFound,
            "HTTP 404",
        );
        assert_eq!(failed.status, OutcomeStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::NotFound));
        assert!(failed.artifact_paths.is_empty());
    }

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(sanitize_concurrency(0), 1);
        assert_eq!(sanitize_concurrency(5), 5);
        assert_eq!(sanitize_concurrency(10_000), 64);
    }
}
