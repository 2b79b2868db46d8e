mod app;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use app::{Cli, data_io::default_log_path};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs go to stderr and to a file. The returned guard flushes the file
/// writer on drop and must outlive the run.
fn init_tracing(log_path: &str) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let path = Path::new(log_path);
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "snapsweep.log".into());

    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!(
            "cannot create log directory {}: {err}; logging to stderr only",
            dir.display()
        );
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_path = cli
        .command
        .common()
        .log
        .clone()
        .unwrap_or_else(|| default_log_path(cli.command.name()));
    let _guard = init_tracing(&log_path);

    match app::run(cli).await {
        Ok(summary) if summary.warning == 0 && summary.failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            error!("{err}");
            ExitCode::from(2)
        }
    }
}
