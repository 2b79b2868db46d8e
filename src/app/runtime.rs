use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{error, info, warn};

use super::batch::{cancel_flag, run_batch};
use super::browser::BrowserHandle;
use super::capture::{CaptureMode, Executor, ExecutorConfig};
use super::data_io::{default_report_path, read_product_items, read_url_items};
use super::error::BatchError;
use super::notify::notify_completion;
use super::report::{Summary, summarize, write_html_report};
use super::types::{Cli, CommandArg, CommonArgs, NotFoundPolicy, sanitize_concurrency};

const DEFAULT_VIEWPORT: (u32, u32) = (1920, 1080);

/// Runs one batch end to end: ingest, dispatch, report, notify. Fatal errors
/// abort before dispatch; everything per-item lives in the outcome list.
pub async fn run(cli: Cli) -> Result<Summary, BatchError> {
    let command_name = cli.command.name();
    let common = cli.command.common().clone();
    let started = Instant::now();
    let started_at = Local::now();

    let csv_path = PathBuf::from(&common.csv);
    let (items, mode, policy, viewport) = match &cli.command {
        CommandArg::Screenshot(args) => {
            let output_dir = PathBuf::from(&args.output);
            std::fs::create_dir_all(&output_dir).map_err(|err| {
                BatchError::Input(format!("cannot create {}: {err}", output_dir.display()))
            })?;
            (
                read_url_items(&csv_path, "screenshot")?,
                CaptureMode::Screenshot {
                    output_dir,
                    full_page: args.full_page,
                },
                NotFoundPolicy::Fail,
                (args.width, args.height),
            )
        }
        CommandArg::Probe(args) => (
            read_url_items(&csv_path, "url")?,
            CaptureMode::Probe,
            args.treat_not_found,
            DEFAULT_VIEWPORT,
        ),
        CommandArg::Harvest(args) => {
            let output_dir = PathBuf::from(&args.output);
            std::fs::create_dir_all(&output_dir).map_err(|err| {
                BatchError::Input(format!("cannot create {}: {err}", output_dir.display()))
            })?;
            (
                read_product_items(&csv_path)?,
                CaptureMode::Harvest {
                    output_dir,
                    selector: args.selector.clone(),
                },
                NotFoundPolicy::Fail,
                DEFAULT_VIEWPORT,
            )
        }
    };

    if items.is_empty() {
        return Err(BatchError::Input(format!(
            "no usable rows in {}",
            csv_path.display()
        )));
    }
    let concurrency = sanitize_concurrency(common.concurrency);
    info!(
        command = command_name,
        items = items.len(),
        concurrency,
        host = %common.host,
        timeout_ms = common.timeout_ms,
        "batch starting"
    );

    let browser = BrowserHandle::launch(viewport.0, viewport.1).await?;

    let cancel = cancel_flag();
    let interrupt_cancel = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; in-flight items will finish, nothing new starts");
            interrupt_cancel.store(true, Ordering::Relaxed);
        }
    });

    let executor = Arc::new(Executor::new(
        browser.browser(),
        ExecutorConfig {
            host: common.host.clone(),
            nav_timeout: Duration::from_millis(common.timeout_ms),
            settle_timeout: Duration::from_millis(common.settle_ms),
            delay_range_ms: (common.delay_min_ms, common.delay_max_ms),
        },
        mode,
    ));
    let shared = executor.clone();
    let outcomes = run_batch(items, concurrency, cancel, move |item| {
        shared.clone().execute(item)
    })
    .await;
    interrupt.abort();

    // The executor must be gone before shutdown so the browser handle is the
    // last owner of the process.
    drop(executor);
    browser.shutdown().await;

    let summary = summarize(&outcomes, policy);
    let duration = started.elapsed();
    info!(
        total = summary.total,
        success = summary.success,
        warnings = summary.warning,
        failed = summary.failed,
        duration_secs = duration.as_secs_f64(),
        "batch finished"
    );

    let report_path = PathBuf::from(
        common
            .html
            .clone()
            .unwrap_or_else(|| default_report_path(command_name)),
    );
    let title = report_title(command_name);
    match write_html_report(&outcomes, policy, &report_path, title) {
        Ok(()) => info!(path = %report_path.display(), "HTML report written"),
        Err(err) => error!(error = %err, "failed to write HTML report"),
    }

    if !common.no_webhook {
        if let Some(webhook) = common.webhook.as_deref() {
            let text = completion_markdown(
                title,
                &common,
                &summary,
                duration,
                &started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            );
            notify_completion(
                webhook,
                common.webhook_secret.as_deref(),
                &format!("{title} completed"),
                &text,
            )
            .await;
        }
    }

    Ok(summary)
}

fn report_title(command_name: &str) -> &'static str {
    match command_name {
        "screenshot" => "Screenshot Report",
        "probe" => "URL Status Report",
        _ => "Image Harvest Report",
    }
}

fn completion_markdown(
    title: &str,
    common: &CommonArgs,
    summary: &Summary,
    duration: Duration,
    started_at: &str,
) -> String {
    format!(
        "### {title} completed\n\n\
         **Time**: {started_at}\n\n\
         **Results**: total {total} | ok {ok} | warnings {warn} | failed {failed}\n\n\
         **Duration**: {secs:.2}s\n\n\
         **Host**: `{host}`\n\n\
         **File**: `{csv}`\n",
        title = title,
        started_at = started_at,
        total = summary.total,
        ok = summary.success,
        warn = summary.warning,
        failed = summary.failed,
        secs = duration.as_secs_f64(),
        host = common.host,
        csv = common.csv,
    )
}
