use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser::BrowserHandle;
use super::data_io::{sanitize_name, unique_filename};
use super::resolve::{image_extension, resolve_image_src, resolve_target};
use super::types::{
    ErrorKind, Outcome, WorkItem, classify_driver_error, classify_status,
};

/// What happens after a successful navigation.
#[derive(Debug, Clone)]
pub enum CaptureMode {
    Screenshot { output_dir: PathBuf, full_page: bool },
    Probe,
    Harvest { output_dir: PathBuf, selector: String },
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub host: String,
    pub nav_timeout: Duration,
    pub settle_timeout: Duration,
    pub delay_range_ms: (u64, u64),
}

/// Per-item executor bound to the shared browser. One `execute` call owns one
/// isolated context and page for its whole lifetime and tears both down on
/// every exit path.
pub struct Executor {
    browser: Arc<Browser>,
    config: ExecutorConfig,
    mode: CaptureMode,
    used_names: Mutex<HashSet<String>>,
}

impl Executor {
    pub fn new(browser: Arc<Browser>, config: ExecutorConfig, mode: CaptureMode) -> Self {
        Self {
            browser,
            config,
            mode,
            used_names: Mutex::new(HashSet::new()),
        }
    }

    pub async fn execute(self: Arc<Self>, item: WorkItem) -> Outcome {
        let url = match resolve_target(&item.target_url_fragment, &self.config.host) {
            Ok(url) => url,
            Err(err) => {
                warn!(seq = item.sequence_index, error = %err, "unresolvable target");
                return Outcome::failed(
                    &item,
                    &item.target_url_fragment,
                    None,
                    ErrorKind::NavigationError,
                    err,
                );
            }
        };

        // Pacing, not correctness: spreads item starts to avoid tripping
        // server-side rate limits.
        let (min, max) = self.config.delay_range_ms;
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(min..=max.max(min))
        };
        debug!(seq = item.sequence_index, delay_ms = delay, "pre-navigation delay");
        tokio::time::sleep(Duration::from_millis(delay)).await;

        info!(seq = item.sequence_index, url = %url, "processing item");
        let session = match BrowserHandle::open_item_session(&self.browser).await {
            Ok(session) => session,
            Err(err) => {
                let (kind, message) = classify_driver_error(&err);
                warn!(seq = item.sequence_index, error = %message, "context open failed");
                return Outcome::failed(&item, &url, None, kind, message);
            }
        };

        let outcome = self.run_item(&session.page, &item, &url).await;
        BrowserHandle::close_item_session(&self.browser, session).await;

        match outcome.error_kind {
            None => info!(
                seq = item.sequence_index,
                status = outcome.http_status.unwrap_or(0),
                "item succeeded"
            ),
            Some(kind) => warn!(
                seq = item.sequence_index,
                kind = kind.label(),
                error = %outcome.error_message,
                "item failed"
            ),
        }
        outcome
    }

    /// Navigate, classify, capture. The caller owns page teardown.
    async fn run_item(&self, page: &Page, item: &WorkItem, url: &str) -> Outcome {
        let status_capture = spawn_status_capture(page).await;

        let navigated = tokio::time::timeout(self.config.nav_timeout, page.goto(url)).await;
        match navigated {
            Err(_) => {
                abort_status_capture(status_capture);
                return Outcome::failed(
                    item,
                    url,
                    None,
                    ErrorKind::Timeout,
                    format!(
                        "navigation timeout after {}ms",
                        self.config.nav_timeout.as_millis()
                    ),
                );
            }
            Ok(Err(err)) => {
                abort_status_capture(status_capture);
                let (kind, message) = classify_driver_error(&err.to_string());
                return Outcome::failed(item, url, None, kind, message);
            }
            Ok(Ok(_)) => {}
        }

        // Best-effort settle wait; timing out here only affects how fresh the
        // captured state is.
        if tokio::time::timeout(self.config.settle_timeout, page.wait_for_navigation())
            .await
            .is_err()
        {
            debug!(seq = item.sequence_index, "settle wait timed out, continuing");
        }

        let http_status = await_status(status_capture).await;
        let status = match classify_status(http_status) {
            Ok(status) => status,
            Err((kind, message)) => {
                return Outcome::failed(item, url, http_status, kind, message);
            }
        };

        match &self.mode {
            CaptureMode::Probe => Outcome::success(item, url, status, Vec::new()),
            CaptureMode::Screenshot {
                output_dir,
                full_page,
            } => {
                self.capture_screenshot(page, item, url, status, output_dir, *full_page)
                    .await
            }
            CaptureMode::Harvest {
                output_dir,
                selector,
            } => {
                self.harvest_images(page, item, url, status, output_dir, selector)
                    .await
            }
        }
    }

    async fn capture_screenshot(
        &self,
        page: &Page,
        item: &WorkItem,
        url: &str,
        status: u16,
        output_dir: &Path,
        full_page: bool,
    ) -> Outcome {
        let filename = {
            let mut used = match self.used_names.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            unique_filename(&sanitize_name(&item.display_name), "png", &mut used)
        };
        let path = output_dir.join(&filename);

        let image = match page
            .screenshot(ScreenshotParams::builder().full_page(full_page).build())
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                let (kind, message) = classify_driver_error(&err.to_string());
                return Outcome::failed(item, url, Some(status), kind, message);
            }
        };
        if let Err(err) = tokio::fs::write(&path, &image).await {
            return Outcome::failed(
                item,
                url,
                Some(status),
                ErrorKind::NavigationError,
                format!("cannot write {}: {err}", path.display()),
            );
        }

        debug!(seq = item.sequence_index, file = %path.display(), "screenshot saved");
        Outcome::success(item, url, status, vec![path.display().to_string()])
    }

    async fn harvest_images(
        &self,
        page: &Page,
        item: &WorkItem,
        url: &str,
        status: u16,
        output_dir: &Path,
        selector: &str,
    ) -> Outcome {
        let sources = match collect_image_sources(page, selector).await {
            Ok(sources) => sources,
            Err(err) => {
                let (kind, message) = classify_driver_error(&err);
                return Outcome::failed(item, url, Some(status), kind, message);
            }
        };
        if sources.is_empty() {
            return Outcome::failed(
                item,
                url,
                Some(status),
                ErrorKind::NoImagesFound,
                format!("no images matched '{selector}'"),
            );
        }
        debug!(seq = item.sequence_index, count = sources.len(), "images matched");

        let item_dir = output_dir.join(sanitize_name(&item.identifier));
        if let Err(err) = tokio::fs::create_dir_all(&item_dir).await {
            return Outcome::failed(
                item,
                url,
                Some(status),
                ErrorKind::NavigationError,
                format!("cannot create {}: {err}", item_dir.display()),
            );
        }

        let mut saved = Vec::new();
        for (img_idx, src) in sources.iter().enumerate() {
            let img_idx = img_idx + 1;
            if src.is_empty() {
                debug!(seq = item.sequence_index, img = img_idx, "image without src, skipped");
                continue;
            }
            let img_url = resolve_image_src(src, &self.config.host);
            let ext = image_extension(&img_url);
            let path = item_dir.join(format!(
                "{}_{img_idx:02}.{ext}",
                sanitize_name(&item.identifier)
            ));

            match fetch_image_bytes(page, &img_url).await {
                Ok(bytes) => {
                    if let Err(err) = tokio::fs::write(&path, &bytes).await {
                        warn!(seq = item.sequence_index, img = img_idx, error = %err, "image write failed");
                        continue;
                    }
                    debug!(seq = item.sequence_index, img = img_idx, file = %path.display(), "image saved");
                    saved.push(path.display().to_string());
                }
                Err(err) => {
                    warn!(seq = item.sequence_index, img = img_idx, error = %err, "image download failed");
                }
            }
        }

        if saved.is_empty() {
            Outcome::failed(
                item,
                url,
                Some(status),
                ErrorKind::AllDownloadsFailed,
                format!("none of the {} matched images could be downloaded", sources.len()),
            )
        } else {
            Outcome::success(item, url, status, saved)
        }
    }
}

struct StatusCapture {
    receiver: oneshot::Receiver<u16>,
    task: JoinHandle<()>,
}

/// Subscribes to network responses before navigation starts. The first
/// response observed on a fresh page is the main document, including after
/// redirects, so its status is the navigation status.
async fn spawn_status_capture(page: &Page) -> Option<StatusCapture> {
    let mut events = match page.event_listener::<EventResponseReceived>().await {
        Ok(events) => events,
        Err(err) => {
            debug!(error = %err, "response listener unavailable");
            return None;
        }
    };
    let (tx, receiver) = oneshot::channel();
    let task = tokio::spawn(async move {
        if let Some(event) = events.next().await {
            let _ = tx.send(event.response.status as u16);
        }
    });
    Some(StatusCapture { receiver, task })
}

async fn await_status(capture: Option<StatusCapture>) -> Option<u16> {
    let capture = capture?;
    let status = tokio::time::timeout(Duration::from_millis(500), capture.receiver)
        .await
        .ok()
        .and_then(|received| received.ok());
    capture.task.abort();
    status
}

fn abort_status_capture(capture: Option<StatusCapture>) {
    if let Some(capture) = capture {
        capture.task.abort();
    }
}

async fn collect_image_sources(page: &Page, selector: &str) -> Result<Vec<String>, String> {
    let selector_json =
        serde_json::to_string(selector).map_err(|err| format!("bad selector: {err}"))?;
    let js = format!(
        "Array.from(document.querySelectorAll({selector_json})).map(el => el.getAttribute('src') || '')"
    );
    let evaluated = page.evaluate(js).await.map_err(|err| err.to_string())?;
    evaluated
        .into_value::<Vec<String>>()
        .map_err(|err| format!("unexpected selector result: {err}"))
}

/// Downloads an image from inside the page so the request carries the page's
/// cookies and referrer, then decodes the data-URL the bridge returns.
async fn fetch_image_bytes(page: &Page, img_url: &str) -> Result<Vec<u8>, String> {
    let url_json = serde_json::to_string(img_url).map_err(|err| err.to_string())?;
    let js = format!(
        r#"(async () => {{
            const response = await fetch({url_json});
            if (!response.ok) {{
                throw new Error('fetch failed: ' + response.status);
            }}
            const blob = await response.blob();
            const reader = new FileReader();
            return await new Promise((resolve, reject) => {{
                reader.onloadend = () => resolve(reader.result);
                reader.onerror = () => reject(new Error('read failed'));
                reader.readAsDataURL(blob);
            }});
        }})()"#
    );
    let evaluated = page.evaluate(js).await.map_err(|err| err.to_string())?;
    let data_url: String = evaluated
        .into_value()
        .map_err(|err| format!("unexpected fetch bridge result: {err}"))?;
    let encoded = data_url
        .split_once(',')
        .map(|(_, rest)| rest)
        .ok_or_else(|| "bridge returned no data URL".to_string())?;
    BASE64
        .decode(encoded)
        .map_err(|err| format!("invalid base64 payload: {err}"))
}
