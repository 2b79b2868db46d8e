use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::BatchError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Launch flags trimmed down for unattended batch runs on constrained hosts.
/// TLS certificate errors are ignored by policy.
const LAUNCH_ARGS: [&str; 13] = [
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
    "--disable-notifications",
    "--disable-popup-blocking",
    "--no-first-run",
    "--mute-audio",
    "--ignore-certificate-errors",
    "--lang=en-US",
];

/// One headless Chromium process shared by the whole batch. Each item gets
/// its own browser context and page, never shared across tasks; the handle
/// itself is read-mostly.
pub struct BrowserHandle {
    browser: Arc<Browser>,
    event_loop: JoinHandle<()>,
}

impl BrowserHandle {
    pub async fn launch(width: u32, height: u32) -> Result<Self, BatchError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(width, height)
            .args(LAUNCH_ARGS)
            .request_timeout(Duration::from_secs(45))
            .build()
            .map_err(BatchError::Infrastructure)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BatchError::Infrastructure(err.to_string()))?;
        info!(width, height, "browser launched");

        // The handler stream drives the CDP websocket; it must be polled for
        // the lifetime of the browser.
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser event error");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            event_loop,
        })
    }

    pub fn browser(&self) -> Arc<Browser> {
        self.browser.clone()
    }

    /// Opens an isolated browser context and a fresh page inside it, with the
    /// batch user agent applied. Cookies and cache live in the context, so
    /// nothing carries over between items.
    pub async fn open_item_session(browser: &Browser) -> Result<ItemSession, String> {
        let created = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|err| err.to_string())?;
        let context_id = created.result.browser_context_id.clone();

        let page = match browser.new_page(item_target(context_id.clone())).await {
            Ok(page) => page,
            Err(err) => {
                dispose_context(browser, context_id).await;
                return Err(err.to_string());
            }
        };
        if let Err(err) = page.set_user_agent(USER_AGENT).await {
            debug!(error = %err, "could not override user agent");
        }
        Ok(ItemSession { page, context_id })
    }

    /// Tears the item's context down. Disposal closes every target inside it;
    /// the page is closed first so pending frames do not outlive the item.
    pub async fn close_item_session(browser: &Browser, session: ItemSession) {
        if let Err(err) = session.page.close().await {
            debug!(error = %err, "page close failed");
        }
        dispose_context(browser, session.context_id).await;
    }

    /// Closes the browser process. All item pages must be gone by now or the
    /// process is left to die with the tool.
    pub async fn shutdown(self) {
        match Arc::try_unwrap(self.browser) {
            Ok(mut browser) => {
                if let Err(err) = browser.close().await {
                    warn!(error = %err, "browser close failed");
                }
                let _ = browser.wait().await;
            }
            Err(_) => warn!("browser handle still shared at shutdown; skipping close"),
        }
        self.event_loop.abort();
        info!("browser closed");
    }
}

/// One isolated browser context plus its page, owned by a single work item
/// for its whole lifetime.
pub struct ItemSession {
    pub page: Page,
    context_id: BrowserContextId,
}

fn item_target(context_id: BrowserContextId) -> CreateTargetParams {
    let mut params = CreateTargetParams::new("about:blank");
    params.browser_context_id = Some(context_id);
    params
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(err) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        debug!(error = %err, "context disposal failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_targets_bind_their_own_context() {
        let params = item_target(BrowserContextId::new("ctx-1"));
        let json = serde_json::to_value(&params).expect("params serialize");
        assert_eq!(json["browserContextId"], "ctx-1");
        assert_eq!(json["url"], "about:blank");
    }
}
