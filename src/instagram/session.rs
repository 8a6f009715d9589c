//! Browser Session Provider
//!
//! Attaches to a Chrome instance the user already logged in to Instagram with,
//! via the DevTools protocol (`--remote-debugging-port`). No credentials are
//! handled here. The provider opens one dedicated tab and hands clones of it to
//! callers, so it reports non-isolated sessions and the service runs one fetch
//! at a time. Releasing the session closes that tab and disconnects, leaving
//! the user's browser and other tabs alone.

use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{InstagramError, Result};

/// Supplies a ready, authenticated browsing context
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Send + Sync;

    /// Borrowable session handle. Fails when no login is present.
    async fn acquire(&self) -> Result<Self::Session>;

    /// Drop the connection to the browser. Idempotent.
    async fn release(&self);

    /// Whether sessions handed out at the same time are separate browsing
    /// contexts. When false every caller shares one tab and fetches must run
    /// one at a time.
    fn isolated_sessions(&self) -> bool {
        false
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// DevTools endpoint: `http://host:port` or a `ws://` debugger URL
    pub browser_url: String,
    /// Timeout for endpoint discovery
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser_url: "http://127.0.0.1:9222".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to the dedicated Instagram tab
#[derive(Clone, Debug)]
pub struct InstagramSession {
    page: Page,
}

impl InstagramSession {
    pub fn page(&self) -> &Page {
        &self.page
    }
}

struct Attached {
    _browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

const INSTAGRAM_HOME: &str = "https://www.instagram.com/";

/// Session cookie Instagram sets once logged in
const SESSION_COOKIE: &str = "sessionid";

/// Provider backed by an already running Chrome
pub struct BrowserSessionProvider {
    config: SessionConfig,
    http: reqwest::Client,
    state: Mutex<Option<Attached>>,
}

impl BrowserSessionProvider {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.connect_timeout)
            .build()
            .map_err(|e| InstagramError::SessionUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            state: Mutex::new(None),
        })
    }

    /// Resolve the browser-level websocket URL
    async fn debugger_url(&self) -> Result<String> {
        let url = self.config.browser_url.trim_end_matches('/');
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return Ok(url.to_string());
        }

        let version: VersionInfo = self
            .http
            .get(format!("{}/json/version", url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                InstagramError::SessionUnavailable(format!(
                    "no browser listening at {} ({}); start Chrome with --remote-debugging-port",
                    url, e
                ))
            })?
            .json()
            .await
            .map_err(|e| InstagramError::SessionUnavailable(format!("bad /json/version reply: {}", e)))?;

        Ok(version.web_socket_debugger_url)
    }

    async fn attach(&self) -> Result<Attached> {
        let ws_url = self.debugger_url().await?;
        info!(url = %ws_url, "Attaching to browser");

        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| InstagramError::SessionUnavailable(format!("CDP connect failed: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
            debug!("CDP handler finished");
        });

        let page = match browser.new_page(INSTAGRAM_HOME).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(InstagramError::SessionUnavailable(format!("could not open tab: {}", e)));
            }
        };

        if let Err(e) = ensure_logged_in(&page).await {
            let _ = page.clone().close().await;
            handler.abort();
            return Err(e);
        }

        info!("Browser session ready");
        Ok(Attached {
            _browser: browser,
            handler,
            page,
        })
    }
}

async fn ensure_logged_in(page: &Page) -> Result<()> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| InstagramError::SessionUnavailable(format!("could not read cookies: {}", e)))?;

    let logged_in = cookies
        .iter()
        .any(|c| c.name == SESSION_COOKIE && c.domain.contains("instagram.com") && !c.value.is_empty());

    if logged_in {
        Ok(())
    } else {
        Err(InstagramError::SessionUnavailable(
            "browser is not logged in to Instagram".to_string(),
        ))
    }
}

#[async_trait]
impl SessionProvider for BrowserSessionProvider {
    type Session = InstagramSession;

    async fn acquire(&self) -> Result<InstagramSession> {
        let mut state = self.state.lock().await;

        if let Some(attached) = state.as_ref() {
            if !attached.handler.is_finished() {
                return Ok(InstagramSession {
                    page: attached.page.clone(),
                });
            }
            warn!("Browser connection lost, reattaching");
            *state = None;
        }

        let attached = self.attach().await?;
        let session = InstagramSession {
            page: attached.page.clone(),
        };
        *state = Some(attached);
        Ok(session)
    }

    async fn release(&self) {
        let attached = self.state.lock().await.take();
        if let Some(attached) = attached {
            if let Err(e) = attached.page.close().await {
                debug!(error = %e, "closing Instagram tab failed");
            }
            attached.handler.abort();
            info!("Browser session released");
        }
    }
}
