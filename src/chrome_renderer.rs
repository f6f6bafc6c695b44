//! Headless Chromium backend driven over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::renderer::{Page, RenderError, Renderer};

/// Resolves once the document reports it has loaded, or after 10s.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete') {
            resolve(document.readyState);
        } else {
            window.addEventListener('load', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Extra settle time after `load` for client-side rendering.
const SETTLE_DELAY: Duration = Duration::from_millis(750);

const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    /// `ws://` or `http://` address of an already running browser.
    pub remote_url: Option<String>,
    pub timeout: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            remote_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One shared browser process; every page is its own tab. CDP allows
/// concurrent tab creation, so jobs share the browser but never a page.
pub struct ChromeRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl ChromeRenderer {
    pub async fn launch(options: ChromeOptions) -> Result<Self, RenderError> {
        let (browser, mut handler) = match &options.remote_url {
            Some(url) => {
                info!("Connecting to remote browser at {url}");
                Browser::connect(url.clone())
                    .await
                    .map_err(|e| RenderError::Launch(e.to_string()))?
            }
            None => {
                let executable = match &options.executable {
                    Some(path) => path.clone(),
                    None => find_chrome()?,
                };
                info!(
                    "Launching {} (headless={})",
                    executable.display(),
                    options.headless
                );
                let mut builder = BrowserConfig::builder()
                    .chrome_executable(executable)
                    .request_timeout(options.timeout)
                    .arg("--disable-blink-features=AutomationControlled")
                    .arg("--disable-dev-shm-usage")
                    .arg("--no-first-run")
                    .arg("--no-sandbox")
                    .arg("--disable-gpu")
                    .arg("--lang=pt-BR");
                if !options.headless {
                    builder = builder.with_head();
                }
                let config = builder.build().map_err(RenderError::Launch)?;
                Browser::launch(config)
                    .await
                    .map_err(|e| RenderError::Launch(e.to_string()))?
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {e}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            timeout: options.timeout,
        })
    }

    pub async fn close(self) {
        let mut browser = self.browser.into_inner();
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {e}");
        }
        self.handler.abort();
    }
}

fn find_chrome() -> Result<PathBuf, RenderError> {
    CHROME_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            RenderError::Launch(
                "Chrome/Chromium not found; install it or set CHROME_PATH".to_string(),
            )
        })
}

fn protocol(e: chromiumoxide::error::CdpError) -> RenderError {
    RenderError::Protocol(e.to_string())
}

pub struct ChromePage {
    page: chromiumoxide::Page,
    timeout: Duration,
}

#[async_trait]
impl Renderer for ChromeRenderer {
    type Page = ChromePage;

    async fn open_page(&self) -> Result<ChromePage, RenderError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(protocol)?;
        Ok(ChromePage {
            page,
            timeout: self.timeout,
        })
    }

    async fn close_page(&self, page: ChromePage) -> Result<(), RenderError> {
        page.page.close().await.map_err(protocol)
    }
}

#[async_trait]
impl Page for ChromePage {
    type Element = Element;

    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        match tokio::time::timeout(self.timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RenderError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(RenderError::Timeout(self.timeout)),
        }
    }

    async fn wait_until_idle(&self) -> Result<(), RenderError> {
        match tokio::time::timeout(self.timeout, self.page.evaluate(WAIT_FOR_READY_SCRIPT)).await
        {
            Ok(Ok(result)) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".into());
                debug!("Page ready state: {state}");
            }
            Ok(Err(e)) => return Err(protocol(e)),
            Err(_) => return Err(RenderError::Timeout(self.timeout)),
        }
        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<Vec<Element>, RenderError> {
        self.page.find_elements(selector).await.map_err(protocol)
    }

    async fn query_within(
        &self,
        element: &Element,
        selector: &str,
    ) -> Result<Vec<Element>, RenderError> {
        element.find_elements(selector).await.map_err(protocol)
    }

    async fn read_text(&self, element: &Element) -> Result<String, RenderError> {
        Ok(element
            .inner_text()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn click(&self, element: &Element) -> Result<(), RenderError> {
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn read_attribute(
        &self,
        element: &Element,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        element.attribute(name).await.map_err(protocol)
    }
}
