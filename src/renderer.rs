use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// How often `Page::wait_for` re-queries the DOM.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("page has not been navigated yet")]
    NotNavigated,
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("renderer could not be started: {0}")]
    Launch(String),
}

/// One open page (tab / render context) of a renderer.
///
/// Element handles are backend specific and only meaningful for the page that
/// produced them.
#[async_trait]
pub trait Page: Send + Sync {
    type Element: Send + Sync;

    async fn navigate(&self, url: &str) -> Result<(), RenderError>;

    /// Resolves once the document has finished loading its dynamic content.
    async fn wait_until_idle(&self) -> Result<(), RenderError>;

    /// All elements matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<Self::Element>, RenderError>;

    /// Elements matching `selector` below `element`, in document order.
    async fn query_within(
        &self,
        element: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, RenderError>;

    async fn read_text(&self, element: &Self::Element) -> Result<String, RenderError>;

    async fn read_attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, RenderError>;

    /// Clicks `element`. Backends that never run scripts have nothing to
    /// expand and ignore it.
    async fn click(&self, _element: &Self::Element) -> Result<(), RenderError> {
        Ok(())
    }

    /// Polls until `selector` matches something or `timeout` elapses.
    /// Returns whether the selector appeared.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool, RenderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.query(selector).await?.is_empty() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// A page-rendering capability that hands out isolated pages.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    type Page: Page;

    async fn open_page(&self) -> Result<Self::Page, RenderError>;

    async fn close_page(&self, page: Self::Page) -> Result<(), RenderError>;
}
