//! Static-DOM renderer: fetches the page over HTTP and answers selector
//! queries against the parsed document. No script execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;
use scraper::{ElementRef, Html, Selector};

use crate::renderer::{Page, RenderError, Renderer};
use crate::requests::RequestClient;

/// Owned snapshot of a matched element.
#[derive(Debug, Clone)]
pub struct HtmlElement {
    outer_html: String,
    text: String,
    attributes: HashMap<String, String>,
}

impl HtmlElement {
    fn from_ref(node: ElementRef) -> Self {
        Self {
            outer_html: node.html(),
            text: extract_text(node),
            attributes: node
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub fn extract_text(node: ElementRef) -> String {
    node.text().collect::<String>()
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector).map_err(|e| RenderError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn select_all(document: &Html, selector: &str) -> Result<Vec<HtmlElement>, RenderError> {
    let selector = parse_selector(selector)?;
    Ok(document.select(&selector).map(HtmlElement::from_ref).collect())
}

pub struct HttpRenderer {
    client: Arc<RequestClient>,
}

impl HttpRenderer {
    pub fn new(client: RequestClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

pub struct HttpPage {
    client: Arc<RequestClient>,
    body: RwLock<Option<Arc<str>>>,
}

impl HttpPage {
    /// A page preloaded with `html`, as if it had just been navigated to.
    pub fn from_html(client: Arc<RequestClient>, html: &str) -> Self {
        Self {
            client,
            body: RwLock::new(Some(Arc::from(html))),
        }
    }

    /// Replaces the current document, as a navigation would.
    pub fn load_html(&self, html: &str) -> Result<(), RenderError> {
        let mut body = self
            .body
            .write()
            .map_err(|_| RenderError::Protocol("page state poisoned".to_string()))?;
        *body = Some(Arc::from(html));
        Ok(())
    }

    fn body(&self) -> Result<Arc<str>, RenderError> {
        self.body
            .read()
            .map_err(|_| RenderError::Protocol("page state poisoned".to_string()))?
            .clone()
            .ok_or(RenderError::NotNavigated)
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    type Page = HttpPage;

    async fn open_page(&self) -> Result<HttpPage, RenderError> {
        Ok(HttpPage {
            client: Arc::clone(&self.client),
            body: RwLock::new(None),
        })
    }

    async fn close_page(&self, _page: HttpPage) -> Result<(), RenderError> {
        Ok(())
    }
}

#[async_trait]
impl Page for HttpPage {
    type Element = HtmlElement;

    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        let html = self
            .client
            .fetch_url_body(url)
            .await
            .map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Fetched {} bytes from {url}", html.len());
        self.load_html(&html)
    }

    async fn wait_until_idle(&self) -> Result<(), RenderError> {
        self.body().map(|_| ())
    }

    async fn query(&self, selector: &str) -> Result<Vec<HtmlElement>, RenderError> {
        let body = self.body()?;
        let document = Html::parse_document(&body);
        select_all(&document, selector)
    }

    async fn query_within(
        &self,
        element: &HtmlElement,
        selector: &str,
    ) -> Result<Vec<HtmlElement>, RenderError> {
        let fragment = Html::parse_fragment(&element.outer_html);
        select_all(&fragment, selector)
    }

    async fn read_text(&self, element: &HtmlElement) -> Result<String, RenderError> {
        Ok(element.text.clone())
    }

    async fn read_attribute(
        &self,
        element: &HtmlElement,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        Ok(element.attributes.get(name).cloned())
    }
}
