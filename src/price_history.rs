//! The search page's price chart: one labelled point per day, read from the
//! chart's `aria-label`s ("15 de mar. - R$ 1.234").

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};

use crate::config::SearchUrlBuilder;
use crate::renderer::{Page, RenderError, Renderer};
use crate::search_unit::SearchUnit;
use crate::text_manipulators::{Price, clean_text, normalize_price};

const LABEL_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    /// The chart's x-axis label, as rendered.
    pub label: String,
    pub price_text: String,
    pub price: Option<Price>,
}

/// One chart point tied to the search it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub route: String,
    pub flight_date: NaiveDate,
    pub searched_at: NaiveDateTime,
    pub point: PricePoint,
}

impl HistoryRecord {
    pub fn for_search(unit: &SearchUnit, searched_at: NaiveDateTime, points: Vec<PricePoint>) -> Vec<Self> {
        points
            .into_iter()
            .map(|point| HistoryRecord {
                route: unit.route(),
                flight_date: unit.date,
                searched_at,
                point,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct HistorySelectors {
    /// Toggle that expands the chart. Optional; some layouts show it open.
    pub expand_button: String,
    pub point: String,
}

impl Default for HistorySelectors {
    fn default() -> Self {
        Self {
            expand_button: "button[aria-label*='histórico de preços']".to_string(),
            point: "g[aria-label*=' - ']".to_string(),
        }
    }
}

/// Splits a chart label on its first `" - "` into label and price.
pub fn parse_point(aria_label: &str) -> Option<PricePoint> {
    let (label, price_text) = aria_label.split_once(LABEL_SEPARATOR)?;
    let label = clean_text(label);
    let price_text = clean_text(price_text);
    if label.is_empty() || price_text.is_empty() {
        return None;
    }
    Some(PricePoint {
        price: normalize_price(&price_text),
        label,
        price_text,
    })
}

pub struct HistoryExtractor {
    pub selectors: HistorySelectors,
    pub urls: SearchUrlBuilder,
    /// How long to wait for chart points after expanding it.
    pub chart_wait: Duration,
}

impl HistoryExtractor {
    pub fn new(urls: SearchUrlBuilder, chart_wait: Duration) -> Self {
        Self {
            selectors: HistorySelectors::default(),
            urls,
            chart_wait,
        }
    }

    /// Chart points in document order. A chart that never appears gives an
    /// empty list.
    pub async fn extract<P: Page>(&self, page: &P, unit: &SearchUnit) -> Result<Vec<PricePoint>, RenderError> {
        page.navigate(&self.urls.build(unit)).await?;
        page.wait_until_idle().await?;
        self.expand_chart(page).await;

        if !page.wait_for(&self.selectors.point, self.chart_wait).await? {
            debug!("No price chart for {unit}");
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        for element in page.query(&self.selectors.point).await? {
            match page.read_attribute(&element, "aria-label").await? {
                Some(label) => points.extend(parse_point(&label)),
                None => debug!("Chart point without a label"),
            }
        }
        Ok(points)
    }

    // Best effort: a missing or unclickable toggle still leaves a chance the
    // chart is already open.
    async fn expand_chart<P: Page>(&self, page: &P) {
        let toggles = match page.query(&self.selectors.expand_button).await {
            Ok(toggles) => toggles,
            Err(e) => {
                debug!("Price chart toggle lookup failed: {e}");
                return;
            }
        };
        match toggles.first() {
            Some(toggle) => {
                if let Err(e) = page.click(toggle).await {
                    debug!("Failed to expand price chart: {e}");
                }
            }
            None => debug!("No price chart toggle on page"),
        }
    }
}

/// Reads the price chart for one search on its own page, closed afterwards.
pub async fn scrape_history<R: Renderer>(
    renderer: &R,
    extractor: &HistoryExtractor,
    unit: &SearchUnit,
    timeout: Duration,
) -> Result<Vec<PricePoint>, RenderError> {
    let page = renderer.open_page().await?;
    let result = tokio::time::timeout(timeout, extractor.extract(&page, unit))
        .await
        .unwrap_or(Err(RenderError::Timeout(timeout)));
    if let Err(e) = renderer.close_page(page).await {
        warn!("Failed to close page for {unit}: {e}");
    }
    if let Ok(points) = &result {
        info!("Read {} price chart points for {unit}", points.len());
    }
    result
}
