use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::config::SearchUrlBuilder;
use crate::renderer::{Page, RenderError};
use crate::search_unit::SearchUnit;
use crate::text_manipulators::{Price, normalize_price};

/// Only the first few result cards are ranked; later ones are rarely cheaper
/// and each card costs several round trips to the browser.
pub const MAX_CARDS: usize = 5;

/// Unprocessed fields of the cheapest result on one search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtraction {
    pub departure_time: String,
    pub arrival_time: Option<String>,
    pub price_text: String,
    pub airline: String,
}

#[derive(Debug, Clone)]
pub struct FlightSelectors {
    pub card: String,
    pub departure: String,
    pub arrival: String,
    pub price: String,
    /// Tried inside the card when `price` matches nothing.
    pub price_fallback: String,
    pub airline: String,
}

impl Default for FlightSelectors {
    fn default() -> Self {
        Self {
            card: "li.pIav2d".into(),
            departure: "span[aria-label*='Horário de partida']".into(),
            arrival: "span[aria-label*='Horário de chegada']".into(),
            price: "div.YMlIz.FpEdX span".into(),
            price_fallback: "span[aria-label*='Reais brasileiros']".into(),
            airline: "div.sSHqwe.tPgKwe.ogfYpf span".into(),
        }
    }
}

/// Something that can pull a `RawExtraction` out of an open page.
#[async_trait]
pub trait Extract<P: Page>: Send + Sync {
    /// `Ok(None)` means the page rendered but listed no usable flight.
    async fn extract(&self, page: &P, unit: &SearchUnit) -> Result<Option<RawExtraction>, RenderError>;
}

pub struct FlightExtractor {
    pub selectors: FlightSelectors,
    pub urls: SearchUrlBuilder,
    /// How long to wait for the first result card before giving up.
    pub card_wait: Duration,
}

impl FlightExtractor {
    pub fn new(urls: SearchUrlBuilder, card_wait: Duration) -> Self {
        Self {
            selectors: FlightSelectors::default(),
            urls,
            card_wait,
        }
    }

    /// The cheapest of the first `MAX_CARDS` cards. Ties keep the earlier
    /// card. Cards whose price is missing or unreadable are skipped.
    pub async fn cheapest<P: Page>(&self, page: &P, cards: &[P::Element]) -> Option<RawExtraction> {
        let mut cheapest: Option<(Price, RawExtraction)> = None;

        for (index, card) in cards.iter().take(MAX_CARDS).enumerate() {
            let fields = match self.read_card(page, card).await {
                Ok(Some(fields)) => fields,
                Ok(None) => {
                    debug!("Card {} has no price, skipping", index + 1);
                    continue;
                }
                Err(e) => {
                    debug!("Failed to parse card {}: {e}", index + 1);
                    continue;
                }
            };
            let Some(price) = normalize_price(&fields.price_text) else {
                debug!("Card {} price {:?} is not a number", index + 1, fields.price_text);
                continue;
            };
            if cheapest.as_ref().is_none_or(|(best, _)| price < *best) {
                cheapest = Some((price, fields));
            }
        }

        cheapest.map(|(_, fields)| fields)
    }

    async fn read_card<P: Page>(&self, page: &P, card: &P::Element) -> Result<Option<RawExtraction>, RenderError> {
        let mut price_text = first_text(page, card, &self.selectors.price).await?;
        if price_text.is_none() {
            price_text = first_text(page, card, &self.selectors.price_fallback).await?;
        }
        let Some(price_text) = price_text else {
            return Ok(None);
        };

        Ok(Some(RawExtraction {
            departure_time: first_text(page, card, &self.selectors.departure)
                .await?
                .unwrap_or_default(),
            arrival_time: first_text(page, card, &self.selectors.arrival).await?,
            price_text,
            airline: first_text(page, card, &self.selectors.airline)
                .await?
                .unwrap_or_default(),
        }))
    }
}

/// Text of the first match of `selector` inside `element`, if any.
async fn first_text<P: Page>(page: &P, element: &P::Element, selector: &str) -> Result<Option<String>, RenderError> {
    match page.query_within(element, selector).await?.first() {
        Some(found) => {
            let text = page.read_text(found).await?;
            Ok(Some(text.trim().to_string()).filter(|t| !t.is_empty()))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl<P: Page> Extract<P> for FlightExtractor {
    async fn extract(&self, page: &P, unit: &SearchUnit) -> Result<Option<RawExtraction>, RenderError> {
        let url = self.urls.build(unit);
        debug!("Loading {url}");
        page.navigate(&url).await?;
        page.wait_until_idle().await?;

        if !page.wait_for(&self.selectors.card, self.card_wait).await? {
            debug!("No flight cards for {unit}");
            return Ok(None);
        }

        let cards = page.query(&self.selectors.card).await?;
        debug!("Found {} flight cards for {unit}", cards.len());
        Ok(self.cheapest(page, &cards).await)
    }
}
