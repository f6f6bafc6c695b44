use std::sync::Arc;

use anyhow::Context;

#[cfg(feature = "browser")]
use crate::chrome_renderer::ChromeOptions;
use crate::{
    config::ScrapingConfig,
    flight_scraper::FlightExtractor,
    price_history::HistoryExtractor,
    record::SearchClock,
    reference_data::ReferenceData,
    renderer::Renderer,
    requests::RequestClient,
    scheduler::Collector,
};

/// Everything a collection run needs that is loaded once at startup.
pub struct ScrapingContext {
    pub scraping_config: ScrapingConfig,
    pub reference: Arc<ReferenceData>,
}

impl ScrapingContext {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_config = ScrapingConfig::new()?;
        Self::from_config(scraping_config)
    }

    pub fn from_config(scraping_config: ScrapingConfig) -> anyhow::Result<Self> {
        let reference = ReferenceData::load(
            scraping_config.airport_coords_file.as_deref(),
            scraping_config.regions_file.as_deref(),
        )
        .context("failed to load airport reference data")?;
        Ok(ScrapingContext {
            scraping_config,
            reference: Arc::new(reference),
        })
    }

    pub fn clock(&self) -> SearchClock {
        SearchClock::new(self.scraping_config.timezone)
    }

    pub fn extractor(&self) -> FlightExtractor {
        FlightExtractor::new(
            self.scraping_config.url_builder.clone(),
            self.scraping_config.card_wait,
        )
    }

    pub fn history_extractor(&self) -> HistoryExtractor {
        HistoryExtractor::new(
            self.scraping_config.url_builder.clone(),
            self.scraping_config.card_wait,
        )
    }

    pub fn request_client(&self) -> anyhow::Result<RequestClient> {
        RequestClient::new(
            self.scraping_config.requests_per_sec,
            self.scraping_config.page_timeout,
        )
    }

    #[cfg(feature = "browser")]
    pub fn chrome_options(&self) -> ChromeOptions {
        ChromeOptions {
            headless: self.scraping_config.headless,
            executable: self.scraping_config.chrome_path.clone(),
            remote_url: self.scraping_config.remote_browser_url.clone(),
            timeout: self.scraping_config.page_timeout,
        }
    }

    pub fn collector<R: Renderer>(&self, renderer: Arc<R>) -> Collector<R, FlightExtractor> {
        Collector::new(
            renderer,
            Arc::new(self.extractor()),
            Arc::clone(&self.reference),
            self.clock(),
            self.scraping_config.max_attempts,
            self.scraping_config.page_timeout,
        )
    }
}
