pub mod config;
pub mod export;
pub mod flight_scraper;
pub mod price_history;
pub mod record;
pub mod reference_data;
pub mod renderer;
pub mod retry;
pub mod scheduler;
pub mod scraping_context;
pub mod search_unit;
pub mod store;
pub mod text_manipulators;

#[cfg(feature = "browser")]
pub mod chrome_renderer;
pub mod http_renderer;

mod ratelimit;
pub mod requests;
mod utils;

pub use config::{BackendKind, RunnerKind, ScrapingConfig, SearchUrlBuilder, StoreConfig};
pub use export::{ExportError, export_history_to_path, export_to_path, write_csv, write_history_csv};
pub use flight_scraper::{Extract, FlightExtractor, RawExtraction};
pub use price_history::{HistoryExtractor, HistoryRecord, PricePoint, scrape_history};
pub use record::{FlightObservation, SearchClock};
pub use reference_data::{Distance, ReferenceData, Region};
pub use renderer::{Page, RenderError, Renderer};
pub use retry::extract_with_retry;
pub use scheduler::{CollectionReport, Collector, JobRunner, Progress, TaskRunner, ThreadRunner};
pub use scraping_context::ScrapingContext;
pub use search_unit::SearchUnit;
pub use store::{MemoryStore, ObservationStore, PgStore, StoreError, UpsertError, upsert};
pub use text_manipulators::{Price, normalize_price, normalize_time};
