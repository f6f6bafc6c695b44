use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, de::DeserializeOwned};

use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::scheduler::DEFAULT_CONCURRENCY;
use crate::search_unit::SearchUnit;

/// One-way, one adult, economy, at most two connections.
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str = "https://www.google.com/travel/flights?hl=pt-BR&gl=BR&curr=BRL&trip=oneway&q=Flights%20to%20{destination}%20from%20{origin}%20on%20{date}%20oneway%201%20adult%20economy%20max%202%20stops";

const PLACEHOLDERS: [&str; 3] = ["{origin}", "{destination}", "{date}"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Cooperative tasks on the async runtime.
    Tasks,
    /// One OS thread per in-flight job.
    Threads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Headless Chromium over CDP.
    Chrome,
    /// Plain HTTP fetch, no script execution.
    Http,
}

/// The env config env vars needed for scraping. Everything has a default.
#[derive(Debug, Deserialize)]
pub struct ScrapingEnv {
    #[serde(default = "default_template")]
    search_url_template: String,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_runner")]
    runner: RunnerKind,
    #[serde(default = "default_backend")]
    backend: BackendKind,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_page_timeout_secs")]
    page_timeout_secs: u64,
    #[serde(default = "default_card_wait_ms")]
    card_wait_ms: u64,
    #[serde(default = "default_headless")]
    headless: bool,
    chrome_path: Option<PathBuf>,
    remote_browser_url: Option<String>,
    #[serde(default = "default_requests_per_sec")]
    requests_per_sec: u32,
    airport_coords_file: Option<PathBuf>,
    regions_file: Option<PathBuf>,
}

fn default_template() -> String {
    DEFAULT_SEARCH_URL_TEMPLATE.to_string()
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_runner() -> RunnerKind {
    RunnerKind::Tasks
}
fn default_backend() -> BackendKind {
    BackendKind::Chrome
}
fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}
fn default_page_timeout_secs() -> u64 {
    30
}
fn default_card_wait_ms() -> u64 {
    5000
}
fn default_headless() -> bool {
    true
}
fn default_requests_per_sec() -> u32 {
    5
}

#[derive(Debug, Clone)]
pub struct ScrapingConfig {
    pub url_builder: SearchUrlBuilder,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub runner: RunnerKind,
    pub backend: BackendKind,
    pub timezone: Tz,
    pub page_timeout: Duration,
    pub card_wait: Duration,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub remote_browser_url: Option<String>,
    pub requests_per_sec: u32,
    pub airport_coords_file: Option<PathBuf>,
    pub regions_file: Option<PathBuf>,
}

impl ScrapingConfig {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_env = ScrapingEnv::load_from_env()?;
        Self::from_env(scraping_env)
    }

    fn from_env(env: ScrapingEnv) -> anyhow::Result<Self> {
        let timezone = env
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid TIMEZONE {:?}: {e}", env.timezone))?;
        if env.concurrency == 0 {
            anyhow::bail!("CONCURRENCY must be at least 1");
        }
        if env.max_attempts == 0 {
            anyhow::bail!("MAX_ATTEMPTS must be at least 1");
        }
        Ok(Self {
            url_builder: SearchUrlBuilder::new(env.search_url_template)?,
            concurrency: env.concurrency,
            max_attempts: env.max_attempts,
            runner: env.runner,
            backend: env.backend,
            timezone,
            page_timeout: Duration::from_secs(env.page_timeout_secs),
            card_wait: Duration::from_millis(env.card_wait_ms),
            headless: env.headless,
            chrome_path: env.chrome_path,
            remote_browser_url: env.remote_browser_url,
            requests_per_sec: env.requests_per_sec,
            airport_coords_file: env.airport_coords_file,
            regions_file: env.regions_file,
        })
    }
}

/// Fills the search URL template for a unit.
#[derive(Debug, Clone)]
pub struct SearchUrlBuilder {
    template: String,
}

impl SearchUrlBuilder {
    pub fn new(template: String) -> anyhow::Result<Self> {
        if let Some(missing) = PLACEHOLDERS.iter().find(|p| !template.contains(*p)) {
            anyhow::bail!("SEARCH_URL_TEMPLATE is missing the {missing} placeholder");
        }
        Ok(Self { template })
    }

    pub fn build(&self, unit: &SearchUnit) -> String {
        self.template
            .replace("{origin}", &unit.origin)
            .replace("{destination}", &unit.destination)
            .replace("{date}", &unit.date.format("%Y-%m-%d").to_string())
    }
}

impl Default for SearchUrlBuilder {
    fn default() -> Self {
        Self {
            template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
        }
    }
}

/// The env config env vars needed for persisting scraped data.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config =
            envy::from_env::<Self>().context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
