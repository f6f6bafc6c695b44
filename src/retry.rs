use std::time::Duration;

use log::warn;

use crate::flight_scraper::{Extract, RawExtraction};
use crate::renderer::{RenderError, Renderer};
use crate::search_unit::SearchUnit;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Runs the extractor on a fresh page up to `max_attempts` times, stopping at
/// the first attempt that finds a flight.
///
/// Every failure is treated as transient: navigation errors, timeouts, missing
/// selectors and "no flight found" all just consume an attempt. Nothing is
/// propagated; exhausting the attempts yields `None`.
// TODO: stop early on structural failures (invalid selector, page layout
// changed) instead of spending the remaining attempts on them.
pub async fn extract_with_retry<R, E>(
    renderer: &R,
    extractor: &E,
    unit: &SearchUnit,
    max_attempts: u32,
    attempt_timeout: Duration,
) -> Option<RawExtraction>
where
    R: Renderer,
    E: Extract<R::Page>,
{
    for attempt in 1..=max_attempts {
        match attempt_once(renderer, extractor, unit, attempt_timeout).await {
            Ok(Some(found)) => return Some(found),
            Ok(None) => warn!("Attempt {attempt}/{max_attempts}: no flight found for {unit}"),
            Err(e) => warn!("Attempt {attempt}/{max_attempts} failed for {unit}: {e}"),
        }
    }
    None
}

/// One extraction on its own page. The page is closed whatever the
/// extraction returned, including on timeout.
async fn attempt_once<R, E>(
    renderer: &R,
    extractor: &E,
    unit: &SearchUnit,
    attempt_timeout: Duration,
) -> Result<Option<RawExtraction>, RenderError>
where
    R: Renderer,
    E: Extract<R::Page>,
{
    let page = renderer.open_page().await?;
    let result = tokio::time::timeout(attempt_timeout, extractor.extract(&page, unit))
        .await
        .unwrap_or(Err(RenderError::Timeout(attempt_timeout)));
    if let Err(e) = renderer.close_page(page).await {
        warn!("Failed to close page for {unit}: {e}");
    }
    result
}
