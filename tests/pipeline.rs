use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use farewatch::http_renderer::{HtmlElement, HttpPage};
use farewatch::requests::RequestClient;
use farewatch::search_unit::date_range;
use farewatch::{
    CollectionReport, Collector, Distance, FlightExtractor, HistoryExtractor, HistoryRecord,
    JobRunner, MemoryStore, Page, Price, Progress, ReferenceData, RenderError, Renderer,
    SearchClock, SearchUnit, SearchUrlBuilder, TaskRunner, ThreadRunner, scrape_history, upsert,
    write_history_csv,
};

const TEMPLATE: &str = "https://flights.test/{origin}/{destination}/{date}";

fn card(departure: &str, price: &str, airline: &str) -> String {
    format!(
        r#"<li class="pIav2d">
            <span aria-label="Horário de partida: {departure}">{departure}</span>
            <span aria-label="Horário de chegada: 16:40">16:40</span>
            <div class="sSHqwe tPgKwe ogfYpf"><span>{airline}</span></div>
            <div class="YMlIz FpEdX"><span>{price}</span></div>
        </li>"#
    )
}

fn results_page() -> String {
    format!(
        "<html><body><ul>{}{}{}</ul></body></html>",
        card("06:10", "R$ 3.120", "GOL"),
        card("8:00", "R$ 2.500,00", "LATAM"),
        card("22:45", "R$ 2.980", "Azul"),
    )
}

fn urls() -> SearchUrlBuilder {
    SearchUrlBuilder::new(TEMPLATE.to_string()).unwrap()
}

/// Canned pages keyed by URL. Unknown URLs load an empty document.
#[derive(Default)]
struct Fixtures {
    pages: HashMap<String, String>,
    broken: HashSet<String>,
}

impl Fixtures {
    fn serve(mut self, unit: &SearchUnit, html: String) -> Self {
        self.pages.insert(urls().build(unit), html);
        self
    }

    fn break_on(mut self, unit: &SearchUnit) -> Self {
        self.broken.insert(urls().build(unit));
        self
    }
}

struct FixtureRenderer {
    client: Arc<RequestClient>,
    fixtures: Arc<Fixtures>,
}

impl FixtureRenderer {
    fn new(fixtures: Fixtures) -> Self {
        Self {
            client: Arc::new(RequestClient::new(100, Duration::from_secs(1)).unwrap()),
            fixtures: Arc::new(fixtures),
        }
    }
}

struct FixturePage {
    inner: HttpPage,
    fixtures: Arc<Fixtures>,
}

#[async_trait]
impl Renderer for FixtureRenderer {
    type Page = FixturePage;

    async fn open_page(&self) -> Result<FixturePage, RenderError> {
        Ok(FixturePage {
            inner: HttpPage::from_html(Arc::clone(&self.client), ""),
            fixtures: Arc::clone(&self.fixtures),
        })
    }

    async fn close_page(&self, _page: FixturePage) -> Result<(), RenderError> {
        Ok(())
    }
}

#[async_trait]
impl Page for FixturePage {
    type Element = HtmlElement;

    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        if self.fixtures.broken.contains(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        let html = self.fixtures.pages.get(url).map(String::as_str).unwrap_or("<html></html>");
        self.inner.load_html(html)
    }

    async fn wait_until_idle(&self) -> Result<(), RenderError> {
        self.inner.wait_until_idle().await
    }

    async fn query(&self, selector: &str) -> Result<Vec<HtmlElement>, RenderError> {
        self.inner.query(selector).await
    }

    async fn query_within(&self, element: &HtmlElement, selector: &str) -> Result<Vec<HtmlElement>, RenderError> {
        self.inner.query_within(element, selector).await
    }

    async fn read_text(&self, element: &HtmlElement) -> Result<String, RenderError> {
        self.inner.read_text(element).await
    }

    async fn read_attribute(&self, element: &HtmlElement, name: &str) -> Result<Option<String>, RenderError> {
        self.inner.read_attribute(element, name).await
    }
}

fn collector(fixtures: Fixtures) -> Collector<FixtureRenderer, FlightExtractor> {
    Collector::new(
        Arc::new(FixtureRenderer::new(fixtures)),
        Arc::new(FlightExtractor::new(urls(), Duration::from_millis(20))),
        Arc::new(ReferenceData::builtin()),
        SearchClock::new(chrono_tz::America::Sao_Paulo),
        3,
        Duration::from_secs(5),
    )
}

async fn collect<J: JobRunner>(fixtures: Fixtures, runner: &J, units: Vec<SearchUnit>) -> CollectionReport {
    let progress = Arc::new(Progress::new(units.len()));
    let report = collector(fixtures).run(runner, units, Arc::clone(&progress)).await;
    assert_eq!(progress.completed(), progress.total());
    report
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[tokio::test]
async fn gru_to_jfk_end_to_end() {
    let unit = SearchUnit::new("GRU", "JFK", date("2025-06-01"));
    let fixtures = Fixtures::default().serve(&unit, results_page());

    let report = collect(fixtures, &TaskRunner::new(10), vec![unit]).await;
    assert_eq!(report.observations.len(), 1);

    let obs = &report.observations[0];
    assert_eq!(obs.route, "GRU x JFK");
    assert_eq!(obs.flight_date, date("2025-06-01"));
    assert_eq!(obs.flight_weekday, "Sunday");
    assert_eq!(obs.departure_time, "08:00");
    assert_eq!(obs.arrival_time.as_deref(), Some("16:40"));
    assert_eq!(obs.price, Some(Price::from_cents(250_000)));
    assert_eq!(obs.airline, "LATAM");
    assert_eq!(obs.origin_region.to_string(), "regiao sudeste");
    match obs.distance_km {
        Distance::Km(km) => assert!((km - 7664.1).abs() < 1.0, "distance was {km}"),
        Distance::Unavailable => panic!("distance should be known"),
    }

    let store = MemoryStore::new();
    assert_eq!(upsert(&store, &report.observations).await.unwrap().inserted, 1);
}

#[tokio::test]
async fn exhausted_retries_persist_nothing() {
    let unit = SearchUnit::new("GRU", "JFK", date("2025-06-01"));
    let fixtures = Fixtures::default().break_on(&unit);

    let report = collect(fixtures, &TaskRunner::new(10), vec![unit.clone()]).await;
    assert!(report.is_empty());
    assert_eq!(report.not_found, vec![unit]);

    let store = MemoryStore::new();
    let summary = upsert(&store, &report.observations).await.unwrap();
    assert_eq!(summary.inserted, 0);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn page_without_cards_is_no_observation() {
    let unit = SearchUnit::new("GRU", "JFK", date("2025-06-01"));
    let report = collect(Fixtures::default(), &TaskRunner::new(2), vec![unit]).await;
    assert!(report.is_empty());
    assert_eq!(report.not_found.len(), 1);
}

#[tokio::test]
async fn unknown_origin_is_rejected() {
    let unit = SearchUnit::new("XXX", "JFK", date("2025-06-01"));
    let fixtures = Fixtures::default().serve(&unit, results_page());

    let report = collect(fixtures, &TaskRunner::new(2), vec![unit]).await;
    assert!(report.observations.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].distance_km, Distance::Unavailable);
}

fn week_with_broken_day() -> (Fixtures, Vec<SearchUnit>) {
    let units = date_range("GRU", "GIG", date("2025-06-01"), date("2025-06-05"));
    let mut fixtures = Fixtures::default();
    for unit in &units {
        fixtures = fixtures.serve(unit, results_page());
    }
    let fixtures = fixtures.break_on(&units[2]);
    (fixtures, units)
}

fn assert_isolated(report: &CollectionReport) {
    let dates: Vec<_> = report.observations.iter().map(|o| o.flight_date).collect();
    assert_eq!(
        dates,
        ["2025-06-01", "2025-06-02", "2025-06-04", "2025-06-05"].map(date)
    );
    assert_eq!(report.not_found.len(), 1);
    assert_eq!(report.not_found[0].date, date("2025-06-03"));
}

#[tokio::test]
async fn failing_unit_is_isolated_with_tasks() {
    let (fixtures, units) = week_with_broken_day();
    let report = collect(fixtures, &TaskRunner::new(3), units).await;
    assert_isolated(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_unit_is_isolated_with_threads() {
    let (fixtures, units) = week_with_broken_day();
    let report = collect(fixtures, &ThreadRunner::new(3).unwrap(), units).await;
    assert_isolated(&report);
}

#[tokio::test]
async fn storing_a_run_twice_adds_nothing() {
    let (fixtures, units) = week_with_broken_day();
    let report = collect(fixtures, &TaskRunner::new(5), units).await;

    let store = MemoryStore::new();
    let first = upsert(&store, &report.observations).await.unwrap();
    let second = upsert(&store, &report.observations).await.unwrap();
    assert_eq!(first.inserted, 4);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 4);
    assert_eq!(store.len().unwrap(), 4);
}

fn chart_page() -> String {
    r#"<html><body>
        <button aria-label="Ver histórico de preços">Histórico de preços</button>
        <svg>
            <g aria-label="17 de mar. - R$ 1.310"><rect></rect></g>
            <g aria-label="18 de mar. - R$ 1.180,50"><rect></rect></g>
            <g aria-label="19 de mar. - preço indisponível"><rect></rect></g>
            <g aria-label="legenda"></g>
        </svg>
    </body></html>"#
        .to_string()
}

#[tokio::test]
async fn price_chart_to_csv() {
    let unit = SearchUnit::new("REC", "GIG", date("2025-03-19"));
    let renderer = FixtureRenderer::new(Fixtures::default().serve(&unit, chart_page()));
    let extractor = HistoryExtractor::new(urls(), Duration::from_millis(20));

    let points = scrape_history(&renderer, &extractor, &unit, Duration::from_secs(5))
        .await
        .unwrap();
    let prices: Vec<_> = points.iter().map(|p| p.price).collect();
    assert_eq!(
        prices,
        [Some(Price::from_cents(131_000)), Some(Price::from_cents(118_050)), None]
    );

    let records = HistoryRecord::for_search(&unit, "2025-03-01T09:30:00".parse().unwrap(), points);
    let mut out = Vec::new();
    write_history_csv(&mut out, &records).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[2], "REC x GIG,2025-03-19,2025-03-01 09:30:00,18 de mar.,\"R$ 1.180,50\",1180.50");
}

#[tokio::test]
async fn broken_chart_page_is_an_error() {
    let unit = SearchUnit::new("REC", "GIG", date("2025-03-19"));
    let renderer = FixtureRenderer::new(Fixtures::default().break_on(&unit));
    let extractor = HistoryExtractor::new(urls(), Duration::from_millis(20));

    let result = scrape_history(&renderer, &extractor, &unit, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(RenderError::Navigation { .. })));
}
