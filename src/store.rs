use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::price_history::{HistoryRecord, PricePoint};
use crate::record::FlightObservation;
use crate::reference_data::{Distance, Region};
use crate::text_manipulators::Price;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("observation store lock poisoned")]
    Poisoned,
}

/// A batch upsert stopped at a failing row. Rows before it stay stored.
#[derive(Debug, Error)]
#[error("stored {persisted} observations before failing: {source}")]
pub struct UpsertError {
    pub persisted: usize,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Durable storage for observations. Equality is over every field.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn exists(&self, observation: &FlightObservation) -> Result<bool, StoreError>;

    async fn insert(&self, observation: &FlightObservation) -> Result<(), StoreError>;

    async fn all(&self) -> Result<Vec<FlightObservation>, StoreError>;
}

/// Inserts each observation unless an identical row is already stored.
///
/// Check-then-insert, one row at a time and without a transaction: two
/// concurrent writers can both miss each other's row and store a duplicate.
pub async fn upsert<S>(store: &S, observations: &[FlightObservation]) -> Result<UpsertSummary, UpsertError>
where
    S: ObservationStore + ?Sized,
{
    let mut summary = UpsertSummary::default();
    for observation in observations {
        let fail = |source| UpsertError {
            persisted: summary.inserted,
            source,
        };
        if store.exists(observation).await.map_err(fail)? {
            debug!("Already stored: {} on {}", observation.route, observation.flight_date);
            summary.duplicates += 1;
            continue;
        }
        store.insert(observation).await.map_err(fail)?;
        summary.inserted += 1;
    }
    info!(
        "Stored {} new observations ({} already present)",
        summary.inserted, summary.duplicates
    );
    Ok(summary)
}

/// In-process store, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<FlightObservation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.rows.lock().map_err(|_| StoreError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn exists(&self, observation: &FlightObservation) -> Result<bool, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(rows.iter().any(|row| row == observation))
    }

    async fn insert(&self, observation: &FlightObservation) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        rows.push(observation.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<FlightObservation>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(rows.clone())
    }
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS flight_observations (
    id BIGSERIAL PRIMARY KEY,
    route TEXT NOT NULL,
    flight_date DATE NOT NULL,
    departure_time TEXT NOT NULL,
    arrival_time TEXT,
    price_cents BIGINT,
    airline TEXT NOT NULL,
    flight_weekday TEXT NOT NULL,
    search_date DATE NOT NULL,
    search_time TIME NOT NULL,
    search_weekday TEXT NOT NULL,
    origin_region TEXT NOT NULL,
    distance_km TEXT NOT NULL
)
"#;

// Nullable columns compare with IS NOT DISTINCT FROM so absent matches absent.
const EXISTS: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM flight_observations
    WHERE route = $1
      AND flight_date = $2
      AND departure_time = $3
      AND arrival_time IS NOT DISTINCT FROM $4
      AND price_cents IS NOT DISTINCT FROM $5
      AND airline = $6
      AND flight_weekday = $7
      AND search_date = $8
      AND search_time = $9
      AND search_weekday = $10
      AND origin_region = $11
      AND distance_km = $12
)
"#;

const INSERT: &str = r#"
INSERT INTO flight_observations
    (route, flight_date, departure_time, arrival_time, price_cents, airline,
     flight_weekday, search_date, search_time, search_weekday, origin_region, distance_km)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

const SELECT_ALL: &str = r#"
SELECT route, flight_date, departure_time, arrival_time, price_cents, airline,
       flight_weekday, search_date, search_time, search_weekday, origin_region, distance_km
FROM flight_observations
ORDER BY flight_date, id
"#;

const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS price_history (
    id BIGSERIAL PRIMARY KEY,
    route TEXT NOT NULL,
    flight_date DATE NOT NULL,
    searched_at TIMESTAMP NOT NULL,
    label TEXT NOT NULL,
    price_text TEXT NOT NULL,
    price_cents BIGINT
)
"#;

const INSERT_HISTORY: &str = r#"
INSERT INTO price_history (route, flight_date, searched_at, label, price_text, price_cents)
VALUES ($1, $2, $3, $4, $5, $6)
"#;

const SELECT_HISTORY: &str = r#"
SELECT route, flight_date, searched_at, label, price_text, price_cents
FROM price_history
ORDER BY searched_at, id
"#;

/// Binds the twelve observation fields, in table column order.
macro_rules! bind_observation {
    ($query:expr, $obs:expr) => {
        $query
            .bind(&$obs.route)
            .bind($obs.flight_date)
            .bind(&$obs.departure_time)
            .bind(&$obs.arrival_time)
            .bind($obs.price.map(|p| p.cents()))
            .bind(&$obs.airline)
            .bind(&$obs.flight_weekday)
            .bind($obs.search_date)
            .bind($obs.search_time)
            .bind(&$obs.search_weekday)
            .bind($obs.origin_region.to_string())
            .bind($obs.distance_km.to_string())
    };
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_HISTORY_TABLE).execute(&self.pool).await?;
        info!("Tables flight_observations and price_history are ready");
        Ok(())
    }

    /// Stores one chart read. All of its points land, or none do.
    pub async fn save_history(&self, records: &[HistoryRecord]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(INSERT_HISTORY)
                .bind(&record.route)
                .bind(record.flight_date)
                .bind(record.searched_at)
                .bind(&record.point.label)
                .bind(&record.point.price_text)
                .bind(record.point.price.map(|p| p.cents()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("Stored {} price chart points", records.len());
        Ok(records.len())
    }

    pub async fn history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let rows = sqlx::query(SELECT_HISTORY).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(history_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn history_from_row(row: &PgRow) -> Result<HistoryRecord, sqlx::Error> {
    Ok(HistoryRecord {
        route: row.try_get("route")?,
        flight_date: row.try_get("flight_date")?,
        searched_at: row.try_get("searched_at")?,
        point: PricePoint {
            label: row.try_get("label")?,
            price_text: row.try_get("price_text")?,
            price: row.try_get::<Option<i64>, _>("price_cents")?.map(Price::from_cents),
        },
    })
}

fn observation_from_row(row: &PgRow) -> Result<FlightObservation, sqlx::Error> {
    Ok(FlightObservation {
        route: row.try_get("route")?,
        flight_date: row.try_get("flight_date")?,
        departure_time: row.try_get("departure_time")?,
        arrival_time: row.try_get("arrival_time")?,
        price: row.try_get::<Option<i64>, _>("price_cents")?.map(Price::from_cents),
        airline: row.try_get("airline")?,
        flight_weekday: row.try_get("flight_weekday")?,
        search_date: row.try_get("search_date")?,
        search_time: row.try_get("search_time")?,
        search_weekday: row.try_get("search_weekday")?,
        origin_region: Region::parse(row.try_get("origin_region")?),
        distance_km: Distance::parse(row.try_get("distance_km")?),
    })
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn exists(&self, observation: &FlightObservation) -> Result<bool, StoreError> {
        let query = sqlx::query_scalar::<_, bool>(EXISTS);
        Ok(bind_observation!(query, observation)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn insert(&self, observation: &FlightObservation) -> Result<(), StoreError> {
        let query = sqlx::query(INSERT);
        bind_observation!(query, observation)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<FlightObservation>, StoreError> {
        let rows = sqlx::query(SELECT_ALL).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(observation_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
