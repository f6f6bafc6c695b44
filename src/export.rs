use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::price_history::HistoryRecord;
use crate::record::FlightObservation;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One CSV line. Field order and names make up the header.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    route: &'a str,
    flight_date: String,
    departure_time: &'a str,
    arrival_time: &'a str,
    price: String,
    airline: &'a str,
    flight_weekday: &'a str,
    search_date: String,
    search_time: String,
    search_weekday: &'a str,
    origin_region: String,
    distance_km: String,
}

impl<'a> From<&'a FlightObservation> for CsvRow<'a> {
    fn from(obs: &'a FlightObservation) -> Self {
        CsvRow {
            route: &obs.route,
            flight_date: obs.flight_date.format("%Y-%m-%d").to_string(),
            departure_time: &obs.departure_time,
            arrival_time: obs.arrival_time.as_deref().unwrap_or_default(),
            price: obs.price.map(|p| p.to_string()).unwrap_or_default(),
            airline: &obs.airline,
            flight_weekday: &obs.flight_weekday,
            search_date: obs.search_date.format("%Y-%m-%d").to_string(),
            search_time: obs.search_time.format("%H:%M:%S").to_string(),
            search_weekday: &obs.search_weekday,
            origin_region: obs.origin_region.to_string(),
            distance_km: obs.distance_km.to_string(),
        }
    }
}

/// Writes a header line followed by one line per observation, in order.
pub fn write_csv<W: Write>(writer: W, observations: &[FlightObservation]) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    if observations.is_empty() {
        // serde only emits the header alongside the first record
        csv.write_record(HEADER)?;
    }
    for obs in observations {
        csv.serialize(CsvRow::from(obs))?;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub const HEADER: [&str; 12] = [
    "route",
    "flight_date",
    "departure_time",
    "arrival_time",
    "price",
    "airline",
    "flight_weekday",
    "search_date",
    "search_time",
    "search_weekday",
    "origin_region",
    "distance_km",
];

fn create(path: &Path) -> Result<File, ExportError> {
    File::create(path).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn export_to_path(path: &Path, observations: &[FlightObservation]) -> Result<(), ExportError> {
    write_csv(create(path)?, observations)?;
    info!("Wrote {} observations to {}", observations.len(), path.display());
    Ok(())
}

pub const HISTORY_HEADER: [&str; 6] = ["route", "flight_date", "searched_at", "label", "price_text", "price"];

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    route: &'a str,
    flight_date: String,
    searched_at: String,
    label: &'a str,
    price_text: &'a str,
    price: String,
}

impl<'a> From<&'a HistoryRecord> for HistoryRow<'a> {
    fn from(record: &'a HistoryRecord) -> Self {
        HistoryRow {
            route: &record.route,
            flight_date: record.flight_date.format("%Y-%m-%d").to_string(),
            searched_at: record.searched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            label: &record.point.label,
            price_text: &record.point.price_text,
            price: record.point.price.map(|p| p.to_string()).unwrap_or_default(),
        }
    }
}

/// Price chart points, one line each, under `HISTORY_HEADER`.
pub fn write_history_csv<W: Write>(writer: W, records: &[HistoryRecord]) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    if records.is_empty() {
        csv.write_record(HISTORY_HEADER)?;
    }
    for record in records {
        csv.serialize(HistoryRow::from(record))?;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn export_history_to_path(path: &Path, records: &[HistoryRecord]) -> Result<(), ExportError> {
    write_history_csv(create(path)?, records)?;
    info!("Wrote {} price chart points to {}", records.len(), path.display());
    Ok(())
}
