use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;

use crate::flight_scraper::RawExtraction;
use crate::reference_data::{DISTANCE_UNAVAILABLE, Distance, ReferenceData, Region};
use crate::search_unit::SearchUnit;
use crate::text_manipulators::{Price, clean_text, normalize_price, normalize_time};

/// Text values that stand in for "nothing scraped".
const PLACEHOLDERS: &[&str] = &["", "0", "n/a", DISTANCE_UNAVAILABLE];

/// The canonical, persisted price observation.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightObservation {
    pub route: String,
    pub flight_date: NaiveDate,
    pub departure_time: String,
    pub arrival_time: Option<String>,
    pub price: Option<Price>,
    pub airline: String,
    pub flight_weekday: String,
    pub search_date: NaiveDate,
    pub search_time: NaiveTime,
    pub search_weekday: String,
    pub origin_region: Region,
    pub distance_km: Distance,
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDERS.contains(&value.trim().to_lowercase().as_str())
}

impl FlightObservation {
    /// Whether every field carries real data. Only valid observations are
    /// persisted. The arrival time may be absent, but not a placeholder.
    pub fn is_valid(&self) -> bool {
        let texts = [
            self.route.as_str(),
            self.departure_time.as_str(),
            self.airline.as_str(),
            self.flight_weekday.as_str(),
            self.search_weekday.as_str(),
        ];
        if texts.iter().any(|t| is_placeholder(t)) {
            return false;
        }
        if self.arrival_time.as_deref().is_some_and(is_placeholder) {
            return false;
        }
        if !self.price.is_some_and(|p| !p.is_zero()) {
            return false;
        }
        if self.origin_region == Region::Unknown {
            return false;
        }
        matches!(self.distance_km, Distance::Km(km) if km > 0.0)
    }
}

/// When the search ran, in the configured local timezone.
#[derive(Debug, Clone, Copy)]
pub struct SearchClock {
    tz: Tz,
}

impl SearchClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Current local time truncated to whole seconds.
    pub fn now(&self) -> NaiveDateTime {
        let local = chrono::Utc::now().with_timezone(&self.tz).naive_local();
        local.with_nanosecond(0).unwrap_or(local)
    }
}

/// Joins one extraction with reference data and the search timestamp.
///
/// `None` extraction means no flight was found and no record is produced. An
/// unusable price is kept as `None` on the record; `is_valid` drops it later.
pub fn build(
    unit: &SearchUnit,
    raw: Option<&RawExtraction>,
    reference: &ReferenceData,
    searched_at: NaiveDateTime,
) -> Option<FlightObservation> {
    let raw = raw?;

    let departure_time =
        normalize_time(&raw.departure_time).unwrap_or_else(|| clean_text(&raw.departure_time));
    let arrival_time = raw
        .arrival_time
        .as_deref()
        .map(|t| normalize_time(t).unwrap_or_else(|| clean_text(t)));

    Some(FlightObservation {
        route: unit.route(),
        flight_date: unit.date,
        departure_time,
        arrival_time,
        price: normalize_price(&raw.price_text),
        airline: clean_text(&raw.airline),
        flight_weekday: unit.date.format("%A").to_string(),
        search_date: searched_at.date(),
        search_time: searched_at.time(),
        search_weekday: searched_at.format("%A").to_string(),
        origin_region: reference.region(&unit.origin),
        distance_km: reference.distance(&unit.origin, &unit.destination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(origin: &str, destination: &str) -> SearchUnit {
        SearchUnit::new(origin, destination, "2025-06-01".parse().unwrap())
    }

    fn raw(price: &str) -> RawExtraction {
        RawExtraction {
            departure_time: "08:00".into(),
            arrival_time: None,
            price_text: price.into(),
            airline: "LATAM".into(),
        }
    }

    fn searched_at() -> NaiveDateTime {
        "2025-05-20T14:03:09".parse().unwrap()
    }

    #[test]
    fn builds_full_record() {
        let obs = build(
            &unit("GRU", "JFK"),
            Some(&raw("R$ 2.500,00")),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();

        assert_eq!(obs.route, "GRU x JFK");
        assert_eq!(obs.price, Some(Price::from_cents(250000)));
        assert_eq!(obs.flight_weekday, "Sunday");
        assert_eq!(obs.search_weekday, "Tuesday");
        assert_eq!(obs.search_time.to_string(), "14:03:09");
        assert_eq!(obs.origin_region.to_string(), "regiao sudeste");
        assert!(obs.is_valid());
    }

    #[test]
    fn no_extraction_no_record() {
        assert!(build(&unit("GRU", "JFK"), None, &ReferenceData::builtin(), searched_at()).is_none());
    }

    #[test]
    fn unknown_airports_degrade_to_sentinels() {
        let obs = build(
            &unit("GRU", "LHR"),
            Some(&raw("R$ 3.100")),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();
        assert_eq!(obs.distance_km, Distance::Unavailable);
        assert_eq!(obs.distance_km.to_string(), "unavailable");
        assert!(!obs.is_valid());

        let obs = build(
            &unit("LHR", "GRU"),
            Some(&raw("R$ 3.100")),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();
        assert_eq!(obs.origin_region, Region::Unknown);
        assert!(!obs.is_valid());
    }

    #[test]
    fn unusable_price_is_kept_absent_then_invalid() {
        let obs = build(
            &unit("GRU", "JFK"),
            Some(&raw("Price unavailable")),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();
        assert_eq!(obs.price, None);
        assert!(!obs.is_valid());
    }

    #[test]
    fn placeholders_invalidate() {
        let base = build(
            &unit("GRU", "JFK"),
            Some(&raw("R$ 900")),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();

        let mut obs = base.clone();
        obs.airline = "N/A".into();
        assert!(!obs.is_valid());

        let mut obs = base.clone();
        obs.departure_time = "  ".into();
        assert!(!obs.is_valid());

        let mut obs = base.clone();
        obs.price = Some(Price::from_cents(0));
        assert!(!obs.is_valid());

        let mut obs = base.clone();
        obs.arrival_time = Some("0".into());
        assert!(!obs.is_valid());

        let mut obs = base;
        obs.arrival_time = Some("16:40".into());
        assert!(obs.is_valid());
    }

    #[test]
    fn times_are_normalized() {
        let mut extraction = raw("R$ 900");
        extraction.departure_time = "8:05\u{202f}PM".into();
        extraction.arrival_time = Some("Horário de chegada: 06:10+1".into());
        let obs = build(
            &unit("GRU", "JFK"),
            Some(&extraction),
            &ReferenceData::builtin(),
            searched_at(),
        )
        .unwrap();
        assert_eq!(obs.departure_time, "20:05");
        assert_eq!(obs.arrival_time.as_deref(), Some("06:10"));
    }
}
