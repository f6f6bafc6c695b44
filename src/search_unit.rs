use std::fmt;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

/// One (origin, destination, date) search job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct SearchUnit {
    #[serde(alias = "origem", deserialize_with = "airport_code")]
    pub origin: String,
    #[serde(alias = "destino", deserialize_with = "airport_code")]
    pub destination: String,
    #[serde(alias = "data")]
    pub date: NaiveDate,
}

fn airport_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let code = String::deserialize(deserializer)?;
    Ok(code.trim().to_uppercase())
}

impl SearchUnit {
    pub fn new(origin: &str, destination: &str, date: NaiveDate) -> Self {
        Self {
            origin: origin.trim().to_uppercase(),
            destination: destination.trim().to_uppercase(),
            date,
        }
    }

    /// "GRU x JFK"
    pub fn route(&self) -> String {
        format!("{} x {}", self.origin, self.destination)
    }
}

impl fmt::Display for SearchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.origin, self.destination, self.date)
    }
}

/// One unit per day of the inclusive range `[start, end]`.
pub fn date_range(origin: &str, destination: &str, start: NaiveDate, end: NaiveDate) -> Vec<SearchUnit> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| SearchUnit::new(origin, destination, day))
        .collect()
}

/// Reads a JSON array of `{"origin", "destination", "date"}` objects (the
/// Portuguese keys `origem`, `destino`, `data` are accepted too).
pub fn load_units(path: &Path) -> anyhow::Result<Vec<SearchUnit>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read search parameters from {}", path.display()))?;
    parse_units(&contents).with_context(|| format!("invalid search parameters in {}", path.display()))
}

pub fn parse_units(json: &str) -> anyhow::Result<Vec<SearchUnit>> {
    let units: Vec<SearchUnit> = serde_json::from_str(json)?;
    if let Some(bad) = units.iter().find(|u| u.origin.is_empty() || u.destination.is_empty()) {
        anyhow::bail!("search unit with an empty airport code: {bad}");
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn parses_both_key_styles() {
        let units = parse_units(
            r#"[
                {"origem": "gru", "destino": " JFK ", "data": "2025-03-25"},
                {"origin": "SDU", "destination": "CGH", "date": "2025-03-30"}
            ]"#,
        )
        .unwrap();
        assert_eq!(units[0], SearchUnit::new("GRU", "JFK", date("2025-03-25")));
        assert_eq!(units[1].route(), "SDU x CGH");
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_units(r#"[{"origin": "GRU", "destination": "JFK", "date": "25/03/2025"}]"#).is_err());
    }

    #[test]
    fn rejects_empty_codes() {
        assert!(parse_units(r#"[{"origin": " ", "destination": "JFK", "date": "2025-03-25"}]"#).is_err());
    }

    #[test]
    fn date_range_is_inclusive() {
        let units = date_range("CGH", "SDU", date("2025-06-01"), date("2025-06-03"));
        let days: Vec<_> = units.iter().map(|u| u.date.to_string()).collect();
        assert_eq!(days, ["2025-06-01", "2025-06-02", "2025-06-03"]);
        assert!(date_range("CGH", "SDU", date("2025-06-03"), date("2025-06-01")).is_empty());
    }
}
