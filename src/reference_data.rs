use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const UNKNOWN_REGION: &str = "regiao desconhecida";
pub const DISTANCE_UNAVAILABLE: &str = "unavailable";

const AIRPORTS: &[(&str, f64, f64, &str)] = &[
    ("GRU", -23.4356, -46.4731, "regiao sudeste"),
    ("CGH", -23.6261, -46.6561, "regiao sudeste"),
    ("GIG", -22.8090, -43.2506, "regiao sudeste"),
    ("SDU", -22.9105, -43.1630, "regiao sudeste"),
    ("CNF", -19.6244, -43.9714, "regiao sudeste"),
    ("BSB", -15.8698, -47.9208, "regiao centro-oeste"),
    ("REC", -8.1264, -34.9234, "regiao nordeste"),
    ("CWB", -25.5280, -49.1750, "regiao sul"),
    ("SSA", -12.9081, -38.3228, "regiao nordeste"),
    ("FOR", -3.7766, -38.5321, "regiao nordeste"),
    ("POA", -29.9939, -51.1711, "regiao sul"),
    ("BEL", -1.3792, -48.4760, "regiao norte"),
    ("MAO", -3.0386, -60.0497, "regiao norte"),
    ("VCP", -23.0076, -47.1340, "regiao sudeste"),
    ("NAT", -5.9111, -35.2750, "regiao nordeste"),
    ("VIX", -20.2584, -40.2863, "regiao sudeste"),
    ("CGB", -15.6015, -56.0970, "regiao centro-oeste"),
    ("JFK", 40.6413, -73.7781, "regiao internacional"),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<(f64, f64)> for Coordinates {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self { latitude, longitude }
    }
}

/// Great-circle distance in kilometres (haversine).
pub fn haversine(a: Coordinates, b: Coordinates) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let dphi = (b.latitude - a.latitude).to_radians();
    let dlambda = (b.longitude - a.longitude).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Region {
    Named(String),
    Unknown,
}

impl Region {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "" | UNKNOWN_REGION => Region::Unknown,
            name => Region::Named(name.to_string()),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Named(name) => f.write_str(name),
            Region::Unknown => f.write_str(UNKNOWN_REGION),
        }
    }
}

/// Route distance, kept to two decimals so stored values compare exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distance {
    Km(f64),
    Unavailable,
}

impl Distance {
    pub fn km(value: f64) -> Self {
        Distance::Km((value * 100.0).round() / 100.0)
    }

    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(km) if km.is_finite() => Distance::km(km),
            _ => Distance::Unavailable,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Km(km) => write!(f, "{km:.2}"),
            Distance::Unavailable => f.write_str(DISTANCE_UNAVAILABLE),
        }
    }
}

/// Airport coordinates and regions. Loaded once per run, read-only after.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    coordinates: HashMap<String, Coordinates>,
    regions: HashMap<String, String>,
}

impl ReferenceData {
    pub fn builtin() -> Self {
        let mut data = Self::default();
        for (code, lat, lon, region) in AIRPORTS {
            data.coordinates.insert(code.to_string(), (*lat, *lon).into());
            data.regions.insert(code.to_string(), region.to_string());
        }
        data
    }

    /// Built-in table, extended or overridden by the optional JSON files
    /// (`{"GRU": [-23.43, -46.47]}` and `{"GRU": "regiao sudeste"}`).
    pub fn load(coords_file: Option<&Path>, regions_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut data = Self::builtin();
        if let Some(path) = coords_file {
            let coords: HashMap<String, (f64, f64)> = read_json(path)?;
            data.coordinates
                .extend(coords.into_iter().map(|(code, c)| (code.to_uppercase(), c.into())));
        }
        if let Some(path) = regions_file {
            let regions: HashMap<String, String> = read_json(path)?;
            data.regions
                .extend(regions.into_iter().map(|(code, r)| (code.to_uppercase(), r)));
        }
        Ok(data)
    }

    pub fn coordinates(&self, code: &str) -> Option<Coordinates> {
        self.coordinates.get(code).copied()
    }

    pub fn region(&self, code: &str) -> Region {
        self.regions
            .get(code)
            .map(|r| Region::parse(r))
            .unwrap_or(Region::Unknown)
    }

    pub fn distance(&self, origin: &str, destination: &str) -> Distance {
        match (self.coordinates(origin), self.coordinates(destination)) {
            (Some(a), Some(b)) => Distance::km(haversine(a, b)),
            _ => Distance::Unavailable,
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read reference data from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("invalid reference data in {}", path.display()))
}
