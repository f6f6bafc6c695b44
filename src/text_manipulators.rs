use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Substrings that mark a price cell as "no fare available". Matched
/// case-insensitively.
const UNAVAILABLE_MARKERS: &[&str] = &["unavailable", "indisponível"];

/// Currency prefixes the upstream page renders in front of amounts.
const CURRENCY_SYMBOLS: &[&str] = &["R$", "US$", "BRL", "USD", "$", "€", "£"];

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2})\s*[:h]\s*(\d{2})(?:\s*([ap])\.?\s*m\.?)?")
        .expect("time pattern is valid")
});

/// A fare in integral cents. Floating inputs are rounded half away from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

impl Price {
    pub fn from_cents(cents: i64) -> Self {
        Price(cents)
    }

    /// Returns `None` for NaN, infinities, negative amounts and amounts whose
    /// cents do not fit in an `i64`.
    pub fn from_f64(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let cents = (amount * 100.0).round();
        // i64::MAX as f64 rounds up to 2^63, so `<` keeps the cast exact.
        if cents >= i64::MAX as f64 {
            return None;
        }
        Some(Price(cents as i64))
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

/// What a scraped price cell may look like before normalization.
#[derive(Debug, Clone, Copy)]
pub enum PriceInput<'a> {
    Numeric(f64),
    Text(&'a str),
}

impl<'a> From<&'a str> for PriceInput<'a> {
    fn from(text: &'a str) -> Self {
        PriceInput::Text(text)
    }
}

impl<'a> From<&'a String> for PriceInput<'a> {
    fn from(text: &'a String) -> Self {
        PriceInput::Text(text.as_str())
    }
}

impl From<f64> for PriceInput<'_> {
    fn from(amount: f64) -> Self {
        PriceInput::Numeric(amount)
    }
}

impl From<i64> for PriceInput<'_> {
    fn from(amount: i64) -> Self {
        PriceInput::Numeric(amount as f64)
    }
}

/// Converts a scraped price ("R$ 1.234,56", "$1,234.56", 2500.0) into cents.
///
/// Returns `None` when the text carries an unavailability marker or cannot be
/// read as an amount. Callers treat `None` as "no usable price".
pub fn normalize_price<'a>(raw: impl Into<PriceInput<'a>>) -> Option<Price> {
    match raw.into() {
        PriceInput::Numeric(amount) => Price::from_f64(amount),
        PriceInput::Text(text) => normalize_price_text(text),
    }
}

fn normalize_price_text(text: &str) -> Option<Price> {
    let lowered = text.to_lowercase();
    if UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return None;
    }

    let mut stripped = text.to_string();
    for symbol in CURRENCY_SYMBOLS {
        stripped = stripped.replace(symbol, "");
    }
    let stripped: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();

    if stripped.is_empty()
        || !stripped
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    canonical_decimal(&stripped)?.parse::<f64>().ok().and_then(Price::from_f64)
}

/// Rewrites a locale-formatted number into `1234.56` form. The last separator
/// is a decimal point iff it is followed by one or two digits; every other
/// separator groups thousands.
fn canonical_decimal(number: &str) -> Option<String> {
    let digits_only = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();

    let canonical = match number.rfind(['.', ',']) {
        Some(idx) if (2..=3).contains(&(number.len() - idx)) => {
            let (int_part, frac_part) = number.split_at(idx);
            let int_digits = digits_only(int_part);
            let int_digits = if int_digits.is_empty() { "0".to_string() } else { int_digits };
            format!("{}.{}", int_digits, &frac_part[1..])
        }
        _ => digits_only(number),
    };

    if canonical.is_empty() { None } else { Some(canonical) }
}

/// Reads a clock time out of locale text ("08:00", "8:05 PM", "Horário de
/// partida: 21h30.") and renders it as 24-hour `HH:MM`.
pub fn normalize_time(raw: &str) -> Option<String> {
    let text = clean_text(raw);
    let caps = TIME_PATTERN.captures(&text)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2)?.as_str().parse().ok()?;

    if let Some(meridiem) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = meridiem.as_str().eq_ignore_ascii_case("p");
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

/// Collapses the non-breaking and narrow spaces the page uses between tokens
/// and trims the result.
pub fn clean_text(raw: &str) -> String {
    raw.replace(['\u{a0}', '\u{202f}'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brazilian_currency_format() {
        assert_eq!(normalize_price("R$ 1.234,56"), Some(Price::from_cents(123456)));
        assert_eq!(normalize_price("R$\u{a0}2.500,00"), Some(Price::from_cents(250000)));
        assert_eq!(normalize_price("R$ 2.500"), Some(Price::from_cents(250000)));
        assert_eq!(normalize_price("R$ 980"), Some(Price::from_cents(98000)));
    }

    #[test]
    fn dot_decimal_format() {
        assert_eq!(normalize_price("$1,234.56"), Some(Price::from_cents(123456)));
        assert_eq!(normalize_price("2500.5"), Some(Price::from_cents(250050)));
    }

    #[test]
    fn unavailable_marker_is_absent() {
        assert_eq!(normalize_price("Price unavailable"), None);
        assert_eq!(normalize_price("UNAVAILABLE"), None);
        assert_eq!(normalize_price("Preço Indisponível"), None);
    }

    #[test]
    fn garbage_is_absent_not_error() {
        assert_eq!(normalize_price(""), None);
        assert_eq!(normalize_price("R$"), None);
        assert_eq!(normalize_price("ver preços"), None);
        assert_eq!(normalize_price("12 ou 13"), None);
    }

    #[test]
    fn numeric_input_passes_through() {
        assert_eq!(normalize_price(2500.0), Some(Price::from_cents(250000)));
        assert_eq!(normalize_price(1234.567), Some(Price::from_cents(123457)));
        assert_eq!(normalize_price(42_i64), Some(Price::from_cents(4200)));
        assert_eq!(normalize_price(f64::NAN), None);
        assert_eq!(normalize_price(-1.0), None);
    }

    #[test]
    fn amounts_beyond_i64_cents_are_absent() {
        assert_eq!(normalize_price("R$ 999.999.999.999.999.999.999,00"), None);
        assert_eq!(normalize_price(1e17), None);
        assert_eq!(normalize_price(f64::MAX), None);
        assert_eq!(normalize_price(1e16), Some(Price::from_cents(1_000_000_000_000_000_000)));
    }

    #[test]
    fn price_display_has_two_decimals() {
        assert_eq!(Price::from_cents(250000).to_string(), "2500.00");
        assert_eq!(Price::from_cents(105).to_string(), "1.05");
        assert_eq!(Price::from_cents(-5).to_string(), "-0.05");
        assert_eq!(Price::from_cents(-250).to_string(), "-2.50");
        assert_eq!(Price::from_cents(i64::MIN).to_string(), "-92233720368547758.08");
    }

    #[test]
    fn times_are_canonicalized() {
        assert_eq!(normalize_time("08:00").as_deref(), Some("08:00"));
        assert_eq!(normalize_time("8:05\u{202f}PM").as_deref(), Some("20:05"));
        assert_eq!(normalize_time("12:30 a.m.").as_deref(), Some("00:30"));
        assert_eq!(
            normalize_time("Horário de partida: 21h30.").as_deref(),
            Some("21:30")
        );
        assert_eq!(normalize_time("07:30+1").as_deref(), Some("07:30"));
        assert_eq!(normalize_time("N/A"), None);
        assert_eq!(normalize_time("25:00"), None);
    }

    #[test]
    fn clean_text_collapses_spaces() {
        assert_eq!(clean_text("  LATAM\u{a0} Airlines \n"), "LATAM Airlines");
    }
}
