use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

/// Fundamentals are keyed to the close of their filing day.
const MARKET_CLOSE_HOUR: u32 = 16;

/// Time zone of the listing exchange. US listings only, for now.
pub const EXCHANGE_TZ: Tz = chrono_tz::America::New_York;

/// Anchor a `%Y-%m-%d` date string to the market close in the exchange's
/// local time, as an absolute instant. Unparseable input is `None`.
pub fn market_close(date: &str) -> Option<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let local = day.and_hms_opt(MARKET_CLOSE_HOUR, 0, 0)?;
    EXCHANGE_TZ
        .from_local_datetime(&local)
        .single()
        .map(|close| close.with_timezone(&Utc))
}

/// A native or stringly numeric value as f64; anything else is `None`.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Double-quote an identifier for interpolation into warehouse SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
