use crate::endp::eodhd::{FundamentalsPayload, Statement};
use crate::error::FetchError;
use crate::schema::common::market_close;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap as Map;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Normalized records
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One ticker-and-date statement record.
///
/// The payload is open-ended; the provider's field set varies by ticker
/// and over time, so everything beyond the identity rides in a flattened
/// map of raw values.
///
/// ```text
/// {
///     "ticker": "MSFT",
///     "symbol": "MSFT.US",
///     "date": "2023-06-30T20:00:00Z",
///     "totalAssets": "411976000000.00",
///     "netIncome": 20081000000.0,
///     ...
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FinancialRecord {
    pub ticker: String,
    pub symbol: String,
    pub date: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FinancialRecord {
    /// `(ticker, date)` is the upsert identity in both sinks.
    pub fn doc_id(&self) -> String {
        format!("{}:{}", self.ticker, self.date.to_rfc3339())
    }

    // Statement fragments for the same period combine here; the
    // later-processed fragment wins on overlapping field names.
    fn absorb(&mut self, fields: Map<String, Value>) {
        self.fields.extend(fields);
    }
}

/// Reporting cadence; also names the destination table/database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    Quarterly,
    Annual,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        }
    }

    /// Does a statement sub-key (`quarterly`, `yearly_last_2`, ...) belong
    /// to this cadence?
    fn matches(&self, sub_key: &str) -> bool {
        match self {
            Self::Quarterly => sub_key == "quarterly" || sub_key.starts_with("quarterly_last"),
            Self::Annual => sub_key == "yearly" || sub_key.starts_with("yearly_last"),
        }
    }
}

/// Quarterly and annual record sets for one ticker, or accumulated over a
/// bulk chunk. No ordering guarantee on either list.
#[derive(Debug, Default)]
pub struct PeriodCollection {
    pub quarterly: Vec<FinancialRecord>,
    pub annual: Vec<FinancialRecord>,
}

impl PeriodCollection {
    pub fn merge(&mut self, other: PeriodCollection) {
        self.quarterly.extend(other.quarterly);
        self.annual.extend(other.annual);
    }

    pub fn get(&self, granularity: Granularity) -> &[FinancialRecord] {
        match granularity {
            Granularity::Quarterly => &self.quarterly,
            Granularity::Annual => &self.annual,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quarterly.is_empty() && self.annual.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Normalization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Flatten one ticker's raw payload into quarterly and annual record sets.
///
/// Rejects ETF payloads and payloads without a financials section.
/// Financials whose periods cannot be dated normalize to empty sets, not
/// an error.
pub fn normalize(
    ticker: &str,
    symbol: &str,
    payload: &FundamentalsPayload,
) -> Result<PeriodCollection, FetchError> {
    if payload.etf_data.is_some() {
        return Err(FetchError::EtfDataPresent(ticker.to_string()));
    }
    let financials = payload
        .financials
        .as_ref()
        .filter(|financials| !financials.is_empty())
        .ok_or_else(|| FetchError::NoFinancials(ticker.to_string()))?;

    // statement order matters only on field-name collisions, where the
    // later statement wins
    let statements = [
        &financials.balance_sheet,
        &financials.cash_flow,
        &financials.income_statement,
    ];

    let mut collection = PeriodCollection::default();
    for granularity in [Granularity::Quarterly, Granularity::Annual] {
        let mut merged: Map<String, FinancialRecord> = Map::new();
        for statement in statements {
            accumulate(ticker, symbol, statement, granularity, &mut merged);
        }
        let records = merged.into_values().collect();
        match granularity {
            Granularity::Quarterly => collection.quarterly = records,
            Granularity::Annual => collection.annual = records,
        }
    }
    Ok(collection)
}

/// Merge every dateable period entry of `statement` into the accumulator,
/// keyed by the canonical date's RFC 3339 instant.
fn accumulate(
    ticker: &str,
    symbol: &str,
    statement: &Statement,
    granularity: Granularity,
    merged: &mut Map<String, FinancialRecord>,
) {
    for (sub_key, sub_value) in statement
        .0
        .iter()
        .filter(|(sub_key, _)| granularity.matches(sub_key))
    {
        for (period_key, fields) in period_entries(sub_key, sub_value) {
            let Some(date) = canonical_date(&fields, &period_key) else {
                // neither a filing date nor a usable key; nothing to date
                // the entry by
                continue;
            };
            merged
                .entry(date.to_rfc3339())
                .or_insert_with(|| FinancialRecord {
                    ticker: ticker.to_string(),
                    symbol: symbol.to_string(),
                    date,
                    fields: Map::new(),
                })
                .absorb(fields);
        }
    }
}

// Single-ticker sections nest period keys under `quarterly`/`yearly`;
// bulk sections put one flat field map directly under `quarterly_last_N`.
fn period_entries(sub_key: &str, sub_value: &Value) -> Vec<(String, Map<String, Value>)> {
    let Some(object) = sub_value.as_object() else {
        return vec![];
    };
    if !object.is_empty() && object.values().all(Value::is_object) {
        object
            .iter()
            .map(|(period_key, entry)| (period_key.clone(), to_fields(entry)))
            .collect()
    } else {
        vec![(sub_key.to_string(), to_fields(sub_value))]
    }
}

fn to_fields(entry: &Value) -> Map<String, Value> {
    entry
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

// The entry's own filing date wins; the period's dictionary key is the
// fallback.
fn canonical_date(fields: &Map<String, Value>, period_key: &str) -> Option<DateTime<Utc>> {
    fields
        .get("filing_date")
        .and_then(Value::as_str)
        .and_then(market_close)
        .or_else(|| market_close(period_key))
}
