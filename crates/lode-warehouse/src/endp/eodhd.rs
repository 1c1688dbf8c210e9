use crate::api::HttpClient;
use crate::error::FetchError;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap as Map;
use tracing::trace;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// API Documentation: https://eodhistoricaldata.com/financial-apis/
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Hard cap the provider places on symbols per bulk-fundamentals call.
pub const BULK_LIMIT: usize = 500;

/// Version marker the bulk endpoint expects alongside its query parameters.
const API_VERSION: &str = "1.1";

pub struct Eodhd {
    base_url: String,
    token: String,
    pub exchange: String,
}

impl Eodhd {
    pub fn new(base_url: String, token: String, exchange: String) -> Self {
        Self {
            base_url,
            token,
            exchange,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(
            std::env::var("EODHD_URL")
                .unwrap_or_else(|_| "https://eodhistoricaldata.com/api".to_string()),
            std::env::var("EODHD_TOKEN")?,
            std::env::var("EXCHANGE").unwrap_or_else(|_| "US".to_string()),
        ))
    }

    /// Provider symbol for `ticker`; the uppercase code suffixed with the exchange.
    pub fn symbol(&self, ticker: &str) -> String {
        format!("{}.{}", ticker.to_uppercase(), self.exchange)
    }

    /// Fundamentals of a single ticker. No retry here; failures propagate
    /// immediately.
    pub async fn fetch_single(
        &self,
        http_client: &HttpClient,
        ticker: &str,
    ) -> Result<FundamentalsPayload, FetchError> {
        let url = format!(
            "{}/fundamentals/{}?api_token={}&fmt=json",
            self.base_url,
            self.symbol(ticker),
            self.token,
        );
        trace!("fetching fundamentals for {}", self.symbol(ticker));
        let response = http_client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound(ticker.to_string())),
            status => Err(FetchError::Provider(format!(
                "fundamentals for {ticker} returned {status}"
            ))),
        }
    }

    /// One bulk-fundamentals call. The caller keeps `tickers` within
    /// [`BULK_LIMIT`] and owns any retry policy; payloads come back in the
    /// provider's order, not the caller's.
    pub async fn fetch_bulk(
        &self,
        http_client: &HttpClient,
        tickers: &[String],
        offset: usize,
    ) -> Result<Vec<FundamentalsPayload>, FetchError> {
        let symbols = tickers
            .iter()
            .map(|ticker| self.symbol(ticker))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/bulk-fundamentals/{}?symbols={}&offset={}&limit={}&version={}&api_token={}&fmt=json",
            self.base_url,
            self.exchange,
            symbols,
            offset,
            BULK_LIMIT,
            API_VERSION,
            self.token,
        );
        trace!("fetching bulk fundamentals at offset {offset}");
        let response = http_client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let bulk: BulkFundamentals = response.json().await?;
                Ok(bulk.0)
            }
            status => Err(FetchError::Provider(format!(
                "bulk fundamentals at offset {offset} returned {status}"
            ))),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// {
//    "General": { "Code": "MSFT", ... },
//    "Financials": {
//        "Balance_Sheet": {
//            "quarterly": {
//                "2023-06-30": { "filing_date": "2023-07-27", "totalAssets": "411976000000.00", ... },
//                ...
//            },
//            "yearly": { ... }
//        },
//        "Cash_Flow": { ... },
//        "Income_Statement": { ... }
//    }
// }
//
// ETF payloads swap "Financials" for an "ETF_Data" section; those tickers
// are excluded from the pipeline.
#[derive(Deserialize, Debug, Default)]
pub struct FundamentalsPayload {
    #[serde(rename = "General", default)]
    pub general: General,
    #[serde(rename = "ETF_Data", default)]
    pub etf_data: Option<Value>,
    #[serde(rename = "Financials", default)]
    pub financials: Option<Financials>,
}

#[derive(Deserialize, Debug, Default)]
pub struct General {
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Financials {
    #[serde(rename = "Balance_Sheet", default)]
    pub balance_sheet: Statement,
    #[serde(rename = "Cash_Flow", default)]
    pub cash_flow: Statement,
    #[serde(rename = "Income_Statement", default)]
    pub income_statement: Statement,
}

impl Financials {
    pub fn is_empty(&self) -> bool {
        self.balance_sheet.0.is_empty()
            && self.cash_flow.0.is_empty()
            && self.income_statement.0.is_empty()
    }
}

/// One statement section. Sub-keys are `quarterly`/`yearly` on the
/// single-ticker endpoint and `quarterly_last_N`/`yearly_last_N` (N in
/// 0..3) on the bulk endpoint; values map period keys to flat field maps.
#[derive(Deserialize, Debug, Default)]
pub struct Statement(pub Map<String, Value>);

/// Bulk responses key payloads by batch position rather than returning a
/// plain array:
/// `{ "0": { "General": ... }, "1": { ... }, ... }`
pub struct BulkFundamentals(pub Vec<FundamentalsPayload>);

struct BulkVisitor;

impl<'de> Visitor<'de> for BulkVisitor {
    type Value = BulkFundamentals;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("an array or index-keyed map of fundamentals payloads")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut payloads = Vec::new();
        while let Some(payload) = seq.next_element::<FundamentalsPayload>()? {
            payloads.push(payload);
        }
        Ok(BulkFundamentals(payloads))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut payloads = Vec::new();
        while let Some((_, payload)) = map.next_entry::<String, FundamentalsPayload>()? {
            payloads.push(payload);
        }
        Ok(BulkFundamentals(payloads))
    }
}

impl<'de> Deserialize<'de> for BulkFundamentals {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(BulkVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bulk_payloads_deserialize_from_indexed_map() {
        let raw = json!({
            "0": { "General": { "Code": "AAPL" } },
            "1": { "General": { "Code": "MSFT" } },
        });
        let bulk: BulkFundamentals = serde_json::from_value(raw).unwrap();
        let codes: Vec<_> = bulk
            .0
            .iter()
            .map(|payload| payload.general.code.clone().unwrap())
            .collect();
        assert_eq!(codes, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn bulk_payloads_deserialize_from_array() {
        let raw = json!([
            { "General": { "Code": "AAPL" } },
        ]);
        let bulk: BulkFundamentals = serde_json::from_value(raw).unwrap();
        assert_eq!(bulk.0.len(), 1);
    }

    #[test]
    fn etf_marker_survives_deserialization() {
        let raw = json!({
            "General": { "Code": "SPY" },
            "ETF_Data": { "Company_Name": "SPDR" },
        });
        let payload: FundamentalsPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.etf_data.is_some());
        assert!(payload.financials.is_none());
    }
}
