use crate::api::HttpClient;
use crate::error::SinkError;
use crate::schema::stock::fundamentals::{FinancialRecord, Granularity};
use lode_util::CouchDb;
use serde_json::{json, Value};
use tracing::trace;

/// Build the `_bulk_docs` body: one full-replacement op per record, id'd
/// by `(ticker, date)`. Writing the same record twice produces the same
/// op, so the upsert is idempotent.
pub(crate) fn upsert_docs(records: &[FinancialRecord]) -> Vec<Value> {
    records
        .iter()
        .map(|record| {
            let mut doc = json!(record);
            doc["_id"] = json!(record.doc_id());
            doc
        })
        .collect()
}

/// Upsert `records` into the document database for `granularity` as a
/// single bulk operation.
pub async fn upsert_records(
    http_client: &HttpClient,
    base_url: &str,
    granularity: Granularity,
    records: &[FinancialRecord],
) -> Result<usize, SinkError> {
    let db = format!("{base_url}/{}", granularity.as_str());
    trace!("upserting {} records into {db}", records.len());

    let statuses = http_client
        .bulk_upsert(&db, upsert_docs(records))
        .await
        .map_err(|err| SinkError::Document(err.to_string()))?;

    let rejected = statuses.iter().filter(|status| !status.is_ok()).count();
    if rejected > 0 {
        return Err(SinkError::Document(format!(
            "{rejected} of {} upserts rejected by {db}",
            statuses.len()
        )));
    }
    Ok(statuses.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record() -> FinancialRecord {
        let mut fields = BTreeMap::new();
        fields.insert("totalAssets".to_string(), json!(411976000000.0));
        FinancialRecord {
            ticker: "MSFT".to_string(),
            symbol: "MSFT.US".to_string(),
            date: Utc.with_ymd_and_hms(2023, 6, 30, 20, 0, 0).unwrap(),
            fields,
        }
    }

    #[test]
    fn docs_carry_identity_and_flattened_fields() {
        let docs = upsert_docs(&[record()]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], json!("MSFT:2023-06-30T20:00:00+00:00"));
        assert_eq!(docs[0]["ticker"], json!("MSFT"));
        assert_eq!(docs[0]["totalAssets"], json!(411976000000.0));
        // payload fields sit at the top level, not under a nested map
        assert!(docs[0].get("fields").is_none());
    }

    #[test]
    fn rewriting_a_record_produces_the_same_op() {
        let first = upsert_docs(&[record()]);
        let second = upsert_docs(&[record()]);
        assert_eq!(first, second);
    }
}
