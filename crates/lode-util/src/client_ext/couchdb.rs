use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use tracing::trace;

/// Add-on methods for [`reqwest::Client`], speaking the CouchDB protocol.
///
/// CouchDB updates require the document's current revision; an upsert is a
/// revision lookup followed by a write. `bulk_upsert()` does the lookup with
/// one `_all_docs` call and the write with one `_bulk_docs` call.
///
/// [`reqwest::Client`]: https://docs.rs/reqwest/latest/reqwest/struct.Client.html
pub trait ClientCouchExt {
    fn fetch_revs(
        &self,
        db: &str,
        ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    fn bulk_upsert(
        &self,
        db: &str,
        docs: Vec<Value>,
    ) -> impl Future<Output = Result<Vec<DocStatus>>> + Send;
}

impl ClientCouchExt for Client {
    /// Current revision id per existing document; missing ids are absent
    /// from the returned map.
    async fn fetch_revs(&self, db: &str, ids: &[String]) -> Result<HashMap<String, String>> {
        let response = self
            .post(format!("{db}/_all_docs"))
            .json(&json!({ "keys": ids }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "_all_docs against {db} returned {}",
                response.status()
            ));
        }

        let listing: AllDocs = response.json().await?;
        let revs = listing
            .rows
            .into_iter()
            .filter_map(|row| match (row.id, row.value) {
                (Some(id), Some(value)) => Some((id, value.rev)),
                _ => None, // deleted or never-written id
            })
            .collect();
        Ok(revs)
    }

    /// Upsert every document in `docs` with a single `_bulk_docs` call.
    ///
    /// Each doc must carry an `_id`; its `_rev` is filled in from a prior
    /// `_all_docs` lookup so existing documents are fully replaced rather
    /// than conflicted.
    async fn bulk_upsert(&self, db: &str, mut docs: Vec<Value>) -> Result<Vec<DocStatus>> {
        let ids: Vec<String> = docs
            .iter()
            .filter_map(|doc| doc["_id"].as_str().map(str::to_string))
            .collect();
        let revs = self.fetch_revs(db, &ids).await?;

        for doc in docs.iter_mut() {
            let id = doc["_id"].as_str().unwrap_or_default().to_string();
            if let Some(rev) = revs.get(&id) {
                doc["_rev"] = json!(rev);
            }
        }

        trace!("posting {} docs to {db}/_bulk_docs", docs.len());
        let response = self
            .post(format!("{db}/_bulk_docs"))
            .json(&json!({ "docs": docs }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "_bulk_docs against {db} returned {}",
                response.status()
            ));
        }

        let statuses: Vec<DocStatus> = response.json().await?;
        Ok(statuses)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// `_all_docs` with `keys` returns one row per requested id:
// { "rows": [
//      { "id": "MSFT:2023-06-30T20:00:00+00:00", "key": "...", "value": { "rev": "1-abc" } },
//      { "key": "AAPL:...", "error": "not_found" },
//      ...
// ] }
#[derive(Deserialize, Debug)]
struct AllDocs {
    rows: Vec<AllDocsRow>,
}

#[derive(Deserialize, Debug)]
struct AllDocsRow {
    id: Option<String>,
    value: Option<RevValue>,
}

#[derive(Deserialize, Debug)]
struct RevValue {
    rev: String,
}

/// Per-document outcome of a `_bulk_docs` write.
#[derive(Deserialize, Debug)]
pub struct DocStatus {
    pub id: Option<String>,
    #[serde(default)]
    pub ok: bool,
    pub error: Option<String>,
    pub reason: Option<String>,
}

impl DocStatus {
    pub fn is_ok(&self) -> bool {
        self.ok && self.error.is_none()
    }
}
