pub mod couch;
pub mod pg;

use crate::api::{HttpClient, PgClient};
use crate::error::SinkError;
use crate::schema::infer::infer_schema;
use crate::schema::stock::fundamentals::{FinancialRecord, Granularity};

/// Both persistence destinations for normalized records.
///
/// The paths are decoupled: the document write goes first and an
/// analytical failure never prevents or reverses it. Outcomes are
/// reported, not logged here; the orchestrator owns that policy.
pub struct DualSink<'a> {
    pub http: &'a HttpClient,
    pub couch_url: &'a str,
    pub pg: &'a PgClient,
}

/// Outcome of one dual write for one granularity.
#[derive(Debug)]
pub struct WriteReport {
    pub granularity: Granularity,
    pub records: usize,
    pub document: Result<usize, SinkError>,
    pub analytical: Result<u64, SinkError>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.document.is_ok() && self.analytical.is_ok()
    }
}

impl DualSink<'_> {
    /// Upsert `records` into the document store, then stage-and-merge them
    /// into the warehouse. Both writes are attempted even when the first
    /// fails.
    pub async fn write(
        &self,
        granularity: Granularity,
        records: &[FinancialRecord],
    ) -> WriteReport {
        if records.is_empty() {
            return WriteReport {
                granularity,
                records: 0,
                document: Ok(0),
                analytical: Ok(0),
            };
        }

        let document =
            couch::upsert_records(self.http, self.couch_url, granularity, records).await;

        // recomputed per batch; new numeric fields become new columns
        let schema = infer_schema(records);
        let analytical = pg::stage_and_merge(self.pg, &schema, granularity, records).await;

        WriteReport {
            granularity,
            records: records.len(),
            document,
            analytical,
        }
    }
}
