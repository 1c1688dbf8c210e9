use crate::api::{HttpClient, PgClient};
use crate::endp::eodhd::{Eodhd, BULK_LIMIT};
use crate::error::FetchError;
use crate::schema::stock::fundamentals::{self, Granularity, PeriodCollection};
use crate::sink::{DualSink, WriteReport};
use anyhow::{anyhow, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between bulk chunks, to ease provider rate-limit pressure.
const CHUNK_PACING: Duration = Duration::from_secs(1);

/// Drives ticker fundamentals from the provider into both sinks.
///
/// Strictly sequential: one chunk at a time, one ticker at a time inside
/// it, every network call awaited before the next starts.
pub struct Pipeline {
    pub http_client: HttpClient,
    pub pg_client: PgClient,
    pub source: Eodhd,
    pub couch_url: String,
}

impl Pipeline {
    pub fn new(http_client: HttpClient, pg_client: PgClient, source: Eodhd) -> Result<Self> {
        Ok(Self {
            http_client,
            pg_client,
            source,
            couch_url: std::env::var("COUCHDB_URL")?,
        })
    }

    fn sink(&self) -> DualSink<'_> {
        DualSink {
            http: &self.http_client,
            couch_url: &self.couch_url,
            pg: &self.pg_client,
        }
    }

    /// Fetch, normalize and dual-write a single ticker. Every failure —
    /// fetch, normalization or either sink — surfaces to the caller.
    pub async fn sync_one(&self, ticker: &str) -> Result<TickerSummary> {
        let ticker = ticker.to_uppercase();
        let payload = self.source.fetch_single(&self.http_client, &ticker).await?;
        let collection =
            fundamentals::normalize(&ticker, &self.source.symbol(&ticker), &payload)?;

        let writes = self.write_collection(&collection).await;
        for report in &writes {
            if let Err(err) = &report.document {
                return Err(anyhow!("[{ticker}] {}: {err}", report.granularity.as_str()));
            }
            if let Err(err) = &report.analytical {
                return Err(anyhow!("[{ticker}] {}: {err}", report.granularity.as_str()));
            }
        }
        Ok(TickerSummary {
            quarterly: collection.quarterly.len(),
            annual: collection.annual.len(),
        })
    }

    /// Drive the whole ticker list in provider-capped chunks. Failures are
    /// isolated — per ticker inside a chunk, per chunk across the run —
    /// and logged here, the single place that owns that policy.
    pub async fn sync_all(&self, tickers: &[String]) -> SyncReport {
        let started = std::time::Instant::now();
        let mut report = SyncReport::default();

        let chunks: Vec<&[String]> = tickers.chunks(BULK_LIMIT).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            let offset = index * BULK_LIMIT;
            match self.sync_chunk(chunk, offset).await {
                Ok(chunk_report) => {
                    self.log_chunk(&chunk_report);
                    report.chunks.push(chunk_report);
                }
                // a failed bulk call skips the chunk, never the run
                Err(err) => {
                    error!("chunk at offset {offset} failed: {err}");
                    report.failed_chunks += 1;
                }
            }

            // pace between chunks, not after the last
            if index + 1 < chunks.len() {
                tokio::time::sleep(CHUNK_PACING).await;
            }
        }

        report.elapsed = started.elapsed();
        report
    }

    async fn sync_chunk(&self, chunk: &[String], offset: usize) -> Result<ChunkReport, FetchError> {
        let payloads = self
            .source
            .fetch_bulk(&self.http_client, chunk, offset)
            .await?;
        debug!("{} payloads fetched at offset {offset}", payloads.len());

        let (collection, skipped) = collect_chunk(&self.source, &payloads);
        let writes = self.write_collection(&collection).await;
        Ok(ChunkReport {
            offset,
            fetched: payloads.len(),
            skipped,
            writes,
        })
    }

    async fn write_collection(&self, collection: &PeriodCollection) -> Vec<WriteReport> {
        let sink = self.sink();
        vec![
            sink.write(Granularity::Quarterly, &collection.quarterly).await,
            sink.write(Granularity::Annual, &collection.annual).await,
        ]
    }

    fn log_chunk(&self, chunk: &ChunkReport) {
        for skip in &chunk.skipped {
            warn!("[{}] skipped: {}", skip.ticker, skip.reason);
        }
        for write in &chunk.writes {
            if let Err(err) = &write.document {
                error!("{} sink: {err}", write.granularity.as_str());
            }
            if let Err(err) = &write.analytical {
                error!("{} sink: {err}", write.granularity.as_str());
            }
        }
        info!(
            "chunk at offset {}: {} payloads, {} skipped",
            chunk.offset,
            chunk.fetched,
            chunk.skipped.len(),
        );
    }
}

/// Normalize every payload of a fetched chunk, isolating per-ticker
/// failures: one bad ticker becomes a skip entry, never a chunk failure.
fn collect_chunk(
    source: &Eodhd,
    payloads: &[crate::endp::eodhd::FundamentalsPayload],
) -> (PeriodCollection, Vec<Skip>) {
    let mut collection = PeriodCollection::default();
    let mut skipped = Vec::new();
    for payload in payloads {
        let Some(code) = payload.general.code.as_deref() else {
            skipped.push(Skip {
                ticker: "?".to_string(),
                reason: "payload carries no ticker code".to_string(),
            });
            continue;
        };
        let ticker = code.to_uppercase();
        match fundamentals::normalize(&ticker, &source.symbol(&ticker), payload) {
            Ok(records) => collection.merge(records),
            Err(err) => skipped.push(Skip {
                ticker,
                reason: err.to_string(),
            }),
        }
    }
    (collection, skipped)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Run reports
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Record counts written for one ticker.
#[derive(Debug)]
pub struct TickerSummary {
    pub quarterly: usize,
    pub annual: usize,
}

/// One ticker set aside during a chunk, and why.
#[derive(Debug)]
pub struct Skip {
    pub ticker: String,
    pub reason: String,
}

/// Outcome of one bulk chunk.
#[derive(Debug)]
pub struct ChunkReport {
    pub offset: usize,
    pub fetched: usize,
    pub skipped: Vec<Skip>,
    pub writes: Vec<WriteReport>,
}

impl ChunkReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.writes.iter().all(WriteReport::is_clean)
    }
}

/// Outcome of a whole bulk run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub chunks: Vec<ChunkReport>,
    pub failed_chunks: usize,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn fetched(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.fetched).sum()
    }

    pub fn skipped(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.skipped.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_bad_ticker_never_sinks_its_chunk() {
        let source = Eodhd::new(
            "http://localhost".to_string(),
            "token".to_string(),
            "US".to_string(),
        );
        let payloads: Vec<crate::endp::eodhd::FundamentalsPayload> = [
            json!({
                "General": { "Code": "MSFT" },
                "Financials": {
                    "Balance_Sheet": {
                        "quarterly": { "2023-06-30": { "totalAssets": 1.0 } },
                    },
                },
            }),
            // an ETF and a financials-free ticker ride in the same chunk
            json!({ "General": { "Code": "SPY" }, "ETF_Data": {} }),
            json!({ "General": { "Code": "XXXX" } }),
        ]
        .into_iter()
        .map(|raw| serde_json::from_value(raw).unwrap())
        .collect();

        let (collection, skipped) = collect_chunk(&source, &payloads);
        assert_eq!(collection.quarterly.len(), 1);
        assert_eq!(collection.quarterly[0].ticker, "MSFT");

        let skipped_tickers: Vec<&str> =
            skipped.iter().map(|skip| skip.ticker.as_str()).collect();
        assert_eq!(skipped_tickers, vec!["SPY", "XXXX"]);
    }

    #[test]
    fn ticker_lists_split_at_the_provider_limit() {
        let tickers: Vec<String> = (0..1200).map(|i| format!("T{i}")).collect();
        let chunks: Vec<&[String]> = tickers.chunks(BULK_LIMIT).collect();

        let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
        assert_eq!(sizes, vec![500, 500, 200]);

        // pacing happens between consecutive chunks only
        let pacing_delays = chunks.len().saturating_sub(1);
        assert_eq!(pacing_delays, 2);
    }

    #[test]
    fn chunk_offsets_follow_the_limit() {
        let offsets: Vec<usize> = (0..3).map(|index| index * BULK_LIMIT).collect();
        assert_eq!(offsets, vec![0, 500, 1000]);
    }
}
