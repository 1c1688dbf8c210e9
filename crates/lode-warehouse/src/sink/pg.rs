use crate::api::PgClient;
use crate::error::SinkError;
use crate::schema::common::{as_f64, quote_ident};
use crate::schema::infer::AnalyticalSchema;
use crate::schema::stock::fundamentals::{FinancialRecord, Granularity};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tracing::{debug, trace, warn};

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Stage-then-merge into the warehouse
//
// The warehouse tables have no per-key upsert, so every write lands in a
// uniquely-named staging table first and is folded into the main table
// with one MERGE on (ticker, date).
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Warehouse schema holding the fundamentals tables.
pub const DATASET: &str = "financials";

/// Rows per staged INSERT; keeps each statement inside the sink's payload
/// limits.
const INSERT_CHUNK_ROWS: usize = 500;

/// Wire-protocol ceiling on bind parameters per statement.
const MAX_INSERT_PARAMS: usize = 65_535;

/// Attempts of the visibility poll after table creation.
const CREATE_VISIBILITY_ATTEMPTS: u32 = 3;

/// Stage `records` and merge them into `financials.{granularity}`.
/// Returns the merged row count. The staging table is dropped whatever
/// the merge outcome.
pub async fn stage_and_merge(
    pg_client: &PgClient,
    schema: &AnalyticalSchema,
    granularity: Granularity,
    records: &[FinancialRecord],
) -> Result<u64, SinkError> {
    let table = granularity.as_str();
    ensure_table(pg_client, schema, table).await?;

    let temp = temp_table_name(table, Utc::now().timestamp());
    pg_client
        .execute(create_ddl(schema, &temp, false).as_str(), &[])
        .await?;

    let merged = stage_then_merge(pg_client, schema, table, &temp, records).await;

    // cleanup is best-effort and never escalated
    let drop = format!("DROP TABLE IF EXISTS {DATASET}.{}", quote_ident(&temp));
    if let Err(err) = pg_client.execute(drop.as_str(), &[]).await {
        warn!("failed to drop {DATASET}.{temp}: {err}");
    }

    merged
}

async fn stage_then_merge(
    pg_client: &PgClient,
    schema: &AnalyticalSchema,
    table: &str,
    temp: &str,
    records: &[FinancialRecord],
) -> Result<u64, SinkError> {
    insert_chunks(pg_client, schema, temp, records).await?;
    let merged = pg_client
        .execute(merge_sql(schema, table, temp).as_str(), &[])
        .await?;
    debug!("merged {merged} rows into {DATASET}.{table}");
    Ok(merged)
}

/// Create the destination table if absent, wait for it to become visible,
/// and add any schema columns it does not have yet.
async fn ensure_table(
    pg_client: &PgClient,
    schema: &AnalyticalSchema,
    table: &str,
) -> Result<(), SinkError> {
    pg_client
        .execute(format!("CREATE SCHEMA IF NOT EXISTS {DATASET}").as_str(), &[])
        .await?;
    pg_client
        .execute(create_ddl(schema, table, true).as_str(), &[])
        .await?;

    // a freshly created table is not always immediately visible to readers
    for attempt in 0..CREATE_VISIBILITY_ATTEMPTS {
        if table_exists(pg_client, table).await? {
            evolve_columns(pg_client, schema, table).await?;
            return Ok(());
        }
        if attempt + 1 < CREATE_VISIBILITY_ATTEMPTS {
            let wait = Duration::from_secs(1 << attempt);
            trace!("{DATASET}.{table} not visible yet; retrying in {wait:?}");
            tokio::time::sleep(wait).await;
        }
    }
    Err(SinkError::Analytical(format!(
        "{DATASET}.{table} did not become visible after {CREATE_VISIBILITY_ATTEMPTS} attempts"
    )))
}

async fn table_exists(pg_client: &PgClient, table: &str) -> Result<bool, SinkError> {
    let row = pg_client
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
            &[&DATASET, &table],
        )
        .await?;
    Ok(row.get(0))
}

/// The schema evolves additively; a batch surfacing a new numeric field
/// grows the table by one column.
async fn evolve_columns(
    pg_client: &PgClient,
    schema: &AnalyticalSchema,
    table: &str,
) -> Result<(), SinkError> {
    for field in schema.numeric_fields() {
        let alter = format!(
            "ALTER TABLE {DATASET}.{} ADD COLUMN IF NOT EXISTS {} DOUBLE PRECISION",
            quote_ident(table),
            quote_ident(field),
        );
        pg_client.execute(alter.as_str(), &[]).await?;
    }
    Ok(())
}

/// Insert the staged rows in fixed-size chunks.
async fn insert_chunks(
    pg_client: &PgClient,
    schema: &AnalyticalSchema,
    temp: &str,
    records: &[FinancialRecord],
) -> Result<(), SinkError> {
    let staged: Vec<StagedRow> = records
        .iter()
        .map(|record| StagedRow::new(record, schema))
        .collect();

    for chunk in staged.chunks(rows_per_chunk(schema.fields.len())) {
        let sql = insert_sql(schema, temp, chunk.len());
        let mut params: Vec<&(dyn ToSql + Sync)> =
            Vec::with_capacity(chunk.len() * schema.fields.len());
        for row in chunk {
            params.push(&row.ticker);
            params.push(&row.symbol);
            params.push(&row.date);
            for value in &row.values {
                params.push(value);
            }
        }
        pg_client.execute(sql.as_str(), &params).await?;
        trace!("staged {} rows into {DATASET}.{temp}", chunk.len());
    }
    Ok(())
}

/// A record filtered down to the inferred schema: identity columns plus
/// coerced numerics; every other field is dropped from this sink.
struct StagedRow<'a> {
    ticker: &'a str,
    symbol: &'a str,
    date: DateTime<Utc>,
    values: Vec<Option<f64>>,
}

impl<'a> StagedRow<'a> {
    fn new(record: &'a FinancialRecord, schema: &AnalyticalSchema) -> Self {
        let values = schema
            .numeric_fields()
            .map(|field| record.fields.get(field).and_then(as_f64))
            .collect();
        Self {
            ticker: &record.ticker,
            symbol: &record.symbol,
            date: record.date,
            values,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// SQL building
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// A wide schema can hit the parameter ceiling before the row cap does.
fn rows_per_chunk(width: usize) -> usize {
    INSERT_CHUNK_ROWS.min(MAX_INSERT_PARAMS / width.max(1)).max(1)
}

fn temp_table_name(table: &str, timestamp: i64) -> String {
    format!("{table}_temp_{timestamp}")
}

fn create_ddl(schema: &AnalyticalSchema, table: &str, with_key: bool) -> String {
    let mut columns: Vec<String> = schema
        .fields
        .iter()
        .map(|(name, field_type)| format!("{} {}", quote_ident(name), field_type.ddl()))
        .collect();
    if with_key {
        columns.push("PRIMARY KEY (ticker, \"date\")".to_string());
    }
    let head = if with_key {
        "CREATE TABLE IF NOT EXISTS"
    } else {
        "CREATE TABLE"
    };
    format!("{head} {DATASET}.{} ({})", quote_ident(table), columns.join(", "))
}

fn insert_sql(schema: &AnalyticalSchema, table: &str, rows: usize) -> String {
    let columns = schema
        .fields
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let width = schema.fields.len();
    let values = (0..rows)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|column| format!("${}", row * width + column))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {DATASET}.{} ({columns}) VALUES {values}",
        quote_ident(table)
    )
}

// The merge column list comes from the inferred schema, not from sampling
// a staged row; a sparse staging table still merges every schema column,
// and an empty one merges zero rows instead of producing malformed SQL.
fn merge_sql(schema: &AnalyticalSchema, table: &str, temp: &str) -> String {
    let assignments = schema
        .fields
        .iter()
        .filter(|(name, _)| name != "ticker" && name != "date")
        .map(|(name, _)| format!("{0} = staged.{0}", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let columns = schema
        .fields
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let sources = schema
        .fields
        .iter()
        .map(|(name, _)| format!("staged.{}", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "MERGE INTO {DATASET}.{main} AS main \
         USING {DATASET}.{staging} AS staged \
         ON main.ticker = staged.ticker AND main.\"date\" = staged.\"date\" \
         WHEN MATCHED THEN UPDATE SET {assignments} \
         WHEN NOT MATCHED THEN INSERT ({columns}) VALUES ({sources})",
        main = quote_ident(table),
        staging = quote_ident(temp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::infer::infer_schema;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(fields: serde_json::Value) -> FinancialRecord {
        let fields: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(fields).unwrap();
        FinancialRecord {
            ticker: "MSFT".to_string(),
            symbol: "MSFT.US".to_string(),
            date: Utc.with_ymd_and_hms(2023, 6, 30, 20, 0, 0).unwrap(),
            fields,
        }
    }

    #[test]
    fn chunking_respects_both_row_and_parameter_caps() {
        assert_eq!(rows_per_chunk(4), 500);
        assert_eq!(rows_per_chunk(200), 327);
    }

    #[test]
    fn temp_tables_are_timestamp_suffixed() {
        assert_eq!(
            temp_table_name("quarterly", 1700000000),
            "quarterly_temp_1700000000"
        );
    }

    #[test]
    fn create_ddl_carries_identity_and_numeric_columns() {
        let schema = infer_schema(&[record(json!({ "revenue": 1.0 }))]);
        let ddl = create_ddl(&schema, "quarterly", true);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS financials.\"quarterly\""));
        assert!(ddl.contains("\"ticker\" TEXT"));
        assert!(ddl.contains("\"date\" TIMESTAMPTZ"));
        assert!(ddl.contains("\"revenue\" DOUBLE PRECISION"));
        assert!(ddl.contains("PRIMARY KEY (ticker, \"date\")"));

        // staging tables carry the same columns without the key
        let staging = create_ddl(&schema, "quarterly_temp_1", false);
        assert!(staging.starts_with("CREATE TABLE financials.\"quarterly_temp_1\""));
        assert!(!staging.contains("PRIMARY KEY"));
    }

    #[test]
    fn insert_sql_numbers_placeholders_across_rows() {
        let schema = infer_schema(&[record(json!({ "revenue": 1.0 }))]);
        let sql = insert_sql(&schema, "quarterly_temp_1", 2);
        // 4 columns per row: ticker, symbol, date, revenue
        assert!(sql.contains("($1, $2, $3, $4), ($5, $6, $7, $8)"));
        assert!(sql.contains("(\"ticker\", \"symbol\", \"date\", \"revenue\")"));
    }

    #[test]
    fn merge_sql_matches_on_ticker_and_date_only() {
        let schema = infer_schema(&[record(json!({ "revenue": 1.0 }))]);
        let sql = merge_sql(&schema, "quarterly", "quarterly_temp_1");
        assert!(sql.contains("ON main.ticker = staged.ticker AND main.\"date\" = staged.\"date\""));
        assert!(sql.contains("\"symbol\" = staged.\"symbol\""));
        assert!(sql.contains("\"revenue\" = staged.\"revenue\""));
        assert!(!sql.contains("\"ticker\" = staged.\"ticker\""));
        assert!(sql.contains(
            "WHEN NOT MATCHED THEN INSERT (\"ticker\", \"symbol\", \"date\", \"revenue\")"
        ));
    }

    #[test]
    fn staged_rows_follow_the_schema_not_the_record() {
        let batch = [
            record(json!({ "revenue": 100, "note": "restated" })),
            record(json!({ "revenue": "250.5", "eps": 1.2 })),
        ];
        let schema = infer_schema(&batch);

        // "note" never joins the schema; stringly "250.5" is coerced
        let first = StagedRow::new(&batch[0], &schema);
        let second = StagedRow::new(&batch[1], &schema);
        assert_eq!(first.values, vec![Some(100.0), None]);
        assert_eq!(second.values, vec![Some(250.5), Some(1.2)]);
    }
}
