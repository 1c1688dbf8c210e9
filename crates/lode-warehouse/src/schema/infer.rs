use crate::schema::stock::fundamentals::FinancialRecord;
use serde_json::Value;
use std::collections::BTreeSet;

/// Column types the warehouse understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Timestamp,
    Float64,
}

impl FieldType {
    pub fn ddl(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Timestamp => "TIMESTAMPTZ",
            Self::Float64 => "DOUBLE PRECISION",
        }
    }
}

/// Identity columns every fundamentals table carries.
pub const IDENTITY_FIELDS: [(&str, FieldType); 3] = [
    ("ticker", FieldType::Text),
    ("symbol", FieldType::Text),
    ("date", FieldType::Timestamp),
];

/// Minimal warehouse schema for one record batch: the identity columns
/// plus every field observed as a native number anywhere in the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticalSchema {
    pub fields: Vec<(String, FieldType)>,
}

impl AnalyticalSchema {
    /// The numeric (non-identity) column names, in schema order.
    pub fn numeric_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field_type)| *field_type == FieldType::Float64)
            .map(|(name, _)| name.as_str())
    }
}

/// Derive the analytical schema from a record batch.
///
/// Recomputed on every write, never cached; two batches may legitimately
/// disagree as new numeric fields appear. A field joins the schema the
/// first time it is seen as a native number; non-numeric occurrences of
/// the same field are coerced or dropped at write time.
pub fn infer_schema(records: &[FinancialRecord]) -> AnalyticalSchema {
    let mut fields: Vec<(String, FieldType)> = IDENTITY_FIELDS
        .iter()
        .map(|(name, field_type)| (name.to_string(), *field_type))
        .collect();
    let mut seen: BTreeSet<String> = fields.iter().map(|(name, _)| name.clone()).collect();

    for record in records {
        for (name, value) in &record.fields {
            if matches!(value, Value::Number(_)) && !seen.contains(name) {
                seen.insert(name.clone());
                fields.push((name.clone(), FieldType::Float64));
            }
        }
    }

    AnalyticalSchema { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(fields: serde_json::Value) -> FinancialRecord {
        let fields: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(fields).unwrap();
        FinancialRecord {
            ticker: "A".to_string(),
            symbol: "A.US".to_string(),
            date: Utc.with_ymd_and_hms(2023, 6, 30, 20, 0, 0).unwrap(),
            fields,
        }
    }

    #[test]
    fn identity_columns_always_lead() {
        let schema = infer_schema(&[]);
        let names: Vec<_> = schema.fields.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["ticker", "symbol", "date"]);
    }

    #[test]
    fn numeric_fields_are_included_exactly_once() {
        let records = [
            record(json!({ "revenue": 100 })),
            record(json!({ "revenue": "n/a" })),
        ];
        let schema = infer_schema(&records);
        let revenue: Vec<_> = schema
            .fields
            .iter()
            .filter(|(name, _)| name == "revenue")
            .collect();
        assert_eq!(revenue.len(), 1);
        assert_eq!(revenue[0].1, FieldType::Float64);
    }

    #[test]
    fn non_numeric_fields_never_join_the_schema() {
        let records = [record(json!({ "currency": "USD", "assets": 1.0 }))];
        let schema = infer_schema(&records);
        assert!(schema.fields.iter().all(|(name, _)| name != "currency"));
        assert!(schema.fields.iter().any(|(name, _)| name == "assets"));
    }

    #[test]
    fn payload_fields_shadowing_identity_names_are_ignored() {
        let records = [record(json!({ "ticker": 7 }))];
        let schema = infer_schema(&records);
        let tickers: Vec<_> = schema
            .fields
            .iter()
            .filter(|(name, _)| name == "ticker")
            .collect();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].1, FieldType::Text);
    }
}
