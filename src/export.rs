//! Serialization of flattened results into export files
//!
//! CSV follows RFC 4180 quoting: every field is quoted, embedded quotes are
//! doubled, rows end with CRLF. List values are joined with `;`.

use crate::catalog::Record;
use crate::error::Result;
use crate::types::DataFormat;
use serde_json::Value;

/// Serialize `records` in the requested format
pub fn serialize(format: DataFormat, records: &[Record]) -> Result<String> {
    match format {
        DataFormat::Csv => Ok(to_csv(records)),
        DataFormat::Json => to_json(records),
    }
}

/// JSON array of records
pub fn to_json(records: &[Record]) -> Result<String> {
    Ok(serde_json::to_string(records)?)
}

/// CSV with a header row taken from the first record's keys
///
/// Later records are written in the header's column order; keys they lack
/// become empty fields and extra keys are dropped.
pub fn to_csv(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(
        columns
            .iter()
            .map(|column| quote(column))
            .collect::<Vec<_>>()
            .join(","),
    );
    for record in records {
        rows.push(
            columns
                .iter()
                .map(|column| quote(&field_text(record.get(*column))))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    rows.join("\r\n")
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| field_text(Some(v)))
            .collect::<Vec<_>>()
            .join(";"),
        Some(other) => other.to_string(),
    }
}
