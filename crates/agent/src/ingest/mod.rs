//! Interaction data loaders
//!
//! Reads (drug, drug, description) triples from CSV or JSON files. The file
//! format is dispatched on extension; rows that cannot be parsed at all are
//! dropped here with a count, while rows with missing fields flow through to
//! the store's own skip accounting.

use crate::store::InteractionRecord;
use pharmgraph_common::errors::{AppError, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Raw row shape shared by the CSV and JSON loaders.
///
/// Accepts both `drug1`/`drug2` and `drug_1`/`drug_2` column names, and
/// `condition` or `description` for the interaction text.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(alias = "drug_1", alias = "drug_a", default)]
    drug1: Option<String>,
    #[serde(alias = "drug_2", alias = "drug_b", default)]
    drug2: Option<String>,
    #[serde(alias = "description", default)]
    condition: Option<String>,
}

impl From<RawRecord> for InteractionRecord {
    fn from(raw: RawRecord) -> Self {
        InteractionRecord::new(
            raw.drug1.unwrap_or_default(),
            raw.drug2.unwrap_or_default(),
            raw.condition.unwrap_or_default(),
        )
    }
}

/// Load interaction records from a file, dispatching on extension.
///
/// Returns the parsed records and the number of rows dropped because they
/// could not be parsed.
pub fn load_records(path: impl AsRef<Path>) -> Result<(Vec<InteractionRecord>, usize)> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json(path),
        Some("csv") => load_csv(path),
        other => Err(AppError::Ingestion {
            message: format!(
                "Unsupported interaction file extension {:?} for {}",
                other,
                path.display()
            ),
        }),
    }
}

/// Load records from a CSV file with a header row
pub fn load_csv(path: &Path) -> Result<(Vec<InteractionRecord>, usize)> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| AppError::Ingestion {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for row in reader.deserialize::<RawRecord>() {
        match row {
            Ok(raw) => records.push(raw.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Dropped unparseable CSV row");
                dropped += 1;
            }
        }
    }

    Ok((records, dropped))
}

/// Load records from a JSON array of objects
pub fn load_json(path: &Path) -> Result<(Vec<InteractionRecord>, usize)> {
    let file = File::open(path).map_err(|e| AppError::Ingestion {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;

    let raw: Vec<RawRecord> =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| AppError::Ingestion {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;

    Ok((raw.into_iter().map(Into::into).collect(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_csv() {
        let path = write_temp(
            "pharmgraph_ingest_test.csv",
            "drug1,drug2,condition\nWarfarin,Aspirin,Increases bleeding risk\nWarfarin,Ibuprofen,Moderate interaction\n",
        );
        let (records, dropped) = load_csv(&path).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].drug_a, "Warfarin");
        assert_eq!(records[0].description, "Increases bleeding risk");
    }

    #[test]
    fn test_load_csv_alternate_headers() {
        let path = write_temp(
            "pharmgraph_ingest_alt.csv",
            "drug_1,drug_2,description\nMetformin,Alcohol,Lactic acidosis risk\n",
        );
        let (records, dropped) = load_csv(&path).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(records[0].drug_b, "Alcohol");
    }

    #[test]
    fn test_load_json() {
        let path = write_temp(
            "pharmgraph_ingest_test.json",
            r#"[{"drug1": "Warfarin", "drug2": "Aspirin", "condition": "Increases bleeding risk"}]"#,
        );
        let (records, dropped) = load_json(&path).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].drug_b, "Aspirin");
    }

    #[test]
    fn test_missing_fields_flow_to_store_skip() {
        let path = write_temp(
            "pharmgraph_ingest_missing.json",
            r#"[{"drug1": "Warfarin"}, {"drug1": "A", "drug2": "B", "condition": "ok"}]"#,
        );
        let (records, _) = load_json(&path).unwrap();
        let (store, skipped) = crate::store::InteractionStore::from_records(records);
        assert_eq!(skipped, 1);
        assert_eq!(store.stats().interaction_count, 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_records("interactions.parquet").unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }
}
