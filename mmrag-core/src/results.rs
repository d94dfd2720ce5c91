//! Results file persistence.

use crate::error::{DatasetError, MmragError};
use crate::types::ResultRecord;
use std::path::Path;

/// Write `records` as a pretty-printed JSON array, creating parent directories.
pub fn write_results(path: &Path, records: &[ResultRecord]) -> Result<(), MmragError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), records = records.len(), "Saved results");
    Ok(())
}

/// Read a results file as raw JSON values.
///
/// Records are not forced into [`ResultRecord`] so that a file with partial or
/// hand-edited entries can still be evaluated.
pub fn read_results(path: &Path) -> Result<Vec<serde_json::Value>, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| DatasetError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    match value {
        serde_json::Value::Array(records) => Ok(records),
        other => Err(DatasetError::Parse {
            path: path.to_path_buf(),
            message: format!("expected a JSON array of records, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureRecord;

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/results.json");
        let records = vec![ResultRecord::Failure(FailureRecord {
            qid: Some("q1".into()),
            question: "Q?".into(),
            error: "backend down".into(),
        })];
        write_results(&path, &records).unwrap();

        let values = read_results(&path).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["error"], "backend down");
    }

    #[test]
    fn test_read_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(&path, r#"{"qid": "q1"}"#).unwrap();
        let err = read_results(&path).unwrap_err();
        assert!(err.to_string().contains("an object"));
    }
}
