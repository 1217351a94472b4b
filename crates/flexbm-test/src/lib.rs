//! Integration test infrastructure for FlexBM
//!
//! Provides:
//! - Configuration document builders
//! - Canned programs used across the reconfiguration tests
//! - Command plan builders
//! - Temporary file helpers for file based inputs

pub mod fixtures;
mod plan;

pub use fixtures::*;
pub use plan::PlanBuilder;

use std::io::Write;
use tempfile::NamedTempFile;

/// Writes `contents` to a fresh temporary file.
///
/// The file is removed when the returned handle is dropped.
pub fn write_temp(contents: &str) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Writes a configuration document to a fresh temporary file.
pub fn write_json(document: &serde_json::Value) -> std::io::Result<NamedTempFile> {
    write_temp(&document.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_temp() {
        let file = write_temp("insert cond ingress new_node_6\n").unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, "insert cond ingress new_node_6\n");
    }

    #[test]
    fn test_write_json() {
        let file = write_json(&serde_json::json!({"pipelines": []})).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, r#"{"pipelines":[]}"#);
    }
}
