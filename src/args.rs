use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;

use crate::error::{KoorError, Result};

/// Payload source for commands that upload a body: exactly one of
/// `--file <path>` or `--data <json>`.
#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = false)]
pub struct BodyArgs {
    /// Read the JSON payload from a file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Inline JSON payload
    #[arg(long, value_name = "JSON", allow_hyphen_values = true)]
    pub data: Option<String>,
}

impl BodyArgs {
    pub fn read(&self) -> Result<Vec<u8>> {
        match (&self.file, &self.data) {
            (Some(path), _) => read_file(path),
            (None, Some(data)) => Ok(data.clone().into_bytes()),
            (None, None) => Err(KoorError::usage("one of --file or --data is required")),
        }
    }
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        KoorError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })
}

/// Splits `project/name` on the first `/`. Without a `/` the name is empty.
pub fn split_resource(value: &str) -> (&str, &str) {
    value.split_once('/').unwrap_or((value, ""))
}

/// Like [`split_resource`] but both halves must be present.
pub fn require_resource(value: &str) -> Result<(&str, &str)> {
    match split_resource(value) {
        (project, name) if !project.is_empty() && !name.is_empty() => Ok((project, name)),
        _ => Err(KoorError::usage(format!(
            "expected <project>/<name>, got {value:?}"
        ))),
    }
}

/// Splits a comma-separated flag value, dropping blanks.
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn require_json_array(body: &[u8], what: &str) -> Result<Vec<Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(KoorError::usage(format!("{what} must be a JSON array"))),
        Err(e) => Err(KoorError::usage(format!("{what} is not valid JSON: {e}"))),
    }
}

pub fn require_json_object(body: &[u8], what: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(KoorError::usage(format!("{what} must be a JSON object"))),
        Err(e) => Err(KoorError::usage(format!("{what} is not valid JSON: {e}"))),
    }
}
