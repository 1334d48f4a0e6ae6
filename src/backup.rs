//! Client-side snapshot and replay of server state and rules.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::read_file;
use crate::client::KoorClient;
use crate::error::{KoorError, Result};
use crate::format::{null_as_default, to_pretty_json, write_atomic};
use crate::request::Request;

pub const RULE_SOURCES: &str = "local,learned,external,user-rules";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rules: Vec<Value>,
}

#[derive(Deserialize)]
struct StateItem {
    #[serde(default)]
    key: String,
}

#[derive(Deserialize)]
struct ImportResponse {
    #[serde(default)]
    imported: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub path: PathBuf,
    pub state_keys: usize,
    pub rules: usize,
}

impl BackupSummary {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("backup written to {}", self.path.display()),
            format!("  state keys: {}", self.state_keys),
            format!("  rules: {}", self.rules),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub state_total: usize,
    pub state_restored: usize,
    pub rules_total: usize,
    pub rules_imported: u64,
}

impl RestoreSummary {
    pub fn lines(&self) -> Vec<String> {
        vec![
            "restore complete".to_string(),
            format!(
                "  state keys: {}/{} restored",
                self.state_restored, self.state_total
            ),
            format!(
                "  rules: {} imported ({} in backup)",
                self.rules_imported, self.rules_total
            ),
        ]
    }
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64).with_finish(ProgressFinish::AndClear);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {bar:30} {pos}/{len}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb
}

fn state_path(key: &str) -> String {
    format!("/api/state/{key}")
}

/// Fetches every state key's current document.
fn collect_state(client: &KoorClient) -> Result<BTreeMap<String, Value>> {
    let listing = client.get("/api/state")?;
    let items: Vec<StateItem> = serde_json::from_slice(&listing.body)?;
    let keys: Vec<String> = items
        .into_iter()
        .map(|item| item.key)
        .filter(|key| !key.is_empty())
        .collect();

    let pb = progress_bar(keys.len(), "Backing up state");
    let mut state = BTreeMap::new();
    for key in keys {
        pb.inc(1);
        let resp = match client.get(&state_path(&key)) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("could not backup state key {key}: {e}");
                continue;
            }
        };
        if !resp.is_success() {
            tracing::warn!(
                "could not backup state key {key}: server returned {}",
                resp.status
            );
            continue;
        }
        match serde_json::from_slice::<Value>(&resp.body) {
            Ok(value) => {
                state.insert(key, value);
            }
            Err(e) => tracing::warn!("could not backup state key {key}: {e}"),
        }
    }
    pb.finish_and_clear();
    Ok(state)
}

fn collect_rules(client: &KoorClient) -> Vec<Value> {
    let req = Request::get("/api/rules/export").query("source", RULE_SOURCES);
    let resp = match client.send(&req) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("could not export rules: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Option<Vec<Value>>>(&resp.body) {
        Ok(rules) => rules.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("could not parse exported rules: {e}");
            Vec::new()
        }
    }
}

pub fn build_artifact(client: &KoorClient) -> Result<BackupArtifact> {
    let state = collect_state(client)?;
    let rules = collect_rules(client);
    Ok(BackupArtifact { state, rules })
}

pub fn run_backup(client: &KoorClient, output: &Path) -> Result<BackupSummary> {
    let artifact = build_artifact(client)?;
    let content = to_pretty_json(&artifact)?;
    write_atomic(output, content.as_bytes(), 0o644).map_err(|e| {
        KoorError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", output.display()),
        ))
    })?;
    Ok(BackupSummary {
        path: output.to_path_buf(),
        state_keys: artifact.state.len(),
        rules: artifact.rules.len(),
    })
}

pub fn load_artifact(path: &Path) -> Result<BackupArtifact> {
    let bytes = read_file(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        KoorError::usage(format!("{} is not a valid backup: {e}", path.display()))
    })
}

pub fn restore_artifact(client: &KoorClient, artifact: &BackupArtifact) -> Result<RestoreSummary> {
    let pb = progress_bar(artifact.state.len(), "Restoring state");
    let mut restored = 0;
    for (key, value) in &artifact.state {
        pb.inc(1);
        let req = Request::put(state_path(key)).body(serde_json::to_vec(value)?);
        match client.send(&req) {
            Ok(resp) if resp.is_success() => restored += 1,
            Ok(resp) => tracing::warn!(
                "could not restore state key {key}: server returned {}",
                resp.status
            ),
            Err(e) => tracing::warn!("could not restore state key {key}: {e}"),
        }
    }
    pb.finish_and_clear();

    let mut imported = 0;
    if !artifact.rules.is_empty() {
        let req = Request::post("/api/rules/import").body(serde_json::to_vec(&artifact.rules)?);
        match client.send(&req) {
            Ok(resp) => match serde_json::from_slice::<ImportResponse>(&resp.body) {
                Ok(parsed) => imported = parsed.imported,
                Err(e) => tracing::warn!(
                    "could not read rules import result (status {}): {e}",
                    resp.status
                ),
            },
            Err(e) => tracing::warn!("could not restore rules: {e}"),
        }
    }

    Ok(RestoreSummary {
        state_total: artifact.state.len(),
        state_restored: restored,
        rules_total: artifact.rules.len(),
        rules_imported: imported,
    })
}

pub fn run_restore(client: &KoorClient, input: &Path) -> Result<RestoreSummary> {
    let artifact = load_artifact(input)?;
    restore_artifact(client, &artifact)
}
