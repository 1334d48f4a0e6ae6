use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::client::DEFAULT_SERVER;
use crate::error::{KoorError, Result};
use crate::format::{to_pretty_json, write_atomic};

pub const CONFIG_FILE: &str = "settings.json";
pub const SERVER_ENV: &str = "KOOR_SERVER";
pub const TOKEN_ENV: &str = "KOOR_TOKEN";

/// Keys `config set` accepts.
pub const SETTABLE_KEYS: [&str; 2] = ["server", "token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Env,
    File,
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Env => "env",
            Source::File => "file",
            Source::Default => "default",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub server: String,
    pub token: String,
    pub server_source: Source,
}

pub fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

/// Reads the settings file as a raw JSON object. Missing, unreadable or
/// non-object files all yield an empty map.
pub fn load_settings_from(path: &Path) -> Map<String, Value> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(obj)) => obj,
        _ => Map::new(),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn resolve_from_env(env_var: &str) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .as_deref()
        .and_then(non_empty)
        .map(str::to_owned)
}

fn str_field(settings: &Map<String, Value>, key: &str) -> Option<String> {
    settings
        .get(key)?
        .as_str()
        .and_then(non_empty)
        .map(str::to_owned)
}

pub fn resolve_from(path: &Path) -> EffectiveConfig {
    let settings = load_settings_from(path);

    let (server, server_source) = if let Some(s) = resolve_from_env(SERVER_ENV) {
        (s, Source::Env)
    } else if let Some(s) = str_field(&settings, "server") {
        (s, Source::File)
    } else {
        (DEFAULT_SERVER.to_string(), Source::Default)
    };

    let token = resolve_from_env(TOKEN_ENV)
        .or_else(|| str_field(&settings, "token"))
        .unwrap_or_default();

    EffectiveConfig {
        server,
        token,
        server_source,
    }
}

pub fn resolve() -> EffectiveConfig {
    resolve_from(&config_path())
}

/// Read-modify-write of a single key, keeping every other key as it was.
pub fn set_value_at(path: &Path, key: &str, value: &str) -> Result<()> {
    if !SETTABLE_KEYS.contains(&key) {
        return Err(KoorError::usage(format!(
            "unknown config key {key:?} (expected one of: {})",
            SETTABLE_KEYS.join(", ")
        )));
    }
    let mut settings = load_settings_from(path);
    settings.insert(key.to_string(), Value::String(value.to_string()));
    save_settings_to(path, &settings)
}

pub fn save_settings_to(path: &Path, settings: &Map<String, Value>) -> Result<()> {
    let content = to_pretty_json(settings)?;
    write_atomic(path, content.as_bytes(), 0o600)?;
    Ok(())
}

pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}
