use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PRETTY_FLAG: &str = "--pretty";

/// Removes every `--pretty` token from argv and reports whether one was seen.
pub fn take_pretty_flag(args: &mut Vec<String>) -> bool {
    let before = args.len();
    args.retain(|a| a != PRETTY_FLAG);
    args.len() != before
}

/// Pretty-prints with a two-space indent and trailing newline.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Reads an explicit JSON `null` as the field's default. Servers often send
/// `null` for an empty list.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Returns the bytes to print for a response body. Pretty mode reindents
/// bodies that parse as JSON and leaves everything else untouched.
pub fn render_body(body: &[u8], pretty: bool) -> Vec<u8> {
    if !pretty {
        return body.to_vec();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => to_pretty_json(&value)
            .map(String::into_bytes)
            .unwrap_or_else(|_| body.to_vec()),
        Err(_) => body.to_vec(),
    }
}

pub fn print_body(body: &[u8], pretty: bool) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(&render_body(body, pretty))?;
    stdout.flush()
}

/// Writes through a sibling temp file and renames it into place, so readers
/// never observe a partial file.
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    std::fs::rename(&temp_path, path)
}
