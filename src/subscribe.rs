//! `events subscribe` without a streaming transport: announce the upgrade
//! endpoint, then poll recent history and print each event id once.

use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::client::{websocket_url, KoorClient};
use crate::error::Result;
use crate::request::Request;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const HISTORY_WINDOW: &str = "10";
pub const DEFAULT_PATTERN: &str = "*";

#[derive(Deserialize)]
struct EventId {
    id: i64,
}

pub fn subscribe_url(base_url: &str, pattern: &str) -> String {
    websocket_url(base_url, &format!("/api/events/subscribe?pattern={pattern}"))
}

pub fn fallback_notice(base_url: &str, pattern: &str) -> Vec<String> {
    let url = subscribe_url(base_url, pattern);
    vec![
        format!("subscribe endpoint: {url}"),
        format!("  stream with websocat: websocat '{url}'"),
        format!("  stream with wscat:    wscat -c '{url}'"),
        format!(
            "streaming is not built in; polling event history every {}s",
            POLL_INTERVAL.as_secs()
        ),
    ]
}

/// Tracks which event ids have already been printed during this run.
#[derive(Debug, Default)]
pub struct HistoryPoller {
    seen: HashSet<i64>,
}

impl HistoryPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw JSON of events not printed before, in server order.
    /// Elements without an integer `id` are skipped.
    pub fn accept(&mut self, body: &[u8]) -> Result<Vec<String>> {
        let events: Vec<Box<RawValue>> =
            serde_json::from_slice::<Option<_>>(body)?.unwrap_or_default();
        let mut fresh = Vec::new();
        for event in events {
            let id = match serde_json::from_str::<EventId>(event.get()) {
                Ok(parsed) => parsed.id,
                Err(e) => {
                    tracing::debug!("skipping event without id: {e}");
                    continue;
                }
            };
            if self.seen.insert(id) {
                fresh.push(event.get().to_string());
            }
        }
        Ok(fresh)
    }

    pub fn poll(&mut self, client: &KoorClient) -> Result<Vec<String>> {
        let req = Request::get("/api/events/history").query("last", HISTORY_WINDOW);
        let resp = client.send(&req)?;
        self.accept(&resp.body)
    }
}

/// Runs one poll and writes each new event on its own line. A failed poll is
/// logged and leaves the output untouched.
pub fn poll_once<W: Write>(
    poller: &mut HistoryPoller,
    client: &KoorClient,
    out: &mut W,
) -> Result<usize> {
    let events = match poller.poll(client) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("event poll failed: {e}");
            return Ok(0);
        }
    };
    for event in &events {
        writeln!(out, "{event}")?;
    }
    out.flush()?;
    Ok(events.len())
}

/// Polls until the process is interrupted.
pub fn run_fallback<W: Write>(client: &KoorClient, pattern: &str, out: &mut W) -> Result<()> {
    for line in fallback_notice(client.base_url(), pattern) {
        eprintln!("{line}");
    }

    let mut poller = HistoryPoller::new();
    loop {
        poll_once(&mut poller, client, out)?;
        std::thread::sleep(POLL_INTERVAL);
    }
}
