use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use resizer_core::{PlatformTarget, TelemetryEvent, TelemetryEventType, TelemetrySink};
use serde::Serialize;
use tracing::warn;

pub const ENV_SINK: &str = "RESIZER_TELEMETRY_SINK";
pub const ENV_FILE: &str = "RESIZER_TELEMETRY_FILE";
pub const ENV_ENDPOINT: &str = "RESIZER_TELEMETRY_ENDPOINT";

pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    sink_from_lookup(|key| std::env::var(key).ok())
}

/// `stdout`, `file` or `http`; anything else (or a missing target) disables telemetry.
pub fn sink_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Box<dyn TelemetrySink>> {
    let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mode = non_blank(ENV_SINK)?;
    match mode.trim().to_ascii_lowercase().as_str() {
        "stdout" => Some(Box::new(StdoutSink)),
        "file" => Some(Box::new(FileSink::new(PathBuf::from(non_blank(ENV_FILE)?)))),
        "http" => Some(Box::new(HttpSink::new(non_blank(ENV_ENDPOINT)?))),
        other => {
            warn!(sink = other, "unknown telemetry sink, telemetry disabled");
            None
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryEnvelope<'a> {
    event_type: &'a TelemetryEventType,
    platform: PlatformTarget,
    timestamp_ms: u64,
    duration_ms: Option<u64>,
    detail: Option<&'a str>,
}

impl<'a> TelemetryEnvelope<'a> {
    fn new(event: &'a TelemetryEvent) -> Self {
        Self {
            event_type: &event.event_type,
            platform: event.platform,
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            duration_ms: event.duration_ms,
            detail: event.detail.as_deref(),
        }
    }
}

fn json_line(event: &TelemetryEvent) -> Option<String> {
    serde_json::to_string(&TelemetryEnvelope::new(event)).ok()
}

pub struct StdoutSink;

impl TelemetrySink for StdoutSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Some(line) = json_line(&event) {
            println!("{}", line);
        }
    }
}

/// Appends one JSON object per line.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating telemetry log parent directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening telemetry file {}", self.path.display()))?;
        writeln!(file, "{}", line).context("writing telemetry line")?;
        Ok(())
    }
}

impl TelemetrySink for FileSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Some(line) = json_line(&event) {
            if let Err(err) = self.write_line(&line) {
                warn!(error = %err, "dropping telemetry event");
            }
        }
    }
}

pub struct HttpSink {
    endpoint: String,
    client: Client,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { endpoint, client }
    }
}

impl TelemetrySink for HttpSink {
    fn emit(&self, event: TelemetryEvent) {
        let payload = TelemetryEnvelope::new(&event);
        if let Err(err) = self.client.post(&self.endpoint).json(&payload).send() {
            warn!(endpoint = %self.endpoint, error = %err, "telemetry post failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn event(event_type: TelemetryEventType, detail: &str) -> TelemetryEvent {
        TelemetryEvent {
            event_type,
            platform: PlatformTarget::Tauri,
            duration_ms: Some(12),
            detail: Some(detail.to_string()),
        }
    }

    #[test]
    fn lookup_selects_sink_by_mode() {
        let stdout = HashMap::from([(ENV_SINK, "STDOUT")]);
        assert!(sink_from_lookup(|k| stdout.get(k).map(|v| v.to_string())).is_some());

        let file_without_path = HashMap::from([(ENV_SINK, "file")]);
        assert!(sink_from_lookup(|k| file_without_path.get(k).map(|v| v.to_string())).is_none());

        let unknown = HashMap::from([(ENV_SINK, "kafka")]);
        assert!(sink_from_lookup(|k| unknown.get(k).map(|v| v.to_string())).is_none());

        assert!(sink_from_lookup(|_| None).is_none());
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("telemetry.jsonl");
        let sink = FileSink::new(path.clone());
        sink.emit(event(TelemetryEventType::ResizeStart, "uri=a.png"));
        sink.emit(event(TelemetryEventType::ResizeSuccess, "output=10x10"));

        let text = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["eventType"], "ResizeStart");
        assert_eq!(lines[0]["platform"], "tauri");
        assert_eq!(lines[1]["detail"], "output=10x10");
        assert_eq!(lines[1]["durationMs"], 12);
        assert!(lines[1]["timestampMs"].as_u64().is_some());
    }
}
