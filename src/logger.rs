//! Structured logging for the tunnel core.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a log
//! file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON). Hostnames and detections stay on the
//! device: the logger never writes anywhere but the local console and file.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds the tunnel core can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in JSON
/// output so consumers can filter by type without inspecting structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// A DNS query name was extracted from a UDP packet.
    Dns { domain: &'a str },

    /// A TLS SNI hostname was extracted from a TCP packet.
    TlsSni { sni: &'a str },

    /// An extracted hostname matched the tracker table.
    Detection { domain: &'a str, service: &'a str },

    /// The tunnel lifecycle moved between states.
    StateChange { from: &'a str, to: &'a str },

    /// Applying network settings failed; `retry_count` is the counter after
    /// this failure.
    ConfigureFailed { error: &'a str, retry_count: u32 },

    /// The health check found the read loop dead and started a new one.
    ReadLoopRestarted { reason: &'a str },

    /// A control request was received from the host application.
    ControlRequest { request: &'a str, answered: bool },

    /// The control server failed to accept or serve a connection.
    ControlError { error: &'a str },

    /// The shared store could not be read or written.
    StoreError { message: &'a str },

    /// Session summary emitted on shutdown.
    SessionSummary {
        duration_secs:       u64,
        packets_total:       u64,
        hostnames_extracted: u64,
        detections_recorded: u64,
        read_loop_restarts:  u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every
/// component that emits events. The internal `Mutex` serialises file writes
/// so lines from the read loop and the health check never interleave.
pub struct Logger {
    json:  bool,
    quiet: bool,
    file:  Option<Mutex<BufWriter<std::fs::File>>>,
}

pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, quiet: false, file })
    }

    /// A logger that discards everything. Used by tests and embedders that
    /// only want the detection events.
    pub fn silent() -> SharedLogger {
        Arc::new(Self { json: false, quiet: true, file: None })
    }

    /// Logs a single [`Event`] to stdout and, if configured, the log file.
    pub fn log(&self, event: &Event) {
        if self.quiet {
            return;
        }
        let line = self.format(event);

        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats an event as a full output line, timestamp included.
    fn format(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, plain_text(event))
        }
    }
}

/// Formats an [`Event`] as a human-readable string (no timestamp).
fn plain_text(event: &Event) -> String {
    match event {
        Event::Info { message } =>
            format!("[INFO] {}", message),

        Event::Dns { domain } =>
            format!("[DNS] query {}", domain),

        Event::TlsSni { sni } =>
            format!("[TLS SNI] {}", sni),

        Event::Detection { domain, service } =>
            format!("[DETECTION] {} ({})", domain, service),

        Event::StateChange { from, to } =>
            format!("[STATE] {} -> {}", from, to),

        Event::ConfigureFailed { error, retry_count } =>
            format!("[CONFIG] failed ({}), retry {}", error, retry_count),

        Event::ReadLoopRestarted { reason } =>
            format!("[HEALTH] read loop restarted: {}", reason),

        Event::ControlRequest { request, answered } =>
            format!("[CONTROL] {:?} answered={}", request, answered),

        Event::ControlError { error } =>
            format!("[CONTROL] error: {}", error),

        Event::StoreError { message } =>
            format!("[STORE] {}", message),

        Event::SessionSummary {
            duration_secs, packets_total, hostnames_extracted, detections_recorded, read_loop_restarts
        } => format!(
            "[SUMMARY] duration={}s packets={} hostnames={} detections={} restarts={}",
            duration_secs, packets_total, hostnames_extracted, detections_recorded, read_loop_restarts
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_has_event_tag_and_timestamp() {
        let logger = Logger::new(true, None).unwrap();
        let line = logger.format(&Event::Detection { domain: "api.life360.com", service: "Life360" });
        let val: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(val["event"], "detection");
        assert_eq!(val["service"], "Life360");
        assert!(val["timestamp"].is_string());
    }

    #[test]
    fn test_plain_text_state_change() {
        let text = plain_text(&Event::StateChange { from: "starting", to: "running" });
        assert_eq!(text, "[STATE] starting -> running");
    }

    #[test]
    fn test_file_output_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel.log");
        let path_str = path.to_str().unwrap();
        {
            let logger = Logger::new(false, Some(path_str)).unwrap();
            logger.log(&Event::Info { message: "first" });
        }
        {
            let logger = Logger::new(false, Some(path_str)).unwrap();
            logger.log(&Event::Info { message: "second" });
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("[INFO] second"));
    }
}
