//! Append-only audit log of routing decisions.
//!
//! One NDJSON record per resolution/dispatch attempt, written by a single
//! background thread fed through a bounded channel so concurrent callers
//! never interleave partial entries. Recording is fire-and-forget: a full
//! queue blocks briefly and then diverts the entry to stderr (counted in
//! metrics), and write failures never propagate to the caller.

use crate::metrics;
use crate::resolver::{Alternative, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Final disposition of one routed request
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed { summary: String },
    HandlerFailed { error: String },
    Timeout { timeout_ms: u64 },
    Cancelled,
    Unresolved,
    NoMatch,
    MaxDepthExceeded,
}

impl DispatchOutcome {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed { .. } => "completed",
            DispatchOutcome::HandlerFailed { .. } => "handler_failed",
            DispatchOutcome::Timeout { .. } => "timeout",
            DispatchOutcome::Cancelled => "cancelled",
            DispatchOutcome::Unresolved => "unresolved",
            DispatchOutcome::NoMatch => "no_match",
            DispatchOutcome::MaxDepthExceeded => "max_depth_exceeded",
        }
    }
}

/// One routing decision, as persisted
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the raw request text; the text itself is never retained
    pub request_digest: String,
    pub path: Vec<String>,
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub outcome: DispatchOutcome,
}

impl AuditEntry {
    pub fn new(request_digest: String, resolution: &Resolution, outcome: DispatchOutcome) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            request_digest,
            path: resolution.path.clone(),
            confidence: resolution.confidence,
            alternatives: resolution.alternatives.clone(),
            outcome,
        }
    }

    /// Entry for a request that never produced a resolution
    pub fn unresolved(
        request_digest: String,
        partial_path: &[String],
        outcome: DispatchOutcome,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            request_digest,
            path: partial_path.to_vec(),
            confidence: 0.0,
            alternatives: Vec::new(),
            outcome,
        }
    }
}

/// Sink tuning; all fields have workable defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Log file path; defaults to ~/.caproute/audit.ndjson
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flush after this many buffered entries
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    /// Flush at least this often even when idle
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How long `record` may block on a full queue before diverting
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_flush_every() -> usize {
    32
}
fn default_flush_interval_ms() -> u64 {
    1_000
}
fn default_enqueue_timeout_ms() -> u64 {
    50
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            queue_capacity: default_queue_capacity(),
            flush_every: default_flush_every(),
            flush_interval_ms: default_flush_interval_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

/// Append-only NDJSON sink with a single writer thread
pub struct AuditLog {
    tx: Option<SyncSender<AuditEntry>>,
    writer: Option<JoinHandle<()>>,
    enqueue_timeout: Duration,
}

impl AuditLog {
    /// Open (appending) the log file and start the writer thread
    pub fn open(config: &AuditConfig) -> anyhow::Result<Self> {
        let path = match &config.path {
            Some(p) => p.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?
                .join(".caproute")
                .join("audit.ndjson"),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let flush_every = config.flush_every;
        let flush_interval = Duration::from_millis(config.flush_interval_ms);
        let writer = thread::spawn(move || writer_loop(rx, file, flush_every, flush_interval));

        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
        })
    }

    /// Record an entry. Fire-and-forget: on a persistently full queue the
    /// entry goes to stderr instead, so the user-facing operation is never
    /// blocked indefinitely by the log.
    pub fn record(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        let deadline = Instant::now() + self.enqueue_timeout;
        let mut entry = entry;
        loop {
            match tx.try_send(entry) {
                Ok(()) => {
                    metrics::record_audit("written");
                    return;
                }
                Err(TrySendError::Full(e)) => {
                    if Instant::now() >= deadline {
                        divert(&e);
                        return;
                    }
                    entry = e;
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TrySendError::Disconnected(e)) => {
                    divert(&e);
                    return;
                }
            }
        }
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        // Close the channel, then let the writer drain and flush
        drop(self.tx.take());
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

fn divert(entry: &AuditEntry) {
    metrics::record_audit("diverted");
    match serde_json::to_string(entry) {
        Ok(line) => eprintln!("audit(diverted): {}", line),
        Err(e) => eprintln!("audit(diverted): unserializable entry: {}", e),
    }
}

fn writer_loop(
    rx: mpsc::Receiver<AuditEntry>,
    file: File,
    flush_every: usize,
    flush_interval: Duration,
) {
    let mut out = BufWriter::new(file);
    let mut pending = 0usize;
    loop {
        match rx.recv_timeout(flush_interval) {
            Ok(entry) => {
                match serde_json::to_string(&entry) {
                    Ok(line) => {
                        if let Err(e) = writeln!(out, "{}", line) {
                            metrics::record_audit("write_failed");
                            eprintln!("audit: write failed: {}", e);
                        } else {
                            pending += 1;
                        }
                    }
                    Err(e) => {
                        metrics::record_audit("write_failed");
                        eprintln!("audit: serialization failed: {}", e);
                    }
                }
                if pending >= flush_every {
                    let _ = out.flush();
                    pending = 0;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if pending > 0 {
                    let _ = out.flush();
                    pending = 0;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = out.flush();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolution;

    fn resolution() -> Resolution {
        Resolution {
            path: vec!["root".into(), "devops".into(), "terraform-handler".into()],
            confidence: 1.0,
            alternatives: Vec::new(),
            terminal_handler_ref: Some("doc:terraform".into()),
            fallback_steps: 0,
        }
    }

    fn config_for(path: &std::path::Path) -> AuditConfig {
        AuditConfig {
            path: Some(path.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_entries_written_as_ndjson() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.ndjson");
        {
            let log = AuditLog::open(&config_for(&path)).unwrap();
            log.record(AuditEntry::new(
                "abc123".into(),
                &resolution(),
                DispatchOutcome::Completed {
                    summary: "served doc".into(),
                },
            ));
            log.record(AuditEntry::new(
                "def456".into(),
                &resolution(),
                DispatchOutcome::Timeout { timeout_ms: 50 },
            ));
            // Drop joins the writer and flushes
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.request_digest, "abc123");
        assert_eq!(
            first.path,
            vec!["root", "devops", "terraform-handler"]
        );
        let second: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.outcome, DispatchOutcome::Timeout { timeout_ms: 50 });
    }

    #[test]
    fn test_append_across_reopens() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.ndjson");
        for digest in ["one", "two"] {
            let log = AuditLog::open(&config_for(&path)).unwrap();
            log.record(AuditEntry::unresolved(
                digest.into(),
                &["root".to_string()],
                DispatchOutcome::NoMatch,
            ));
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(DispatchOutcome::Cancelled.label(), "cancelled");
        assert_eq!(
            DispatchOutcome::Completed {
                summary: String::new()
            }
            .label(),
            "completed"
        );
        assert_eq!(DispatchOutcome::NoMatch.label(), "no_match");
    }
}
