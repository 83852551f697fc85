//! Ingestion progress reporting.
//!
//! Reports observable progress while shards are fetched and parsed, so
//! users can see which shard is being read and how many lines it held.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for ingestion.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// Downloading a shard that is missing from the local cache.
    Fetching { shard: String },
    /// Parsing a local shard; `lines` is the running count of parsed lines.
    Parsing { shard: String, lines: u64 },
    /// Finished a shard; `n` of `total` shards are done.
    Loaded {
        shard: String,
        rows: u64,
        n: u64,
        total: u64,
    },
    /// Shard neither present locally nor retrievable remotely.
    Skipped { shard: String, reason: String },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "load part1.jsonl  12,345 lines".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Fetching { shard } => {
                format!("load {}  fetching...\n", shard)
            }
            IngestProgressEvent::Parsing { shard, lines } => {
                format!("load {}  {} lines\n", shard, format_number(*lines))
            }
            IngestProgressEvent::Loaded {
                shard,
                rows,
                n,
                total,
            } => format!(
                "load {}  done  {} rows  ({} / {} shards)\n",
                shard,
                format_number(*rows),
                n,
                total
            ),
            IngestProgressEvent::Skipped { shard, reason } => {
                format!("load {}  skipped: {}\n", shard, reason)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Fetching { shard } => serde_json::json!({
                "event": "progress",
                "shard": shard,
                "phase": "fetching"
            }),
            IngestProgressEvent::Parsing { shard, lines } => serde_json::json!({
                "event": "progress",
                "shard": shard,
                "phase": "parsing",
                "lines": lines
            }),
            IngestProgressEvent::Loaded {
                shard,
                rows,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "shard": shard,
                "phase": "loaded",
                "rows": rows,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Skipped { shard, reason } => serde_json::json!({
                "event": "progress",
                "shard": shard,
                "phase": "skipped",
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
