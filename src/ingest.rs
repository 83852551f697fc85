//! Ingestion pipeline.
//!
//! Resolves the configured shard set against the local data directory,
//! downloads missing shards from the public bucket, parses every local
//! shard as JSON lines, and assembles one [`InspectionTable`].
//!
//! # Failure Policy
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | Shard missing locally, fetched remotely | loaded |
//! | Shard missing locally and remotely (or no remote configured) | skipped, logged |
//! | Present shard contains a line that is not a JSON object | error, aborts |
//! | Single-file mode and the file is missing | error, aborts |
//!
//! Skipping unavailable shards is the only partial-failure tolerance.

use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::path::Path;

use crate::config::{Config, DataConfig};
use crate::fetch::ShardFetcher;
use crate::models::{InspectionTable, Record};
use crate::progress::{format_number, IngestProgressEvent, IngestProgressReporter};

const PROGRESS_EVERY_LINES: u64 = 10_000;

/// What a load run did, shard by shard.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    pub rows: usize,
    pub columns: usize,
}

/// Load the inspection table described by `data`.
///
/// In single-file mode (`data.file`) exactly that file is parsed. Otherwise
/// each shard name is resolved under `data.dir` in order, downloading it
/// first when it is not cached.
pub async fn load_inspection_table(
    data: &DataConfig,
    progress: &dyn IngestProgressReporter,
) -> Result<(InspectionTable, LoadReport)> {
    let mut report = LoadReport::default();

    if let Some(ref file) = data.file {
        let label = file.display().to_string();
        if !file.exists() {
            bail!("Data file does not exist: {}", label);
        }
        let records = read_jsonl_file(file, &label, progress).await?;
        progress.report(IngestProgressEvent::Loaded {
            shard: label.clone(),
            rows: records.len() as u64,
            n: 1,
            total: 1,
        });
        report.loaded.push(label);
        let table = InspectionTable::from_records(records);
        report.rows = table.len();
        report.columns = table.columns().len();
        return Ok((table, report));
    }

    let names = data.shard_names();
    let total = names.len() as u64;
    let fetcher = match data.remote_base_url {
        Some(ref url) => Some(ShardFetcher::new(url, data.fetch_timeout_secs)?),
        None => None,
    };

    let mut records: Vec<Record> = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let path = data.dir.join(name);

        if !path.exists() {
            let Some(ref fetcher) = fetcher else {
                skip(progress, &mut report, name, "not cached and no remote configured");
                continue;
            };

            progress.report(IngestProgressEvent::Fetching {
                shard: name.clone(),
            });
            match fetcher.fetch_to(name, &path).await {
                Ok(bytes) => {
                    tracing::info!(shard = %name, bytes, "fetched shard");
                    report.fetched.push(name.clone());
                }
                Err(e) => {
                    skip(progress, &mut report, name, &format!("{:#}", e));
                    continue;
                }
            }
        }

        let shard_records = read_jsonl_file(&path, name, progress).await?;
        progress.report(IngestProgressEvent::Loaded {
            shard: name.clone(),
            rows: shard_records.len() as u64,
            n: i as u64 + 1,
            total,
        });
        report.loaded.push(name.clone());
        records.extend(shard_records);
    }

    let table = InspectionTable::from_records(records);
    report.rows = table.len();
    report.columns = table.columns().len();
    tracing::info!(
        rows = report.rows,
        columns = report.columns,
        skipped = report.skipped.len(),
        "inspection table loaded"
    );
    Ok((table, report))
}

fn skip(
    progress: &dyn IngestProgressReporter,
    report: &mut LoadReport,
    name: &str,
    reason: &str,
) {
    tracing::warn!(shard = %name, reason, "skipping unavailable shard");
    progress.report(IngestProgressEvent::Skipped {
        shard: name.to_string(),
        reason: reason.to_string(),
    });
    report.skipped.push(name.to_string());
}

/// Read and parse one local JSON-lines file.
pub async fn read_jsonl_file(
    path: &Path,
    label: &str,
    progress: &dyn IngestProgressReporter,
) -> Result<Vec<Record>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_jsonl(bytes.as_slice(), label, progress)
}

/// Parse newline-delimited JSON objects, one per line, in order.
///
/// Every line must be a JSON object, blank lines included; the first one
/// that is not aborts the parse with its 1-based line number. A final
/// newline does not produce an extra empty line.
pub fn parse_jsonl<R: BufRead>(
    reader: R,
    label: &str,
    progress: &dyn IngestProgressReporter,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut lines = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("{}:{}: read error", label, line_no))?;

        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", label, line_no))?;
        match value {
            serde_json::Value::Object(map) => records.push(map),
            other => bail!(
                "{}:{}: expected a JSON object, found {}",
                label,
                line_no,
                json_type_name(&other)
            ),
        }

        lines += 1;
        if lines % PROGRESS_EVERY_LINES == 0 {
            progress.report(IngestProgressEvent::Parsing {
                shard: label.to_string(),
                lines,
            });
        }
    }

    Ok(records)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// `sewerq load`: ingest and print a summary plus the first rows.
pub async fn run_load(
    config: &Config,
    progress: &dyn IngestProgressReporter,
    head: usize,
) -> Result<()> {
    let (table, report) = load_inspection_table(&config.data, progress).await?;

    println!("load");
    println!("  shards loaded: {}", report.loaded.len());
    println!("  shards fetched: {}", report.fetched.len());
    println!("  shards skipped: {}", report.skipped.len());
    for name in &report.skipped {
        println!("    - {}", name);
    }
    println!("  rows: {}", format_number(report.rows as u64));
    println!("  columns: {}", report.columns);
    for col in table.summary() {
        println!("    {:<32} {:<8} {} non-null", col.name, col.dtype, col.non_null);
    }

    if head > 0 && !table.is_empty() {
        println!();
        for row in table.head(head) {
            println!("{}", serde_json::Value::Object(row.record.clone()));
        }
    }

    println!("ok");
    Ok(())
}
