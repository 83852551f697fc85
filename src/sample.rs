//! Deterministic row sampling.
//!
//! Picks a reproducible subset of an [`InspectionTable`] without
//! replacement. The draw is a seeded partial permutation of row positions:
//! the same table, fraction, and seed always yield the same rows in the
//! same (permutation) order.
//!
//! ChaCha8 is used because its output stream is fixed by the algorithm,
//! not by the `rand` release or the platform, so a seed stays meaningful
//! across builds.

use anyhow::{bail, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Config, SamplingConfig};
use crate::ingest::load_inspection_table;
use crate::models::InspectionTable;
use crate::progress::{format_number, IngestProgressReporter};

/// Number of rows a fraction selects from `row_count` rows.
///
/// `round(fraction × row_count)`, rounding halves to even.
pub fn sample_size(fraction: f64, row_count: usize) -> usize {
    let n = (fraction * row_count as f64).round_ties_even();
    (n.max(0.0) as usize).min(row_count)
}

/// Sample `fraction` of the rows using `seed`.
///
/// # Errors
///
/// Returns an error if `fraction` is not in `(0, 1]`.
pub fn sample_fraction(table: &InspectionTable, fraction: f64, seed: u64) -> Result<InspectionTable> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        bail!("sample fraction must be in (0.0, 1.0], got {}", fraction);
    }
    Ok(sample_n(table, sample_size(fraction, table.len()), seed))
}

/// Sample exactly `n` rows (clamped to the table length) using `seed`.
pub fn sample_n(table: &InspectionTable, n: usize, seed: u64) -> InspectionTable {
    let n = n.min(table.len());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let positions = rand::seq::index::sample(&mut rng, table.len(), n);
    table.subset(positions.into_iter())
}

/// Apply the configured `[sampling]` section.
pub fn sample_with_config(table: &InspectionTable, cfg: &SamplingConfig) -> Result<InspectionTable> {
    let sampled = sample_fraction(table, cfg.fraction, cfg.seed)?;
    tracing::info!(
        rows = sampled.len(),
        of = table.len(),
        fraction = cfg.fraction,
        seed = cfg.seed,
        "sampled inspection table"
    );
    Ok(sampled)
}

/// `sewerq sample`: ingest, sample, and print the chosen rows as JSON lines.
///
/// With `n` set, exactly that many rows are drawn (using the configured
/// seed) instead of the configured fraction.
pub async fn run_sample(
    config: &Config,
    progress: &dyn IngestProgressReporter,
    n: Option<usize>,
) -> Result<()> {
    let (table, _report) = load_inspection_table(&config.data, progress).await?;
    let sampled = match n {
        Some(n) => sample_n(&table, n, config.sampling.seed),
        None => sample_with_config(&table, &config.sampling)?,
    };

    for row in sampled.rows() {
        println!("{}", serde_json::Value::Object(row.record.clone()));
    }
    eprintln!(
        "Sampled {} of {} rows (seed {}).",
        format_number(sampled.len() as u64),
        format_number(table.len() as u64),
        config.sampling.seed
    );
    Ok(())
}
