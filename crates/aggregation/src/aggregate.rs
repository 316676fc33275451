//! Aggregation stage: corpus-wide NormLIME weight table.
//!
//! Reads every precomputed per-image record, normalizes each image's
//! local weights within each class (squared weight over the class's L1
//! norm, a convex combination comparable across images), groups the
//! contributions by the superpixel's cluster id, and averages them per
//! (class, cluster) over the whole corpus.
//!
//! Corrupt record files are skipped with a warning; the stage assumes a
//! static snapshot of records and never re-scans mid-run.

use crate::records::ImageRecord;
use anyhow::Context;
use normlime_common::{ClassLabel, ClusterId, ExplainError, GlobalWeights};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Streaming mean over contribution values, so raw contributions are
/// never retained.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Aggregate all record files into a global weight table and persist it
/// under a uniquely suffixed name in `output_dir`.
///
/// Returns the path of the written table.
///
/// # Errors
/// Fails only on output I/O; unreadable input records are skipped.
pub fn compute_normlime_weights(
    record_paths: &[PathBuf],
    output_dir: &Path,
    num_samples: usize,
) -> anyhow::Result<PathBuf> {
    let mut accumulators: BTreeMap<ClassLabel, BTreeMap<ClusterId, Accumulator>> = BTreeMap::new();

    for path in record_paths {
        let record = match ImageRecord::load(path) {
            Ok(record) => record,
            Err(err) => {
                warn!("skipping precomputed record: {err}");
                continue;
            }
        };
        info!("loaded precomputed record {}", path.display());

        for (label, weights) in &record.lime_weights {
            let l1: f64 = weights.iter().map(|(_, w)| w.abs()).sum();
            if l1 == 0.0 {
                debug!(
                    "class {label} has all-zero weights in {}, skipping its contribution",
                    path.display()
                );
                continue;
            }

            let by_cluster = accumulators.entry(*label).or_default();
            for &(segment, weight) in weights {
                let Some(cluster) = record.cluster.get(segment) else {
                    warn!(
                        "superpixel {segment} has no cluster assignment in {}, skipping",
                        path.display()
                    );
                    continue;
                };
                by_cluster
                    .entry(cluster)
                    .or_default()
                    .push(weight * weight / l1);
            }
        }
    }

    let global: GlobalWeights = accumulators
        .iter()
        .map(|(label, by_cluster)| {
            let means = by_cluster
                .iter()
                .map(|(cluster, acc)| (*cluster, acc.mean()))
                .collect();
            (*label, means)
        })
        .collect();

    if let Some((distinct, expected)) = label_coverage_shortfall(&global) {
        warn!(
            "there are at least {expected} classes but NormLIME has results for only {distinct}; \
             aggregate weights may be unstable, computing more test samples improves them"
        );
    }

    let output_path = unique_output_path(output_dir, num_samples, record_paths.len());
    let json =
        serde_json::to_string(&global).map_err(|e| ExplainError::Serialize(e.to_string()))?;
    fs::write(&output_path, json)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    info!("saved NormLIME weights to {}", output_path.display());

    Ok(output_path)
}

/// The corpus under-covers the label space when fewer distinct labels
/// were observed than `max label + 1`. Returns `(distinct, expected)`
/// when short. Assumes labels are small dense integers starting near 0,
/// as the classifier's label space is.
#[must_use]
pub fn label_coverage_shortfall(global: &GlobalWeights) -> Option<(usize, usize)> {
    let max = *global.keys().next_back()?;
    let distinct = global.len();
    (distinct < max + 1).then_some((distinct, max + 1))
}

/// First unused `normlime_weights_s{num_samples}_samples_{count}-{n}.json`
/// path, scanning suffixes from 0 so prior results are never overwritten.
fn unique_output_path(output_dir: &Path, num_samples: usize, record_count: usize) -> PathBuf {
    let mut n = 0;
    loop {
        let candidate = output_dir.join(format!(
            "normlime_weights_s{num_samples}_samples_{record_count}-{n}.json"
        ));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
