//! Persisted per-image record I/O and file naming.
//!
//! One JSON file per image holds that image's local LIME weights for its
//! top predicted classes together with the superpixel-to-cluster
//! assignment. Records are immutable once written; their existence on
//! disk is the resumability marker for the precompute stage.

use normlime_common::{ClusterAssignment, ExplainError, LocalWeights, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Precomputed explanation record for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Local LIME weights, restricted to the image's top predicted classes.
    pub lime_weights: LocalWeights,
    /// Cluster id per superpixel of the image's segmentation.
    pub cluster: ClusterAssignment,
}

impl ImageRecord {
    /// Persist the record. Records are never overwritten; an existing
    /// file at `path` is an error.
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ExplainError::RecordExists(path.to_path_buf()));
        }
        let json =
            serde_json::to_string(self).map_err(|e| ExplainError::Serialize(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a record, mapping any read or parse failure to
    /// [`ExplainError::RecordLoad`] so the aggregation stage can skip
    /// corrupt files and continue.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ExplainError::RecordLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| ExplainError::RecordLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Record filename for one image, keyed by its identity stem and the
/// explainer's sample count.
#[must_use]
pub fn record_path(dir: &Path, num_samples: usize, stem: &str) -> PathBuf {
    dir.join(format!("lime_weights_s{num_samples}_{stem}.json"))
}

/// All record files in `dir` for the given sample count, sorted by path
/// for deterministic aggregation input order.
pub fn find_record_files(dir: &Path, num_samples: usize) -> Result<Vec<PathBuf>> {
    let prefix = format!("lime_weights_s{num_samples}");
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".json") {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}
