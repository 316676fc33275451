//! Cluster assignment for NormLIME superpixels
//!
//! Maps each superpixel of an image to a visual-appearance cluster id
//! using a pretrained clustering model (k-means centers). The feature
//! vector for a superpixel concatenates the per-pixel appearance feature
//! at the region's centroid with the mean-pooled feature over the whole
//! region, L2-normalized per row.
//!
//! The model file may carry precomputed squared center norms (its own
//! fast predict path). When present we use them directly; otherwise we
//! fall back to norms computed from the stored centers. Both paths score
//! rows identically, so assignments are the same either way.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use normlime_common::{ClusterId, ExplainError, Result, SegmentMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Serialized clustering model: one center per row, with optional
/// precomputed squared center norms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterModel {
    pub centers: Array2<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_norms: Option<Vec<f32>>,
}

/// How the squared center norms were obtained. Probed once at load
/// time, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictPath {
    /// Norms shipped with the model (the model's own predict capability).
    Direct,
    /// Norms recomputed from the stored centers (nearest-centroid fallback).
    NearestCentroid,
}

/// Assigns superpixel feature rows to the nearest cluster center.
///
/// Loaded once per run; read-only afterwards, safe to share.
#[derive(Debug)]
pub struct ClusterAssigner {
    centers: Array2<f32>,
    norms: Vec<f32>,
    path: PredictPath,
}

impl ClusterAssigner {
    /// Deserialize the clustering model from a JSON file.
    ///
    /// # Errors
    /// Returns [`ExplainError::ModelLoad`] if the file is missing,
    /// unreadable, or not a valid serialized model.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ExplainError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let model: ClusterModel =
            serde_json::from_str(&contents).map_err(|e| ExplainError::ModelLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_model(model))
    }

    /// Build an assigner from an in-memory model, selecting the predict
    /// path by probing the model's capabilities once.
    #[must_use]
    pub fn from_model(model: ClusterModel) -> Self {
        let ClusterModel {
            centers,
            center_norms,
        } = model;
        match center_norms {
            Some(norms) if norms.len() == centers.nrows() => {
                debug!("clustering model provides center norms, using direct predict");
                Self {
                    centers,
                    norms,
                    path: PredictPath::Direct,
                }
            }
            _ => Self::from_centers(centers),
        }
    }

    /// Build an assigner from bare cluster centers (nearest-centroid
    /// fallback path).
    #[must_use]
    pub fn from_centers(centers: Array2<f32>) -> Self {
        debug!(
            "clustering model exposes no predict capability, \
             falling back to nearest-centroid over {} centers",
            centers.nrows()
        );
        let norms = centers
            .axis_iter(Axis(0))
            .map(|c| c.dot(&c))
            .collect::<Vec<f32>>();
        Self {
            centers,
            norms,
            path: PredictPath::NearestCentroid,
        }
    }

    /// Number of clusters in the model.
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.centers.nrows()
    }

    /// Assign each feature row to its nearest cluster center (Euclidean).
    ///
    /// Rows must have the model's feature dimension. No side effects;
    /// ties resolve to the lowest cluster id.
    #[must_use]
    pub fn assign(&self, features: ArrayView2<'_, f32>) -> Vec<ClusterId> {
        assert_eq!(
            features.ncols(),
            self.centers.ncols(),
            "feature dimension does not match clustering model"
        );
        features
            .axis_iter(Axis(0))
            .map(|row| self.nearest_center(row))
            .collect()
    }

    /// Argmin over `|c|^2 - 2 x.c`, which orders centers identically to
    /// the Euclidean distance (the `|x|^2` term is constant per row).
    fn nearest_center(&self, row: ArrayView1<'_, f32>) -> ClusterId {
        let mut best = 0;
        let mut best_score = f32::INFINITY;
        for (k, center) in self.centers.axis_iter(Axis(0)).enumerate() {
            let score = self.norms[k] - 2.0 * row.dot(&center);
            if score < best_score {
                best_score = score;
                best = k;
            }
        }
        best
    }

    /// Which predict path was selected when the model was loaded.
    #[must_use]
    pub fn predict_path(&self) -> PredictPath {
        self.path
    }
}

/// Clustering feature matrix for one image: one row per superpixel, in
/// ascending superpixel-id order.
#[derive(Debug, Clone)]
pub struct ClusterFeatures {
    /// Distinct superpixel ids, ascending; `features` row `i` belongs to
    /// `segments[i]`.
    pub segments: Vec<u32>,
    pub features: Array2<f32>,
}

/// Build the clustering feature matrix from a per-pixel feature map and
/// a superpixel segmentation.
///
/// Each row concatenates the feature vector at the superpixel's centroid
/// pixel (centroid rounded half-up) with the mean-pooled feature over
/// the superpixel, then rows are L2-normalized.
#[must_use]
pub fn build_cluster_features(feature_map: &Array3<f32>, segments: &SegmentMap) -> ClusterFeatures {
    let (height, width, depth) = feature_map.dim();
    debug_assert_eq!(segments.dim(), (height, width));

    struct Region {
        row_sum: f64,
        col_sum: f64,
        feature_sum: Vec<f64>,
        count: usize,
    }

    let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
    for ((r, c), &segment) in segments.indexed_iter() {
        let region = regions.entry(segment).or_insert_with(|| Region {
            row_sum: 0.0,
            col_sum: 0.0,
            feature_sum: vec![0.0; depth],
            count: 0,
        });
        region.row_sum += r as f64;
        region.col_sum += c as f64;
        region.count += 1;
        for (d, sum) in region.feature_sum.iter_mut().enumerate() {
            *sum += f64::from(feature_map[[r, c, d]]);
        }
    }

    let ids: Vec<u32> = regions.keys().copied().collect();
    let mut features = Array2::zeros((regions.len(), 2 * depth));
    for (i, region) in regions.values().enumerate() {
        let n = region.count as f64;
        let centroid_r = ((region.row_sum / n + 0.5) as usize).min(height - 1);
        let centroid_c = ((region.col_sum / n + 0.5) as usize).min(width - 1);
        for d in 0..depth {
            features[[i, d]] = feature_map[[centroid_r, centroid_c, d]];
            features[[i, depth + d]] = (region.feature_sum[d] / n) as f32;
        }
    }

    l2_normalize_rows(&mut features);
    ClusterFeatures {
        segments: ids,
        features,
    }
}

/// Scale each row to unit L2 norm; all-zero rows are left untouched.
pub fn l2_normalize_rows(matrix: &mut Array2<f32>) {
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
}
