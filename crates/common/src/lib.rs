//! Common types and collaborator interfaces for NormLIME explanation
//! computation.
//!
//! NormLIME aggregates per-image LIME explanations across a corpus: each
//! image contributes per-superpixel importance weights for its top predicted
//! classes, superpixels are mapped to visual-appearance clusters, and the
//! normalized weights are averaged per (class, cluster) to obtain a global
//! importance table.
//!
//! This crate holds the shared data model (local weights, cluster
//! assignments, global weight tables), the error taxonomy, and the trait
//! interfaces behind which the external collaborators live: the classifier
//! under explanation, the single-image perturbation explainer, and the
//! per-pixel appearance feature extractor.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Class label of the classifier under explanation.
pub type ClassLabel = usize;

/// Identifier of a visual-appearance cluster from the pretrained
/// clustering model, shared across all images.
pub type ClusterId = usize;

/// Per-class local importance weights for one image: class label to
/// ordered (superpixel id, signed weight) pairs. Superpixel ids are
/// unique within one class's list.
pub type LocalWeights = BTreeMap<ClassLabel, Vec<(u32, f64)>>;

/// Global NormLIME weight table: class label to per-cluster importance.
pub type GlobalWeights = BTreeMap<ClassLabel, BTreeMap<ClusterId, f64>>;

/// Per-pixel superpixel label map produced by the segmentation step of
/// the single-image explainer.
pub type SegmentMap = Array2<u32>;

/// Explanation pipeline errors
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("failed to load clustering model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("failed to load precomputed record {}: {reason}", path.display())]
    RecordLoad { path: PathBuf, reason: String },

    #[error("record already exists: {}", .0.display())]
    RecordExists(PathBuf),

    #[error("no global weight for class {label}, superpixel {segment}")]
    MissingKey { label: ClassLabel, segment: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Image(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<image::ImageError> for ExplainError {
    fn from(err: image::ImageError) -> Self {
        ExplainError::Image(err.to_string())
    }
}

/// Result type for explanation operations
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Cluster id per superpixel for one image.
///
/// Segmentation differs per image, so superpixel ids are image-local
/// while the cluster ids they map to come from the shared clustering
/// model. Keyed by superpixel id so sparse id sets work the same as
/// dense ones; unknown ids return `None` rather than panicking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterAssignment(pub BTreeMap<u32, ClusterId>);

impl ClusterAssignment {
    /// Cluster id for the given superpixel, if assigned.
    #[must_use]
    pub fn get(&self, segment: u32) -> Option<ClusterId> {
        self.0.get(&segment).copied()
    }

    /// Number of superpixels covered by this assignment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u32, ClusterId)> for ClusterAssignment {
    fn from_iter<I: IntoIterator<Item = (u32, ClusterId)>>(iter: I) -> Self {
        ClusterAssignment(iter.into_iter().collect())
    }
}

/// One input image for precomputation: either a path to an encoded image
/// on disk or an already-decoded HxWx3 RGB array.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Array(Array3<f32>),
}

impl ImageSource {
    /// Identity key used to derive this image's record filename: the
    /// filename stem for on-disk images, the positional index otherwise.
    #[must_use]
    pub fn stem(&self, index: usize) -> String {
        match self {
            ImageSource::Path(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| index.to_string()),
            ImageSource::Array(_) => index.to_string(),
        }
    }

    /// Decode to an HxWx3 RGB f32 array (values 0..=255).
    pub fn to_array(&self) -> Result<Array3<f32>> {
        match self {
            ImageSource::Path(path) => {
                let rgb = image::open(path)?.to_rgb8();
                let (width, height) = rgb.dimensions();
                let mut out = Array3::zeros((height as usize, width as usize, 3));
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    for c in 0..3 {
                        out[[y as usize, x as usize, c]] = f32::from(pixel[c]);
                    }
                }
                Ok(out)
            }
            ImageSource::Array(array) => Ok(array.clone()),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<Array3<f32>> for ImageSource {
    fn from(array: Array3<f32>) -> Self {
        ImageSource::Array(array)
    }
}

/// The classifier under explanation.
///
/// Accepts a batch of HxWx3 RGB images and returns one numeric vector
/// over classes per image. Vectors may be probabilities or raw logits;
/// callers are expected to normalize (see the precompute stage's softmax
/// fallback). Failures are opaque and propagate uncaught.
pub trait Classifier {
    fn predict(&self, images: &[Array3<f32>]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Output of the single-image perturbation explainer: the superpixel
/// segmentation it used and the fitted local weights per class.
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub segments: SegmentMap,
    pub local_weights: LocalWeights,
}

/// Single-image perturbation-based explainer (LIME-style).
///
/// Perturbs the image, queries the classifier, and fits local surrogate
/// weights per superpixel for each requested class label. The sampling
/// strategy is this collaborator's concern, not ours.
pub trait ImageExplainer {
    fn interpret(
        &self,
        image: &Array3<f32>,
        classifier: &dyn Classifier,
        labels: &[ClassLabel],
        num_samples: usize,
        batch_size: usize,
    ) -> anyhow::Result<Interpretation>;
}

/// Per-pixel appearance feature extractor used to build clustering
/// features: returns an HxWxD feature tensor for one image.
pub trait FeatureExtractor {
    fn features(&self, image: &Array3<f32>) -> anyhow::Result<Array3<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_source_stem_from_path() {
        let src = ImageSource::Path(PathBuf::from("/data/images/cat_001.jpg"));
        assert_eq!(src.stem(7), "cat_001");
    }

    #[test]
    fn test_image_source_stem_from_array() {
        let src = ImageSource::Array(Array3::zeros((2, 2, 3)));
        assert_eq!(src.stem(7), "7");
    }

    #[test]
    fn test_array_source_round_trips() {
        let array = Array3::from_elem((2, 3, 3), 1.5);
        let src = ImageSource::Array(array.clone());
        assert_eq!(src.to_array().unwrap(), array);
    }

    #[test]
    fn test_cluster_assignment_lookup() {
        let assignment: ClusterAssignment =
            [(0u32, 2usize), (1, 0), (2, 1)].into_iter().collect();
        assert_eq!(assignment.get(0), Some(2));
        assert_eq!(assignment.get(2), Some(1));
        assert_eq!(assignment.get(3), None);
        assert_eq!(assignment.len(), 3);
    }

    #[test]
    fn test_missing_key_error_message() {
        let err = ExplainError::MissingKey {
            label: 3,
            segment: 12,
        };
        assert!(err.to_string().contains("class 3"));
        assert!(err.to_string().contains("superpixel 12"));
    }
}
