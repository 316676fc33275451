//! NormLIME weight aggregation pipeline
//!
//! Combines many single-image LIME explanations into class-level global
//! importance weights:
//!
//! 1. **Precompute** ([`precompute_lime_records`]): per image, explain
//!    the top predicted classes with the external LIME-style explainer,
//!    assign each superpixel to an appearance cluster, and persist one
//!    record file. Already-processed images are skipped, so runs resume.
//! 2. **Aggregate** ([`compute_normlime_weights`]): normalize each
//!    image's weights within each class, group by cluster id, average
//!    across the corpus, and persist the global table under a uniquely
//!    suffixed filename.
//! 3. **Combine** ([`combine_normlime_and_lime`]): merge one image's
//!    local weights with the global table into a re-ranked explanation.
//!
//! All stages are synchronous and single-threaded; the only shared
//! resource is the output directory namespace.

pub mod aggregate;
pub mod combine;
pub mod precompute;
pub mod records;

pub use aggregate::{compute_normlime_weights, label_coverage_shortfall};
pub use combine::combine_normlime_and_lime;
pub use precompute::{precompute_lime_records, select_top_labels, softmax, PrecomputeConfig};
pub use records::{find_record_files, record_path, ImageRecord};

use normlime_cluster_assignment::ClusterAssigner;
use normlime_common::{Classifier, FeatureExtractor, ImageExplainer, ImageSource};
use std::path::{Path, PathBuf};

/// One-call driver: precompute records for `images`, then aggregate every
/// record in `output_dir` with a matching sample count into a global
/// weight table. Returns the path of the written table.
pub fn precompute_normlime_weights(
    images: &[ImageSource],
    classifier: &dyn Classifier,
    explainer: &dyn ImageExplainer,
    extractor: &dyn FeatureExtractor,
    assigner: &ClusterAssigner,
    config: &PrecomputeConfig,
    output_dir: &Path,
) -> anyhow::Result<PathBuf> {
    precompute_lime_records(
        images, classifier, explainer, extractor, assigner, config, output_dir,
    )?;

    let record_paths = find_record_files(output_dir, config.num_samples)?;
    compute_normlime_weights(&record_paths, output_dir, config.num_samples)
}
