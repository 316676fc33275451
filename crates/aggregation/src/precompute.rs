//! Precompute stage: one explanation record per image.
//!
//! For each input image this stage predicts its top classes, runs the
//! external perturbation explainer for exactly those classes, assigns
//! the resulting superpixels to appearance clusters, and persists the
//! record. Images whose record file already exists are skipped, so an
//! interrupted run resumes where it left off.
//!
//! Iterations share no mutable state beyond the output directory, so a
//! per-image collaborator failure aborts the whole run rather than being
//! retried here.

use crate::records::{record_path, ImageRecord};
use anyhow::Context;
use normlime_common::{
    ClassLabel, Classifier, ClusterAssignment, FeatureExtractor, ImageExplainer, ImageSource,
};
use normlime_cluster_assignment::{build_cluster_features, ClusterAssigner};
use std::path::Path;
use tracing::{debug, info};

const TOP_CLASS_THRESHOLD: f32 = 0.05;
const MAX_TOP_CLASSES: usize = 5;
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-4;

/// Sampling parameters handed to the per-image explainer. They also key
/// the record filenames, so runs with different sample counts never
/// collide.
#[derive(Debug, Clone)]
pub struct PrecomputeConfig {
    pub num_samples: usize,
    pub batch_size: usize,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            num_samples: 3000,
            batch_size: 50,
        }
    }
}

/// Run the precompute loop over `images`, persisting one record file per
/// image into `output_dir`.
///
/// # Errors
/// Fails on the first collaborator or I/O error; already-written records
/// survive and are skipped on the next run.
pub fn precompute_lime_records(
    images: &[ImageSource],
    classifier: &dyn Classifier,
    explainer: &dyn ImageExplainer,
    extractor: &dyn FeatureExtractor,
    assigner: &ClusterAssigner,
    config: &PrecomputeConfig,
    output_dir: &Path,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    for (index, source) in images.iter().enumerate() {
        let save_path = record_path(output_dir, config.num_samples, &source.stem(index));
        if save_path.exists() {
            info!("{} exists, not computing this one", save_path.display());
            continue;
        }
        info!("processing image {}/{}", index + 1, images.len());

        let image = source.to_array()?;
        let outputs = classifier
            .predict(std::slice::from_ref(&image))
            .context("classifier predict failed")?;
        let raw = outputs
            .into_iter()
            .next()
            .context("classifier returned an empty batch")?;
        let probability = ensure_probabilities(raw);
        let labels = select_top_labels(&probability);

        let interpretation = explainer
            .interpret(
                &image,
                classifier,
                &labels,
                config.num_samples,
                config.batch_size,
            )
            .context("per-image explainer failed")?;

        let feature_map = extractor
            .features(&image)
            .context("feature extractor failed")?;
        let built = build_cluster_features(&feature_map, &interpretation.segments);
        let cluster_ids = assigner.assign(built.features.view());
        let cluster: ClusterAssignment =
            built.segments.iter().copied().zip(cluster_ids).collect();

        let lime_weights = interpretation
            .local_weights
            .into_iter()
            .filter(|(label, _)| labels.contains(label))
            .collect();

        ImageRecord {
            lime_weights,
            cluster,
        }
        .save(&save_path)?;
        debug!("saved {}", save_path.display());
    }

    Ok(())
}

/// Normalize the classifier output into a probability distribution: if
/// the vector already sums to ~1 it is used as-is, otherwise it is
/// treated as raw logits and passed through softmax.
#[must_use]
pub fn ensure_probabilities(raw: Vec<f32>) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        softmax(&raw)
    } else {
        raw
    }
}

/// Numerically stable softmax.
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// Select the classes to explain: descending probability, kept while
/// probability >= 0.05, capped at 5, but never fewer than the top-1.
/// Equal probabilities tie-break to the lower class index.
#[must_use]
pub fn select_top_labels(probability: &[f32]) -> Vec<ClassLabel> {
    let mut order: Vec<ClassLabel> = (0..probability.len()).collect();
    order.sort_by(|&a, &b| {
        probability[b]
            .partial_cmp(&probability[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut top = 0;
    for &label in &order {
        if probability[label] < TOP_CLASS_THRESHOLD || top == MAX_TOP_CLASSES {
            break;
        }
        top += 1;
    }
    order.truncate(top.max(1));
    order
}
