//! End-to-end pipeline tests with stub collaborators: precompute over a
//! small corpus, aggregate into a global table, and combine back with a
//! single image's local weights.

use ndarray::{array, Array3};
use normlime_aggregation::{
    combine_normlime_and_lime, find_record_files, precompute_lime_records,
    precompute_normlime_weights, PrecomputeConfig,
};
use normlime_cluster_assignment::ClusterAssigner;
use normlime_common::{
    Classifier, FeatureExtractor, GlobalWeights, ImageExplainer, ImageSource, Interpretation,
    LocalWeights,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

struct StubClassifier {
    output: Vec<f32>,
}

impl Classifier for StubClassifier {
    fn predict(&self, images: &[Array3<f32>]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(vec![self.output.clone(); images.len()])
    }
}

/// Returns a fixed two-superpixel interpretation and counts invocations,
/// so resumability can assert that skipped images cost no explainer work.
struct CountingExplainer {
    calls: AtomicUsize,
}

impl CountingExplainer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageExplainer for CountingExplainer {
    fn interpret(
        &self,
        _image: &Array3<f32>,
        _classifier: &dyn Classifier,
        labels: &[usize],
        _num_samples: usize,
        _batch_size: usize,
    ) -> anyhow::Result<Interpretation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut local_weights = LocalWeights::new();
        for &label in labels {
            local_weights.insert(label, vec![(0, 0.6), (1, -0.4)]);
        }
        Ok(Interpretation {
            segments: array![[0u32, 0], [1, 1]],
            local_weights,
        })
    }
}

struct FlatFeatures;

impl FeatureExtractor for FlatFeatures {
    fn features(&self, image: &Array3<f32>) -> anyhow::Result<Array3<f32>> {
        let (height, width, _) = image.dim();
        Ok(Array3::from_elem((height, width, 2), 1.0))
    }
}

fn assigner() -> ClusterAssigner {
    // Feature rows are L2-normalized 4-vectors; both centers are far
    // enough apart that every flat-feature superpixel lands in cluster 0.
    ClusterAssigner::from_centers(array![[0.5, 0.5, 0.5, 0.5], [-1.0, -1.0, -1.0, -1.0]])
}

fn corpus(n: usize) -> Vec<ImageSource> {
    (0..n)
        .map(|_| ImageSource::Array(Array3::zeros((2, 2, 3))))
        .collect()
}

fn config() -> PrecomputeConfig {
    PrecomputeConfig {
        num_samples: 10,
        batch_size: 4,
    }
}

#[test]
fn precompute_is_resumable_without_extra_explainer_calls() {
    let dir = tempfile::tempdir().unwrap();
    let images = corpus(3);
    let classifier = StubClassifier {
        output: vec![0.6, 0.4],
    };
    let explainer = CountingExplainer::new();

    precompute_lime_records(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();
    assert_eq!(explainer.call_count(), 3);
    let first_run: Vec<PathBuf> = find_record_files(dir.path(), 10).unwrap();
    assert_eq!(first_run.len(), 3);

    precompute_lime_records(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();
    assert_eq!(explainer.call_count(), 3, "second run must skip everything");
    assert_eq!(find_record_files(dir.path(), 10).unwrap(), first_run);
}

#[test]
fn driver_produces_expected_global_table() {
    let dir = tempfile::tempdir().unwrap();
    let images = corpus(2);
    let classifier = StubClassifier {
        output: vec![0.6, 0.4],
    };
    let explainer = CountingExplainer::new();

    let out = precompute_normlime_weights(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();

    let global: GlobalWeights =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();

    // Both predicted classes pass the 0.05 threshold.
    assert_eq!(global.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    // Per image and class: l1 = 1.0, contributions 0.36 and 0.16, both in
    // cluster 0, mean 0.26; identical images keep the corpus mean at 0.26.
    for class in global.values() {
        assert_eq!(class.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert!((class[&0] - 0.26).abs() < 1e-12);
    }
}

#[test]
fn driver_runs_are_resumable_and_outputs_unique() {
    let dir = tempfile::tempdir().unwrap();
    let images = corpus(2);
    let classifier = StubClassifier {
        output: vec![0.6, 0.4],
    };
    let explainer = CountingExplainer::new();

    let first = precompute_normlime_weights(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();
    let second = precompute_normlime_weights(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();

    assert_eq!(explainer.call_count(), 2, "records reused on second run");
    assert_ne!(first, second, "aggregate outputs must never collide");
    assert!(first.exists() && second.exists());
}

#[test]
fn combined_ranking_follows_local_and_global_weights() {
    let dir = tempfile::tempdir().unwrap();
    let images = corpus(2);
    let classifier = StubClassifier {
        output: vec![0.6, 0.4],
    };
    let explainer = CountingExplainer::new();

    let out = precompute_normlime_weights(
        &images,
        &classifier,
        &explainer,
        &FlatFeatures,
        &assigner(),
        &config(),
        dir.path(),
    )
    .unwrap();
    let global: GlobalWeights =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();

    // Explain one more image locally and align the global table with its
    // superpixel ids through the cluster assignment (both superpixels are
    // in cluster 0 here).
    let interpretation = explainer
        .interpret(&Array3::zeros((2, 2, 3)), &classifier, &[0], 10, 4)
        .unwrap();
    let aligned: GlobalWeights = global
        .iter()
        .map(|(label, by_cluster)| {
            let per_segment = [0u32, 1]
                .iter()
                .map(|&segment| (segment as usize, by_cluster[&0]))
                .collect();
            (*label, per_segment)
        })
        .collect();

    let combined =
        combine_normlime_and_lime(&interpretation.local_weights, &aligned).unwrap();
    let order: Vec<u32> = combined[&0].iter().map(|(s, _)| *s).collect();
    // Uniform global weights preserve the local |weight| ordering.
    assert_eq!(order, vec![0, 1]);
}
