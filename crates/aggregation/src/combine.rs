//! Combine one image's local LIME weights with the global NormLIME
//! table to produce a re-ranked explanation.

use normlime_common::{ExplainError, GlobalWeights, LocalWeights, Result};
use std::collections::BTreeMap;

/// Multiply each local superpixel weight by its global counterpart and
/// re-rank by descending absolute combined weight.
///
/// Only classes present in both inputs are combined. The caller is
/// responsible for keying `global_weights` by ids that align with the
/// local superpixel ids (in practice via a shared cluster index).
///
/// # Errors
/// Returns [`ExplainError::MissingKey`] if a local superpixel has no
/// global counterpart; silently dropping it would corrupt the ranking.
pub fn combine_normlime_and_lime(
    local_weights: &LocalWeights,
    global_weights: &GlobalWeights,
) -> Result<LocalWeights> {
    let mut combined = BTreeMap::new();

    for (label, weights) in local_weights {
        let Some(global) = global_weights.get(label) else {
            continue;
        };

        let mut entries = Vec::with_capacity(weights.len());
        for &(segment, weight) in weights {
            let global_weight =
                global
                    .get(&(segment as usize))
                    .copied()
                    .ok_or(ExplainError::MissingKey {
                        label: *label,
                        segment,
                    })?;
            entries.push((segment, weight * global_weight));
        }
        entries.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        combined.insert(*label, entries);
    }

    Ok(combined)
}
