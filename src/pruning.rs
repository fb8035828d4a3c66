//! Feature selection.
//!
//! Selectors return a keep-mask indexed by feature ID; [`keep_features`] applies a
//! mask to a corpus.

use alloc::vec::Vec;

use crate::dataset::MultiDocumentCliqueDataset;
use crate::errors::{CliqueError, Result};

/// Marks the features that fire on a gold assignment.
///
/// # Errors
///
/// Forwards feature lookup failures.
pub fn observed_features(corpus: &MultiDocumentCliqueDataset) -> Result<Vec<bool>> {
    let meta = corpus.meta_info();
    let mut mask = vec![false; meta.num_features()];
    for doc in corpus.documents() {
        for (position, datum) in doc.datums().iter().enumerate() {
            let features = datum
                .features(doc.gold_clique(position), meta)?
                .ok_or_else(|| CliqueError::lookup_miss("gold clique without features"))?;
            for &fid in features.indices() {
                if fid >= mask.len() {
                    mask.resize(fid + 1, false);
                }
                mask[fid] = true;
            }
        }
    }
    Ok(mask)
}

/// Marks the features whose summed gold value exceeds `threshold`.
///
/// # Errors
///
/// See [`MultiDocumentCliqueDataset::empirical_counts`].
pub fn features_with_counts_greater_than(
    corpus: &MultiDocumentCliqueDataset,
    threshold: f64,
) -> Result<Vec<bool>> {
    Ok(corpus
        .empirical_counts()?
        .into_iter()
        .map(|count| count > threshold)
        .collect())
}

/// Marks the features whose absolute weight exceeds `threshold`.
#[cfg(feature = "train")]
pub fn features_with_weights_greater_than(weights: &[f64], threshold: f64) -> Vec<bool> {
    weights.iter().map(|w| w.abs() > threshold).collect()
}

/// Marks every feature except the `n` with the largest absolute weights.
#[cfg(feature = "train")]
pub fn remove_top_n_weights(weights: &[f64], n: usize) -> Vec<bool> {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].abs().total_cmp(&weights[a].abs()));
    let mut mask = vec![true; weights.len()];
    for &fid in order.iter().take(n) {
        mask[fid] = false;
    }
    mask
}

/// Moves the weights of kept features to their new IDs.
#[cfg(feature = "train")]
pub fn compact_weights(weights: &[f64], mapping: &[Option<usize>]) -> Vec<f64> {
    let len = mapping.iter().flatten().map(|&id| id + 1).max().unwrap_or(0);
    let mut compacted = vec![0.0; len];
    for (&w, new) in weights.iter().zip(mapping) {
        if let Some(new) = *new {
            compacted[new] = w;
        }
    }
    compacted
}

/// Keeps the features with `keep[id] == true`, renumbers them densely and rewrites
/// every datum of the corpus. Features beyond the mask are dropped.
///
/// Removed features stay pruned in the meta info: documents built later do not
/// receive them, and Type-1 datums skip them. Type-1 datums of the corpus are
/// stored as Type-2 afterwards.
///
/// Returns the old-to-new ID mapping.
///
/// # Errors
///
/// The corpus must hold the only reference to its meta info.
pub fn keep_features(
    corpus: &mut MultiDocumentCliqueDataset,
    keep: &[bool],
) -> Result<Vec<Option<usize>>> {
    let before = corpus.meta_info().num_features();
    let mapping = corpus.keep_features(keep)?;
    let after = corpus.meta_info().num_features();
    log::info!("kept {after} of {before} features");
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::sync::Arc;

    use hashbrown::HashMap;

    use crate::clique::{Clique, LabeledClique};
    use crate::dataset::{CliqueDataset, CliqueDatasetBuilder, DatumType, Observation, Position};
    use crate::meta_info::DatasetMetaInfo;
    use crate::test_utils::{self, hashmap};

    fn unary(label: usize) -> LabeledClique {
        LabeledClique::new(Clique::window(0, 0), &[label]).unwrap()
    }

    // Labels O and A, one observation "f": f|O is feature 0 and f|A is feature 1.
    fn positions() -> Vec<Position> {
        vec![Position {
            observations: vec![Observation::new("f", Clique::window(0, 0))],
            candidates: vec![0, 1],
            gold: 1,
        }]
    }

    fn build(meta: &mut DatasetMetaInfo, datum_type: DatumType) -> CliqueDataset {
        CliqueDatasetBuilder::new(meta)
            .datum_type(datum_type)
            .build(&positions())
            .unwrap()
    }

    fn single_feature_corpus(datum_type: DatumType, freeze: bool) -> MultiDocumentCliqueDataset {
        let mut meta = DatasetMetaInfo::new(0, 0, "O");
        meta.add_label("A");
        let doc = build(&mut meta, datum_type);
        if freeze {
            meta.freeze().unwrap();
        }
        MultiDocumentCliqueDataset::new(Arc::new(meta), vec![doc])
    }

    fn features_by_label(doc: &CliqueDataset, meta: &DatasetMetaInfo) -> Vec<Vec<usize>> {
        (0..2)
            .map(|label| {
                doc.datum(0)
                    .features(&unary(label), meta)
                    .unwrap()
                    .unwrap()
                    .indices()
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn test_observed_features() {
        let (corpus, _) = test_utils::generate_binary_corpus(0);
        let meta = corpus.meta_info();
        let observed = observed_features(&corpus).unwrap();
        // Both labels are gold somewhere, so both conjunctions of `f` fire.
        assert_eq!(meta.num_features(), observed.len());
        assert!(observed.iter().all(|&o| o));
    }

    #[test]
    fn test_count_threshold() {
        let (corpus, _) = test_utils::generate_test_corpus();
        let counts = corpus.empirical_counts().unwrap();
        let mask = features_with_counts_greater_than(&corpus, 1.0).unwrap();
        for (count, keep) in counts.iter().zip(&mask) {
            assert_eq!(*count > 1.0, *keep);
        }
    }

    #[cfg(feature = "train")]
    #[test]
    fn test_weight_selectors() {
        let weights = [0.5, -3.0, 0.01, 2.0];
        assert_eq!(
            vec![true, true, false, true],
            features_with_weights_greater_than(&weights, 0.1)
        );
        assert_eq!(vec![true, false, true, false], remove_top_n_weights(&weights, 2));

        let mapping = [Some(1), None, Some(0), None];
        assert_eq!(vec![0.01, 0.5], compact_weights(&weights, &mapping));
    }

    #[cfg(feature = "train")]
    #[test]
    fn test_keep_features() {
        let (mut corpus, weights) = test_utils::generate_test_corpus();
        let meta = corpus.meta_info();
        let names: HashMap<usize, String> = (0..meta.num_features())
            .map(|fid| (fid, meta.feature(fid).unwrap().0.to_string()))
            .collect();
        let keep: Vec<bool> = (0..meta.num_features()).map(|fid| names[&fid] != "trans").collect();
        let kept = keep.iter().filter(|&&k| k).count();

        let mapping = keep_features(&mut corpus, &keep).unwrap();
        let meta = corpus.meta_info();
        assert_eq!(kept, meta.num_features());
        for (old, new) in mapping.iter().enumerate() {
            match new {
                Some(new) => assert_eq!(names[&old], &*meta.feature(*new).unwrap().0),
                None => assert_eq!("trans", names[&old]),
            }
        }

        let counts = hashmap![
            "kept" => corpus.empirical_counts().unwrap().len(),
            "weights" => compact_weights(&weights, &mapping).len(),
        ];
        assert_eq!(counts["kept"], kept);
        assert_eq!(counts["weights"], kept);
    }

    #[test]
    fn test_keep_features_agrees_across_datum_types() {
        for freeze in [false, true] {
            for (keep, expected) in [
                ([false, true], vec![vec![], vec![0]]),
                ([true, false], vec![vec![0], vec![]]),
            ] {
                for datum_type in [DatumType::Type1, DatumType::Type2] {
                    let mut corpus = single_feature_corpus(datum_type, freeze);
                    keep_features(&mut corpus, &keep).unwrap();
                    let meta = corpus.meta_info();
                    let doc = &corpus.documents()[0];
                    assert_eq!(expected, features_by_label(doc, meta));
                    assert_eq!(1, meta.num_features());

                    // Documents built later follow the pruned feature space.
                    for later_type in [DatumType::Type1, DatumType::Type2] {
                        let mut later_meta = (**meta).clone();
                        let later = build(&mut later_meta, later_type);
                        assert_eq!(expected, features_by_label(&later, &later_meta));
                        assert_eq!(1, later_meta.num_features());
                    }
                }
            }
        }
    }

    #[test]
    fn test_keep_features_needs_exclusive_meta() {
        let (mut corpus, _) = test_utils::generate_test_corpus();
        let _shared = corpus.meta_info().clone();
        let keep = vec![true; corpus.meta_info().num_features()];
        assert!(keep_features(&mut corpus, &keep).is_err());
    }
}
