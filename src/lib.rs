//! # cliquecrf
//!
//! Clique-factored conditional Markov models (CMMs) and conditional random fields
//! (CRFs) for sequence labeling.
//!
//! Every position of a sequence holds a set of candidate label assignments to the
//! maximum clique, a window of neighboring positions, each with a sparse feature
//! vector. A CMM normalizes scores at every position; a CRF normalizes over whole
//! sequences.
#![cfg_attr(
    feature = "train",
    doc = "
## Examples

```rust
use std::sync::Arc;

use cliquecrf::{
    Clique, CliqueDatasetBuilder, DatasetMetaInfo, ExactBestSequenceFinder,
    MultiDocumentCliqueDataset, Observation, Position, Trainer,
};

fn positions(words: &[(&str, usize)]) -> Vec<Position> {
    words
        .iter()
        .map(|&(word, gold)| Position {
            observations: vec![Observation::new(format!(\"w={word}\"), Clique::window(0, 0))],
            candidates: vec![0, 1],
            gold,
        })
        .collect()
}

// Label 0 is the background label.
let mut meta = DatasetMetaInfo::new(0, 0, \"O\");
let loc = meta.add_label(\"LOC\");

let mut documents = vec![];
for sentence in [
    &[(\"I\", 0), (\"visited\", 0), (\"Paris\", loc)][..],
    &[(\"Paris\", loc), (\"is\", 0), (\"big\", 0)][..],
] {
    documents.push(CliqueDatasetBuilder::new(&mut meta).build(&positions(sentence))?);
}
meta.freeze()?;

let mut corpus = MultiDocumentCliqueDataset::new(Arc::new(meta), documents);

// Generates a model
let mut model = Trainer::new().train(&mut corpus)?;

// The model carries the meta info. Unseen words get fresh feature IDs without
// weights.
let test = CliqueDatasetBuilder::new(model.meta_info_mut())
    .build(&positions(&[(\"We\", 0), (\"visited\", 0), (\"Paris\", loc)]))?;

let tags = model.tag(&test, model.meta_info(), &mut ExactBestSequenceFinder::new())?;
assert_eq!(vec![0, 0, loc], tags);
# Ok::<(), cliquecrf::CliqueError>(())
```
"
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate alloc;

mod clique;
mod cmm;
mod composition;
mod crf;
mod dataset;
mod datum;
mod decoder;
mod errors;
mod feature_map;
mod features;
mod math;
mod meta_info;
mod model;
mod pruning;
mod queriable;
mod sequence;
mod vector;

#[cfg(feature = "train")]
mod evaluator;
#[cfg(feature = "train")]
mod objective;
#[cfg(feature = "train")]
mod optimizers;
#[cfg(feature = "train")]
mod trainer;

#[cfg(test)]
mod test_utils;

pub use clique::{Clique, LabeledClique};
pub use cmm::CliqueCmm;
pub use composition::{
    FactoredSequenceListener, FactoredSequenceModel, SequentialSequenceListener,
    SequentialSequenceModel,
};
pub use crf::CliqueCrf;
pub use dataset::{
    CliqueDataset, CliqueDatasetBuilder, DatumType, MultiDocumentCliqueDataset, Observation,
    Position,
};
pub use datum::{CliqueDatum, CliqueIndex, Type1Datum, Type2Datum};
pub use decoder::{accuracy, ExactBestSequenceFinder, InferenceType, SequenceSampler};
pub use errors::{CliqueError, Result};
pub use feature_map::FeatureMap;
pub use features::Features;
pub use meta_info::DatasetMetaInfo;
pub use model::{Model, ModelType, Scorer};
pub use pruning::{features_with_counts_greater_than, keep_features, observed_features};
pub use queriable::{merge_sorted, QueriableSequenceModel, SequenceModelAdapter};
pub use sequence::{BestSequenceFinder, SequenceListener, SequenceModel};
pub use vector::{GradientVector, SparseGradientVector, WeightVector};

#[cfg(feature = "train")]
pub use evaluator::SequenceEvaluator;
#[cfg(feature = "train")]
pub use objective::{CliqueObjective, DiffFunction};
#[cfg(feature = "train")]
pub use optimizers::LearningRateDecay;
#[cfg(feature = "train")]
pub use pruning::{compact_weights, features_with_weights_greater_than, remove_top_n_weights};
#[cfg(feature = "train")]
pub use trainer::{Optimizer, Regularization, Trainer};
