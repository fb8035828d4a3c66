use alloc::vec::Vec;

use crate::clique::LabeledClique;
use crate::dataset::CliqueDataset;
use crate::errors::{CliqueError, Result};
use crate::meta_info::DatasetMetaInfo;
use crate::queriable::{check_max_clique, normalize_conditionally, ConditionalCache, QueriableSequenceModel};

/// Conditional Markov model: every position is normalized on its own.
///
/// A scorer is bound to one weight vector. Build a new one whenever the weights
/// change; the memo it fills on first access is never invalidated.
pub struct CliqueCmm<'a> {
    dataset: &'a CliqueDataset,
    meta: &'a DatasetMetaInfo,
    weights: &'a [f64],
    cache: ConditionalCache,
}

impl<'a> CliqueCmm<'a> {
    /// Creates a new scorer.
    pub fn new(dataset: &'a CliqueDataset, meta: &'a DatasetMetaInfo, weights: &'a [f64]) -> Self {
        Self {
            dataset,
            meta,
            weights,
            cache: ConditionalCache::new(dataset.len()),
        }
    }

    fn normalize_position(&self, position: usize) -> Result<Vec<f64>> {
        let datum = self.dataset.datum(position);
        let mut scores = Vec::with_capacity(datum.len());
        for i in 0..datum.len() {
            scores.push(datum.features_at(i, self.meta)?.dot(self.weights));
        }
        normalize_conditionally(datum.labeled_cliques(), &scores)
    }

    /// Gets the conditional log-probability of the `index`-th labeled clique of the
    /// datum at `position`.
    pub(crate) fn log_conditional_prob_at(&self, position: usize, index: usize) -> Result<f64> {
        self.cache
            .get_or_compute(position, index, || self.normalize_position(position))
    }
}

impl QueriableSequenceModel for CliqueCmm<'_> {
    fn dataset(&self) -> &CliqueDataset {
        self.dataset
    }

    fn meta_info(&self) -> &DatasetMetaInfo {
        self.meta
    }

    fn log_conditional_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64> {
        check_max_clique(self.meta, lc)?;
        match self.dataset.datum(position).index_of(lc) {
            Some(index) => self.log_conditional_prob_at(position, index),
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn log_prob_of(&self, _position: usize, _lc: &LabeledClique) -> Result<f64> {
        Err(CliqueError::unsupported(
            "a CMM only answers position-conditional queries",
        ))
    }

    fn log_prob_of_sequence(&self, _labels: &[usize], _positions: &[usize]) -> Result<f64> {
        Err(CliqueError::unsupported(
            "a CMM only answers position-conditional queries",
        ))
    }
}
