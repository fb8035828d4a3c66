use alloc::sync::Arc;
use alloc::vec::Vec;

use argmin::core::observers::Observe;
use argmin::core::{State, KV};

use crate::dataset::MultiDocumentCliqueDataset;
use crate::decoder::{self, InferenceType};
use crate::errors::{CliqueError, Result};
use crate::model::{ModelType, Scorer};
use crate::queriable::SequenceModelAdapter;

/// Decodes a held-out corpus with the weights of the running optimizer and logs
/// its token accuracy.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone)]
pub struct SequenceEvaluator {
    corpus: Arc<MultiDocumentCliqueDataset>,
    model_type: ModelType,
    interval: u64,
    inference: InferenceType,
}

impl SequenceEvaluator {
    /// Creates an evaluator that runs after every iteration with Viterbi decoding.
    pub fn new(corpus: Arc<MultiDocumentCliqueDataset>, model_type: ModelType) -> Self {
        Self {
            corpus,
            model_type,
            interval: 1,
            inference: InferenceType::Viterbi,
        }
    }

    /// Runs only every `interval` iterations.
    pub fn interval(mut self, interval: u64) -> Result<Self> {
        if interval == 0 {
            return Err(CliqueError::invalid_argument("interval must not be 0"));
        }
        self.interval = interval;
        Ok(self)
    }

    pub fn inference(mut self, inference: InferenceType) -> Self {
        self.inference = inference;
        self
    }

    /// Decodes every document with `weights` and returns the token accuracy.
    ///
    /// # Errors
    ///
    /// Forwards scoring and decoding failures.
    pub fn evaluate(&self, weights: &[f64]) -> Result<f64> {
        let meta = self.corpus.meta_info();
        let mut finder = self.inference.finder();
        let mut gold = vec![];
        let mut predicted: Vec<usize> = vec![];
        for doc in self.corpus.documents() {
            let adapter = SequenceModelAdapter::new(Scorer::new(self.model_type, doc, meta, weights)?);
            let sequence = finder.best_sequence(&adapter)?;
            let left = meta.left_window();
            gold.extend_from_slice(doc.gold_labels());
            predicted.extend_from_slice(&sequence[left..left + doc.len()]);
        }
        decoder::accuracy(&gold, &predicted)
    }
}

impl<I> Observe<I> for SequenceEvaluator
where
    I: State<Param = Vec<f64>>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), argmin::core::Error> {
        let iter = state.get_iter();
        if iter % self.interval != 0 {
            return Ok(());
        }
        if let Some(weights) = state.get_param() {
            let accuracy = self.evaluate(weights)?;
            log::info!("iter={iter}, held-out accuracy={accuracy}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils;
    use crate::trainer::{Regularization, Trainer};

    #[test]
    fn test_evaluate_follows_weights() {
        let (corpus, feature) = test_utils::generate_binary_corpus(0);
        let num_features = corpus.meta_info().num_features();
        let evaluator = SequenceEvaluator::new(Arc::new(corpus), ModelType::Cmm);
        // Gold is [1, 0], so a label-independent prediction gets half right.
        let mut weights = vec![0.0; num_features];
        weights[feature] = 1.0;
        assert!((evaluator.evaluate(&weights).unwrap() - 0.5).abs() < 1e-12);
        weights[feature] = -1.0;
        assert!((evaluator.evaluate(&weights).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_observer_during_training() {
        let (mut corpus, _) = test_utils::generate_binary_corpus(1);
        let (held_out, _) = test_utils::generate_binary_corpus(1);
        let evaluator = SequenceEvaluator::new(Arc::new(held_out), ModelType::Crf)
            .interval(2)
            .unwrap();
        let model = Trainer::new()
            .max_iter(50)
            .unwrap()
            .regularization(Regularization::L2, 0.01)
            .unwrap()
            .evaluator(evaluator.clone())
            .train(&mut corpus)
            .unwrap();
        assert!((evaluator.evaluate(model.weights()).unwrap() - 1.0).abs() < 1e-12);
        assert!(SequenceEvaluator::new(Arc::new(corpus), ModelType::Crf)
            .interval(0)
            .is_err());
    }
}
