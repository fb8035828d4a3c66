//! Regularized negative conditional log-likelihood of a corpus.

use core::ops::Range;
use std::sync::{Mutex, PoisonError};
use std::thread;

use alloc::vec::Vec;

use argmin::core::{CostFunction, Gradient};
use argmin_math::ArgminSub;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::cmm::CliqueCmm;
use crate::crf::CliqueCrf;
use crate::dataset::{CliqueDataset, MultiDocumentCliqueDataset};
use crate::errors::{CliqueError, Result};
use crate::model::ModelType;
use crate::queriable::QueriableSequenceModel;
use crate::trainer::Regularization;
use crate::vector::{GradientVector, SparseGradientVector};

/// A differentiable function handed to a numerical optimizer.
pub trait DiffFunction {
    /// Returns the number of parameters.
    fn domain_dimension(&self) -> usize;

    /// Returns the starting point of the optimization.
    fn initial_point(&self) -> Vec<f64> {
        vec![0.0; self.domain_dimension()]
    }

    fn value(&self, weights: &[f64]) -> Result<f64>;

    fn gradient(&self, weights: &[f64]) -> Result<Vec<f64>>;
}

struct Evaluation {
    weights: Vec<f64>,
    value: f64,
    gradient: Vec<f64>,
}

/// Training objective of a [`ModelType`] over a corpus.
///
/// The value is the negative conditional log-likelihood plus the prior; the
/// gradient is expected minus empirical feature counts plus the prior gradient.
/// Documents are evaluated in parallel and reduced in document order, so the result
/// does not depend on the number of threads.
pub struct CliqueObjective<'a> {
    corpus: &'a MultiDocumentCliqueDataset,
    model_type: ModelType,
    dimension: usize,
    n_threads: usize,
    prior: Option<(Regularization, f64)>,
    empirical: Vec<f64>,
    order: Vec<usize>,
    last: Mutex<Option<Evaluation>>,
}

impl<'a> CliqueObjective<'a> {
    /// Creates a new objective without a prior.
    ///
    /// # Errors
    ///
    /// Forwards failures while counting the gold features.
    pub fn new(corpus: &'a MultiDocumentCliqueDataset, model_type: ModelType) -> Result<Self> {
        let dimension = corpus.meta_info().num_features();
        let mut empirical = corpus.empirical_counts()?;
        empirical.resize(dimension, 0.0);
        Ok(Self {
            corpus,
            model_type,
            dimension,
            n_threads: 1,
            prior: None,
            empirical,
            order: (0..corpus.num_documents()).collect(),
            last: Mutex::new(None),
        })
    }

    /// Sets the number of threads
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(CliqueError::invalid_argument("n_threads must not be 0"));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    /// Adds a differentiable prior to the value and the gradient.
    ///
    /// # Errors
    ///
    /// L1 is not differentiable and must be handled by the optimizer.
    pub fn prior(mut self, regularization: Regularization, lambda: f64) -> Result<Self> {
        if regularization == Regularization::L1 {
            return Err(CliqueError::invalid_argument(
                "the L1 prior is applied by the optimizer",
            ));
        }
        if lambda < 0.0 {
            return Err(CliqueError::invalid_argument(
                "lambda must be greater than or equal to 0.0",
            ));
        }
        self.prior = Some((regularization, lambda));
        Ok(self)
    }

    #[inline(always)]
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    #[inline(always)]
    pub fn num_documents(&self) -> usize {
        self.order.len()
    }

    /// Reorders the documents visited by [`CliqueObjective::gradient_partial`].
    pub fn shuffle<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        self.order.shuffle(rng);
    }

    /// Computes the gradient over the documents at `range` of the visiting order,
    /// without the prior.
    ///
    /// # Errors
    ///
    /// Minibatches are only meaningful for a globally normalized model; a CMM
    /// returns [`CliqueError::Unsupported`].
    pub fn gradient_partial(&self, weights: &[f64], range: Range<usize>) -> Result<Vec<f64>> {
        if self.model_type == ModelType::Cmm {
            return Err(CliqueError::unsupported(
                "the CMM objective only supports full-batch evaluation",
            ));
        }
        let documents = self.order.get(range.clone()).ok_or_else(|| {
            CliqueError::invalid_argument(format!(
                "batch {range:?} is out of {} documents",
                self.order.len()
            ))
        })?;
        let (_, gradient, _) = self.evaluate(weights, documents, true)?;
        Ok(gradient)
    }

    // Adds the expected counts of one document to `gradients` (minus its gold
    // counts if `subtract_gold`) and returns its negative log-likelihood.
    fn document_loss(
        &self,
        doc: &CliqueDataset,
        weights: &[f64],
        gradients: &mut SparseGradientVector,
        subtract_gold: bool,
    ) -> Result<f64> {
        let meta = self.corpus.meta_info();
        let loss = match self.model_type {
            ModelType::Cmm => {
                let cmm = CliqueCmm::new(doc, meta, weights);
                let mut loss = 0.0;
                for position in 0..doc.len() {
                    let datum = doc.datum(position);
                    let gold = doc.gold_clique(position);
                    for lc in doc.max_clique_conditional_labels(position, gold)? {
                        let Some(index) = datum.index_of(&lc) else {
                            continue;
                        };
                        let prob = cmm.log_conditional_prob_at(position, index)?.exp();
                        if prob == 0.0 {
                            continue;
                        }
                        for (fid, value) in datum.features_at(index, meta)?.iter() {
                            gradients.add(fid, prob * value);
                        }
                    }
                    loss -= cmm.log_conditional_prob_of(position, gold)?;
                }
                loss
            }
            ModelType::Crf => {
                let crf = CliqueCrf::new(doc, meta, weights)?;
                crf.expected_counts(gradients)?;
                -crf.gold_log_likelihood()?
            }
        };
        if subtract_gold {
            for (position, datum) in doc.datums().iter().enumerate() {
                let features = datum
                    .features(doc.gold_clique(position), meta)?
                    .ok_or_else(|| CliqueError::lookup_miss("gold clique without features"))?;
                for (fid, value) in features.iter() {
                    gradients.add(fid, -value);
                }
            }
        }
        Ok(loss)
    }

    // Returns the total loss, the summed gradient and the summed likelihood.
    fn evaluate(
        &self,
        weights: &[f64],
        documents: &[usize],
        subtract_gold: bool,
    ) -> Result<(f64, Vec<f64>, f64)> {
        let (s, r) = crossbeam_channel::unbounded();
        for (slot, &doc) in documents.iter().enumerate() {
            s.send((slot, doc))
                .map_err(|_| CliqueError::Optimizer("work queue closed".into()))?;
        }
        drop(s);

        let mut results: Vec<Option<Result<(f64, SparseGradientVector)>>> =
            (0..documents.len()).map(|_| None).collect();
        thread::scope(|scope| {
            let mut threads = vec![];
            for _ in 0..self.n_threads.min(documents.len()) {
                let t = scope.spawn(|| {
                    let mut local = vec![];
                    while let Ok((slot, doc)) = r.try_recv() {
                        let mut gradients = SparseGradientVector::new();
                        let loss = self.document_loss(
                            &self.corpus.documents()[doc],
                            weights,
                            &mut gradients,
                            subtract_gold,
                        );
                        local.push((slot, loss.map(|loss| (loss, gradients))));
                    }
                    local
                });
                threads.push(t);
            }
            for t in threads {
                let local = t
                    .join()
                    .map_err(|_| CliqueError::Optimizer("worker thread panicked".into()))?;
                for (slot, result) in local {
                    results[slot] = Some(result);
                }
            }
            Ok::<(), CliqueError>(())
        })?;

        let mut loss_total = 0.0;
        let mut likelihood_total = 0.0;
        let mut gradient = vec![0.0; self.dimension];
        for result in results {
            let (loss, mut gradients) =
                result.ok_or_else(|| CliqueError::Optimizer("document left unevaluated".into()))??;
            loss_total += loss;
            likelihood_total += (-loss).exp();
            gradients.merge_gradients(&mut gradient);
        }
        Ok((loss_total, gradient, likelihood_total))
    }

    fn evaluate_full(&self, weights: &[f64]) -> Result<(f64, Vec<f64>)> {
        if weights.len() != self.dimension {
            return Err(CliqueError::invalid_argument(format!(
                "{} weights for {} features",
                weights.len(),
                self.dimension
            )));
        }
        {
            let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = last.as_ref() {
                if last.weights == weights {
                    return Ok((last.value, last.gradient.clone()));
                }
            }
        }

        let documents: Vec<usize> = (0..self.corpus.num_documents()).collect();
        let (mut value, expected, likelihood) = self.evaluate(weights, &documents, false)?;
        let mut gradient = expected.sub(&self.empirical);

        log::debug!("loss = {value}");
        log::debug!(
            "mean likelihood = {}",
            likelihood / documents.len().max(1) as f64
        );

        if let Some((regularization, lambda)) = self.prior {
            value += regularization.penalty(lambda, weights, Some(&mut gradient));
        }

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Evaluation {
            weights: weights.to_vec(),
            value,
            gradient: gradient.clone(),
        });
        Ok((value, gradient))
    }
}

impl DiffFunction for CliqueObjective<'_> {
    fn domain_dimension(&self) -> usize {
        self.dimension
    }

    fn value(&self, weights: &[f64]) -> Result<f64> {
        Ok(self.evaluate_full(weights)?.0)
    }

    fn gradient(&self, weights: &[f64]) -> Result<Vec<f64>> {
        Ok(self.evaluate_full(weights)?.1)
    }
}

impl CostFunction for CliqueObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(DiffFunction::value(self, param)?)
    }
}

impl Gradient for CliqueObjective<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        Ok(DiffFunction::gradient(self, param)?)
    }
}
