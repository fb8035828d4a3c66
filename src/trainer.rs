use alloc::vec::Vec;

use crate::dataset::MultiDocumentCliqueDataset;
use crate::errors::{CliqueError, Result};
use crate::evaluator::SequenceEvaluator;
use crate::model::{Model, ModelType};
use crate::objective::{CliqueObjective, DiffFunction};
use crate::optimizers::{lbfgs, sgd, LearningRateDecay};
use crate::pruning;

/// Prior settings
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Regularization {
    /// Performs L1-regularization.
    L1,

    /// Performs L2-regularization.
    L2,

    /// Quadratic near zero and linear beyond `epsilon`.
    Huber(f64),

    /// Penalizes the fourth power of every weight.
    Quartic,
}

impl Regularization {
    fn validate(self) -> Result<()> {
        if let Self::Huber(epsilon) = self {
            if epsilon <= 0.0 || !epsilon.is_finite() {
                return Err(CliqueError::invalid_argument(
                    "the Huber epsilon must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Returns the penalty of `weights` scaled by `lambda`, and adds its gradient to
    /// `gradient` if given. L1 adds no gradient; its subgradient belongs to the
    /// optimizer.
    pub(crate) fn penalty(self, lambda: f64, weights: &[f64], mut gradient: Option<&mut [f64]>) -> f64 {
        let mut total = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            let (value, slope) = match self {
                Self::L1 => (w.abs(), 0.0),
                Self::L2 => (w * w / 2.0, w),
                Self::Huber(epsilon) => {
                    if w.abs() < epsilon {
                        (w * w / (2.0 * epsilon), w / epsilon)
                    } else {
                        (w.abs() - epsilon / 2.0, w.signum())
                    }
                }
                Self::Quartic => (w.powi(4) / 4.0, w.powi(3)),
            };
            total += value;
            if let Some(g) = gradient.as_deref_mut() {
                g[i] += lambda * slope;
            }
        }
        lambda * total
    }
}

/// Optimizer settings
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Optimizer {
    /// L-BFGS, or OWL-QN under L1-regularization.
    Lbfgs,

    /// Minibatch SGD over shuffled documents. Only a CRF supports minibatches.
    Sgd {
        batch_size: usize,
        eta: f64,
        decay: LearningRateDecay,
    },
}

/// Trainer for CMMs and CRFs
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub struct Trainer {
    max_iter: u64,
    n_threads: usize,
    regularization: Regularization,
    lambda: f64,
    model_type: ModelType,
    optimizer: Optimizer,
    feature_weight_threshold: Option<f64>,
    evaluator: Option<SequenceEvaluator>,
}

impl Trainer {
    /// Creates a new trainer
    pub fn new() -> Self {
        Self {
            max_iter: 100,
            n_threads: 1,
            regularization: Regularization::L2,
            lambda: 0.1,
            model_type: ModelType::Crf,
            optimizer: Optimizer::Lbfgs,
            feature_weight_threshold: None,
            evaluator: None,
        }
    }

    /// Sets the maximum number of iterations
    pub fn max_iter(mut self, max_iter: u64) -> Result<Self> {
        if max_iter == 0 {
            return Err(CliqueError::invalid_argument("max_iter must not be 0"));
        }
        self.max_iter = max_iter;
        Ok(self)
    }

    /// Sets regularization settings.
    pub fn regularization(mut self, regularization: Regularization, lambda: f64) -> Result<Self> {
        if lambda < 0.0 {
            return Err(CliqueError::invalid_argument(
                "lambda must be greater than or equal to 0.0",
            ));
        }
        regularization.validate()?;
        self.regularization = regularization;
        self.lambda = lambda;
        Ok(self)
    }

    /// Sets the number of threads
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(CliqueError::invalid_argument("n_threads must not be 0"));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    pub fn model_type(mut self, model_type: ModelType) -> Result<Self> {
        if model_type == ModelType::Cmm && matches!(self.optimizer, Optimizer::Sgd { .. }) {
            return Err(CliqueError::unsupported(
                "the CMM objective only supports full-batch evaluation",
            ));
        }
        self.model_type = model_type;
        Ok(self)
    }

    /// Sets the optimizer.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Result<Self> {
        if let Optimizer::Sgd {
            batch_size, eta, ..
        } = optimizer
        {
            if self.model_type == ModelType::Cmm {
                return Err(CliqueError::unsupported(
                    "the CMM objective only supports full-batch evaluation",
                ));
            }
            if batch_size == 0 {
                return Err(CliqueError::invalid_argument("batch_size must not be 0"));
            }
            if eta <= 0.0 {
                return Err(CliqueError::invalid_argument("eta must be positive"));
            }
        }
        self.optimizer = optimizer;
        Ok(self)
    }

    /// After training, drops every feature whose absolute weight is at most
    /// `threshold` and trains once more on the remaining features.
    ///
    /// The corpus must then hold the only reference to its meta info.
    pub fn feature_weight_threshold(mut self, threshold: f64) -> Result<Self> {
        if threshold < 0.0 {
            return Err(CliqueError::invalid_argument(
                "threshold must be greater than or equal to 0.0",
            ));
        }
        self.feature_weight_threshold = Some(threshold);
        Ok(self)
    }

    /// Decodes a held-out corpus during L-BFGS training and logs its accuracy.
    pub fn evaluator(mut self, evaluator: SequenceEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    fn optimize(
        &self,
        corpus: &MultiDocumentCliqueDataset,
        weights_init: Option<Vec<f64>>,
    ) -> Result<Vec<f64>> {
        let objective =
            CliqueObjective::new(corpus, self.model_type)?.n_threads(self.n_threads)?;
        let weights_init = weights_init.unwrap_or_else(|| objective.initial_point());
        match self.optimizer {
            Optimizer::Lbfgs => lbfgs::optimize(
                objective,
                weights_init,
                self.regularization,
                self.lambda,
                self.max_iter,
                self.evaluator.clone(),
            ),
            Optimizer::Sgd {
                batch_size,
                eta,
                decay,
            } => sgd::optimize(
                objective,
                weights_init,
                self.regularization,
                self.lambda,
                self.max_iter,
                batch_size,
                eta,
                decay,
            ),
        }
    }

    /// Starts training and generates a model from the given corpus.
    ///
    /// # Errors
    ///
    /// The corpus must not be empty. Feature pruning needs exclusive ownership of
    /// the corpus meta info.
    pub fn train(&self, corpus: &mut MultiDocumentCliqueDataset) -> Result<Model> {
        if corpus.num_documents() == 0 {
            return Err(CliqueError::invalid_argument("the corpus has no documents"));
        }
        corpus.log_stats();

        let mut weights = self.optimize(corpus, None)?;

        if let Some(threshold) = self.feature_weight_threshold {
            let keep = pruning::features_with_weights_greater_than(&weights, threshold);
            let mapping = pruning::keep_features(corpus, &keep)?;
            let weights_init = pruning::compact_weights(&weights, &mapping);
            weights = self.optimize(corpus, Some(weights_init))?;
        }

        Ok(Model::new(
            self.model_type,
            weights,
            (**corpus.meta_info()).clone(),
        ))
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}
