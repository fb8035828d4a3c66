use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::clique::LabeledClique;
use crate::dataset::CliqueDataset;
use crate::errors::{CliqueError, Result};
use crate::math;
use crate::meta_info::DatasetMetaInfo;
use crate::queriable::{check_max_clique, normalize_conditionally, ConditionalCache, QueriableSequenceModel};
use crate::vector::GradientVector;

/// Forward pass over the clique chain.
///
/// Neighboring maximum cliques overlap in every offset but one, so the message
/// from position `p` to `p + 1` is keyed by the labels they share. Assignments for
/// which `allowed` is false are skipped.
fn calculate_alphas<F>(dataset: &CliqueDataset, factors: &[Vec<f64>], allowed: F) -> Vec<Vec<f64>>
where
    F: Fn(usize, &LabeledClique) -> bool,
{
    let mut alphas = Vec::with_capacity(dataset.len());
    let mut messages: HashMap<&[usize], f64> = HashMap::new();
    for (position, factors) in factors.iter().enumerate() {
        let keys = dataset.datum(position).labeled_cliques();
        let mut alpha = Vec::with_capacity(keys.len());
        for (lc, &factor) in keys.iter().zip(factors) {
            let score = if !allowed(position, lc) {
                f64::NEG_INFINITY
            } else if position == 0 {
                factor
            } else {
                let message = messages
                    .get(lc.left_message())
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                factor + message
            };
            alpha.push(score);
        }
        messages.clear();
        for (lc, &score) in keys.iter().zip(&alpha) {
            let total = messages.entry(lc.right_message()).or_insert(f64::NEG_INFINITY);
            *total = math::logsumexp(*total, score);
        }
        alphas.push(alpha);
    }
    alphas
}

fn calculate_betas(dataset: &CliqueDataset, factors: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = dataset.len();
    let mut betas = vec![vec![]; n];
    if n == 0 {
        return betas;
    }
    betas[n - 1] = vec![0.0; factors[n - 1].len()];
    let mut messages: HashMap<&[usize], f64> = HashMap::new();
    for position in (0..n - 1).rev() {
        messages.clear();
        let next_keys = dataset.datum(position + 1).labeled_cliques();
        for ((lc, &factor), &beta) in next_keys
            .iter()
            .zip(&factors[position + 1])
            .zip(&betas[position + 1])
        {
            let total = messages.entry(lc.left_message()).or_insert(f64::NEG_INFINITY);
            *total = math::logsumexp(*total, factor + beta);
        }
        betas[position] = dataset
            .datum(position)
            .labeled_cliques()
            .iter()
            .map(|lc| {
                messages
                    .get(lc.right_message())
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY)
            })
            .collect();
    }
    betas
}

/// Conditional random field: the whole sequence is normalized jointly.
///
/// The clique chain is calibrated once on construction; every query afterwards
/// reads the stored marginals. Bound to one weight vector like
/// [`CliqueCmm`](crate::CliqueCmm).
pub struct CliqueCrf<'a> {
    dataset: &'a CliqueDataset,
    meta: &'a DatasetMetaInfo,
    factors: Vec<Vec<f64>>,
    marginals: Vec<Vec<f64>>,
    log_z: f64,
    cache: ConditionalCache,
}

impl<'a> CliqueCrf<'a> {
    /// Creates a new scorer and calibrates it.
    ///
    /// # Errors
    ///
    /// Forwards feature lookup failures of Type-1 datums.
    pub fn new(dataset: &'a CliqueDataset, meta: &'a DatasetMetaInfo, weights: &[f64]) -> Result<Self> {
        let mut factors = Vec::with_capacity(dataset.len());
        for datum in dataset.datums() {
            let mut scores = Vec::with_capacity(datum.len());
            for i in 0..datum.len() {
                scores.push(datum.features_at(i, meta)?.dot(weights));
            }
            factors.push(scores);
        }

        let alphas = calculate_alphas(dataset, &factors, |_, _| true);
        let betas = calculate_betas(dataset, &factors);
        let log_z = alphas.last().map_or(0.0, |alpha| math::log_sum(alpha));
        let marginals = alphas
            .iter()
            .zip(&betas)
            .map(|(alpha, beta)| {
                alpha
                    .iter()
                    .zip(beta)
                    .map(|(&a, &b)| a + b - log_z)
                    .collect()
            })
            .collect();

        Ok(Self {
            dataset,
            meta,
            factors,
            marginals,
            log_z,
            cache: ConditionalCache::new(dataset.len()),
        })
    }

    /// Gets the log partition function of the sequence.
    #[inline(always)]
    pub fn log_partition(&self) -> f64 {
        self.log_z
    }

    /// Gets the unnormalized log-score of the `index`-th labeled clique at `position`.
    #[inline(always)]
    pub(crate) fn factor(&self, position: usize, index: usize) -> f64 {
        self.factors[position][index]
    }

    /// Gets the marginal log-probability of the `index`-th labeled clique at `position`.
    #[inline(always)]
    pub(crate) fn marginal(&self, position: usize, index: usize) -> f64 {
        self.marginals[position][index]
    }

    /// Adds the model expectation of every feature to `gradients`.
    pub(crate) fn expected_counts<G>(&self, gradients: &mut G) -> Result<()>
    where
        G: GradientVector + ?Sized,
    {
        for position in 0..self.dataset.len() {
            let datum = self.dataset.datum(position);
            for i in 0..datum.len() {
                let prob = self.marginal(position, i).exp();
                if prob == 0.0 {
                    continue;
                }
                for (fid, value) in datum.features_at(i, self.meta)?.iter() {
                    gradients.add(fid, prob * value);
                }
            }
        }
        Ok(())
    }

    /// Computes the log-probability of the gold labeling.
    pub(crate) fn gold_log_likelihood(&self) -> Result<f64> {
        let mut score = 0.0;
        for position in 0..self.dataset.len() {
            let index = self
                .dataset
                .datum(position)
                .index_of(self.dataset.gold_clique(position))
                .ok_or_else(|| CliqueError::lookup_miss("gold clique without features"))?;
            score += self.factor(position, index);
        }
        Ok(score - self.log_z)
    }
}

impl QueriableSequenceModel for CliqueCrf<'_> {
    fn dataset(&self) -> &CliqueDataset {
        self.dataset
    }

    fn meta_info(&self) -> &DatasetMetaInfo {
        self.meta
    }

    fn log_conditional_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64> {
        check_max_clique(self.meta, lc)?;
        let Some(index) = self.dataset.datum(position).index_of(lc) else {
            return Ok(f64::NEG_INFINITY);
        };
        self.cache.get_or_compute(position, index, || {
            normalize_conditionally(
                self.dataset.datum(position).labeled_cliques(),
                &self.marginals[position],
            )
        })
    }

    fn log_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64> {
        check_max_clique(self.meta, lc)?;
        Ok(self
            .dataset
            .datum(position)
            .index_of(lc)
            .map_or(f64::NEG_INFINITY, |index| self.marginals[position][index]))
    }

    /// Clamps the given positions and reruns the forward pass; the ratio of the two
    /// partition functions is the probability of the clamped labels.
    fn log_prob_of_sequence(&self, labels: &[usize], positions: &[usize]) -> Result<f64> {
        let n = self.dataset.len();
        if labels.len() != n {
            return Err(CliqueError::invalid_argument(format!(
                "{} labels for a sequence of length {n}",
                labels.len()
            )));
        }
        if let Some(&p) = positions.iter().find(|&&p| p >= n) {
            return Err(CliqueError::invalid_argument(format!(
                "position {p} is outside a sequence of length {n}"
            )));
        }
        if positions.is_empty() {
            return Ok(0.0);
        }
        let mut clamped = vec![false; n];
        for &p in positions {
            clamped[p] = true;
        }
        let alphas = calculate_alphas(self.dataset, &self.factors, |p, lc| {
            !clamped[p] || lc.label_at(0) == Some(labels[p])
        });
        let log_z = alphas.last().map_or(0.0, |alpha| math::log_sum(alpha));
        Ok(log_z - self.log_z)
    }
}
