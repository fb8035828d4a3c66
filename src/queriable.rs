use alloc::vec::Vec;
use core::cell::RefCell;

use hashbrown::HashMap;

use crate::clique::LabeledClique;
use crate::dataset::CliqueDataset;
use crate::errors::{CliqueError, Result};
use crate::math;
use crate::meta_info::DatasetMetaInfo;
use crate::sequence::SequenceModel;

/// A clique-factored scorer bound to one dataset and one weight vector.
///
/// `position` arguments index the dataset (no padding). `labels` arguments hold one
/// label per dataset position.
pub trait QueriableSequenceModel {
    fn dataset(&self) -> &CliqueDataset;

    fn meta_info(&self) -> &DatasetMetaInfo;

    /// Computes log P(label at offset 0 | labels at the other offsets of `lc`).
    ///
    /// Returns negative infinity if `lc` is not a candidate at `position`.
    ///
    /// # Errors
    ///
    /// `lc` must be an assignment of the maximum clique.
    fn log_conditional_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64>;

    /// Computes the marginal log-probability of `lc` at `position`.
    fn log_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64>;

    /// Computes the joint log-probability of `labels` at the sorted `positions`.
    fn log_prob_of_sequence(&self, labels: &[usize], positions: &[usize]) -> Result<f64>;

    /// Computes log P(labels at `positions` | labels at `condition_on`).
    ///
    /// Both position lists must be sorted ascending; they may overlap.
    fn log_conditional_prob_of_sequence(
        &self,
        labels: &[usize],
        positions: &[usize],
        condition_on: &[usize],
    ) -> Result<f64> {
        let union = merge_sorted(positions, condition_on);
        Ok(self.log_prob_of_sequence(labels, &union)?
            - self.log_prob_of_sequence(labels, condition_on)?)
    }
}

/// Merges two ascending lists into one ascending list without duplicates.
pub fn merge_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut result = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let next = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) if x < y => {
                i += 1;
                x
            }
            (Some(&x), Some(&y)) if y < x => {
                j += 1;
                y
            }
            (Some(&x), Some(_)) => {
                i += 1;
                j += 1;
                x
            }
            (Some(&x), None) => {
                i += 1;
                x
            }
            (None, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        if result.last() != Some(&next) {
            result.push(next);
        }
    }
    result
}

/// Normalizes log-scores within groups of assignments that differ only at offset 0.
pub(crate) fn normalize_conditionally(keys: &[LabeledClique], scores: &[f64]) -> Result<Vec<f64>> {
    let mut groups: HashMap<LabeledClique, Vec<usize>> = HashMap::new();
    for (i, lc) in keys.iter().enumerate() {
        groups.entry(lc.with_label_at(0, 0)?).or_default().push(i);
    }
    let mut result = vec![f64::NEG_INFINITY; keys.len()];
    let mut buf = vec![];
    for members in groups.values() {
        buf.clear();
        buf.extend(members.iter().map(|&i| scores[i]));
        let z = math::log_sum(&buf);
        for &i in members {
            result[i] = scores[i] - z;
        }
    }
    Ok(result)
}

/// Per-position memo of conditional log-probabilities, indexed like the datum keys.
///
/// `None` marks a position not computed yet.
#[derive(Debug)]
pub(crate) struct ConditionalCache {
    positions: RefCell<Vec<Option<Vec<f64>>>>,
}

impl ConditionalCache {
    pub fn new(len: usize) -> Self {
        Self {
            positions: RefCell::new(vec![None; len]),
        }
    }

    /// Returns entry `index` of `position`, computing the whole position on a miss.
    pub fn get_or_compute<F>(&self, position: usize, index: usize, compute: F) -> Result<f64>
    where
        F: FnOnce() -> Result<Vec<f64>>,
    {
        if let Some(Some(values)) = self.positions.borrow().get(position) {
            return Ok(values[index]);
        }
        let values = compute()?;
        let value = values[index];
        let mut positions = self.positions.borrow_mut();
        if let Some(slot) = positions.get_mut(position) {
            *slot = Some(values);
        }
        Ok(value)
    }
}

/// Checks that `lc` is phrased over the maximum clique.
pub(crate) fn check_max_clique(meta: &DatasetMetaInfo, lc: &LabeledClique) -> Result<()> {
    if lc.clique() != meta.max_clique() {
        return Err(CliqueError::invalid_argument(format!(
            "{lc} is not an assignment of the maximum clique {}",
            meta.max_clique()
        )));
    }
    Ok(())
}

/// Exposes a [`QueriableSequenceModel`] as a windowed [`SequenceModel`].
///
/// The score of a position is its conditional log-probability given the labels
/// around it.
pub struct SequenceModelAdapter<M> {
    model: M,
    background: [usize; 1],
}

impl<M> SequenceModelAdapter<M>
where
    M: QueriableSequenceModel,
{
    /// Creates a new adapter.
    pub fn new(model: M) -> Self {
        let background = [model.meta_info().background_index()];
        Self { model, background }
    }

    #[inline(always)]
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }

    // Dataset position of a buffer position, `None` for padding.
    fn dataset_position(&self, position: usize) -> Option<usize> {
        position
            .checked_sub(self.left_window())
            .filter(|&p| p < self.length())
    }
}

impl<M> SequenceModel for SequenceModelAdapter<M>
where
    M: QueriableSequenceModel,
{
    fn length(&self) -> usize {
        self.model.dataset().len()
    }

    fn left_window(&self) -> usize {
        self.model.meta_info().left_window()
    }

    fn right_window(&self) -> usize {
        self.model.meta_info().right_window()
    }

    fn possible_values(&self, position: usize) -> &[usize] {
        match self.dataset_position(position) {
            Some(p) => self.model.dataset().possible_labels(p),
            None => &self.background,
        }
    }

    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>> {
        let Some(p) = self.dataset_position(position) else {
            return Ok(vec![0.0]);
        };
        let max_clique = self.model.meta_info().max_clique();
        let original = sequence[position];
        let mut scores = Vec::with_capacity(self.model.dataset().possible_labels(p).len());
        let mut result = Ok(());
        for &label in self.model.dataset().possible_labels(p) {
            sequence[position] = label;
            match LabeledClique::value_of(max_clique, sequence, position)
                .and_then(|lc| self.model.log_conditional_prob_of(p, &lc))
            {
                Ok(score) => scores.push(score),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        sequence[position] = original;
        result.map(|()| scores)
    }

    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64> {
        let Some(p) = self.dataset_position(position) else {
            return Ok(0.0);
        };
        let lc = LabeledClique::value_of(self.model.meta_info().max_clique(), sequence, position)?;
        self.model.log_conditional_prob_of(p, &lc)
    }
}
