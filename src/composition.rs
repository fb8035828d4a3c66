//! Models and listeners assembled from smaller ones.
//!
//! A sequential composition lays sub-sequences end to end. Combined positions are
//! routed to the sub-model whose range holds them and re-based into its local
//! coordinates. Sub-models never see across their boundaries: outside its own
//! range, a sub-model reads its padding values.

use alloc::vec::Vec;

use crate::errors::{CliqueError, Result};
use crate::sequence::{SequenceListener, SequenceModel};

// Value of positions past the last sub-model; label 0 is the background label.
const BACKGROUND: [usize; 1] = [0];

// Maps an unpadded combined position to (part, local position).
fn route(ends: &[usize], position: usize) -> Option<(usize, usize)> {
    let part = ends.partition_point(|&end| end <= position);
    let end = *ends.get(part)?;
    let start = if part == 0 { 0 } else { ends[part - 1] };
    debug_assert!(position < end);
    Some((part, position - start))
}

fn cumulative(lengths: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let mut total = 0;
    lengths
        .into_iter()
        .map(|len| {
            total += len;
            total
        })
        .collect()
}

/// Concatenates sub-models into one sequence.
///
/// The combined left window is the first sub-model's and the right window is 0,
/// whatever the other sub-models use. Compose models with equal windows.
pub struct SequentialSequenceModel<M> {
    models: Vec<M>,
    ends: Vec<usize>,
}

impl<M> SequentialSequenceModel<M>
where
    M: SequenceModel,
{
    /// # Errors
    ///
    /// At least one sub-model is required.
    pub fn new(models: Vec<M>) -> Result<Self> {
        if models.is_empty() {
            return Err(CliqueError::invalid_argument(
                "a sequential model needs a sub-model",
            ));
        }
        let ends = cumulative(models.iter().map(SequenceModel::length));
        Ok(Self { models, ends })
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    /// Returns the sub-model holding the padded combined `position` and the padded
    /// local position inside it, or `None` for padding.
    pub fn route(&self, position: usize) -> Option<(usize, usize)> {
        let real = position.checked_sub(self.left_window())?;
        let (part, local) = route(&self.ends, real)?;
        Some((part, local + self.models[part].left_window()))
    }

    // Copies the combined labels of `part` into a padded buffer for that sub-model.
    fn local_buffer(&self, part: usize, sequence: &[usize]) -> Vec<usize> {
        let model = &self.models[part];
        let start = if part == 0 { 0 } else { self.ends[part - 1] };
        let offset = self.left_window() + start;
        (0..model.padded_length())
            .map(|q| match q.checked_sub(model.left_window()) {
                Some(r) if r < model.length() => sequence[offset + r],
                _ => model.possible_values(q)[0],
            })
            .collect()
    }
}

impl<M> SequenceModel for SequentialSequenceModel<M>
where
    M: SequenceModel,
{
    fn length(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn left_window(&self) -> usize {
        self.models[0].left_window()
    }

    fn right_window(&self) -> usize {
        0
    }

    fn possible_values(&self, position: usize) -> &[usize] {
        match self.route(position) {
            Some((part, local)) => self.models[part].possible_values(local),
            None if position < self.left_window() => self.models[0].possible_values(position),
            None => &BACKGROUND,
        }
    }

    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>> {
        match self.route(position) {
            Some((part, local)) => {
                let mut buffer = self.local_buffer(part, sequence);
                self.models[part].scores_of(&mut buffer, local)
            }
            None => Ok(vec![0.0; self.possible_values(position).len()]),
        }
    }

    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64> {
        match self.route(position) {
            Some((part, local)) => {
                let buffer = self.local_buffer(part, sequence);
                self.models[part].score_of(&buffer, local)
            }
            None => Ok(0.0),
        }
    }
}

/// Forwards updates of a combined sequence to the listener owning each range.
///
/// Each listener sees only its own unpadded slice of the combined sequence, with
/// positions counted from the start of that slice.
pub struct SequentialSequenceListener<L> {
    listeners: Vec<L>,
    ends: Vec<usize>,
    left_window: usize,
}

impl<L> SequentialSequenceListener<L>
where
    L: SequenceListener,
{
    /// Creates a listener over ranges of `lengths`, in a sequence padded by
    /// `left_window` on the left.
    ///
    /// # Errors
    ///
    /// Every listener needs exactly one length.
    pub fn new(listeners: Vec<L>, lengths: &[usize], left_window: usize) -> Result<Self> {
        if listeners.len() != lengths.len() {
            return Err(CliqueError::invalid_argument(format!(
                "{} listeners and {} lengths",
                listeners.len(),
                lengths.len()
            )));
        }
        Ok(Self {
            listeners,
            ends: cumulative(lengths.iter().copied()),
            left_window,
        })
    }

    pub fn listeners(&self) -> &[L] {
        &self.listeners
    }

    fn slice<'s>(&self, part: usize, sequence: &'s [usize]) -> &'s [usize] {
        let start = if part == 0 { 0 } else { self.ends[part - 1] };
        &sequence[self.left_window + start..self.left_window + self.ends[part]]
    }
}

impl<L> SequenceListener for SequentialSequenceListener<L>
where
    L: SequenceListener,
{
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        for part in 0..self.listeners.len() {
            let local = self.slice(part, sequence);
            self.listeners[part].set_initial_sequence(local);
        }
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_value: usize) {
        let Some(real) = position.checked_sub(self.left_window) else {
            return;
        };
        if let Some((part, local)) = route(&self.ends, real) {
            let slice = self.slice(part, sequence);
            self.listeners[part].update_sequence_element(slice, local, old_value);
        }
    }
}

/// Broadcasts every update, unchanged, to all listeners.
pub struct FactoredSequenceListener<L> {
    listeners: Vec<L>,
}

impl<L> FactoredSequenceListener<L> {
    pub fn new(listeners: Vec<L>) -> Self {
        Self { listeners }
    }

    pub fn listeners(&self) -> &[L] {
        &self.listeners
    }
}

impl<L> SequenceListener for FactoredSequenceListener<L>
where
    L: SequenceListener,
{
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        for listener in &mut self.listeners {
            listener.set_initial_sequence(sequence);
        }
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_value: usize) {
        for listener in &mut self.listeners {
            listener.update_sequence_element(sequence, position, old_value);
        }
    }
}

/// Several models over the same sequence, scored as a weighted sum.
///
/// Windows, length and possible values come from the first model.
pub struct FactoredSequenceModel<M> {
    models: Vec<M>,
    weights: Vec<f64>,
}

impl<M> FactoredSequenceModel<M>
where
    M: SequenceModel,
{
    /// # Errors
    ///
    /// Needs one weight per model, at least two models, and equal lengths.
    pub fn new(models: Vec<M>, weights: Vec<f64>) -> Result<Self> {
        if models.len() < 2 || models.len() != weights.len() {
            return Err(CliqueError::invalid_argument(
                "a factored model needs two or more models with one weight each",
            ));
        }
        let length = models[0].length();
        if models.iter().any(|m| m.length() != length) {
            return Err(CliqueError::invalid_argument(
                "factored models must cover the same sequence",
            ));
        }
        Ok(Self { models, weights })
    }
}

impl<M> SequenceModel for FactoredSequenceModel<M>
where
    M: SequenceModel,
{
    fn length(&self) -> usize {
        self.models[0].length()
    }

    fn left_window(&self) -> usize {
        self.models[0].left_window()
    }

    fn right_window(&self) -> usize {
        self.models[0].right_window()
    }

    fn possible_values(&self, position: usize) -> &[usize] {
        self.models[0].possible_values(position)
    }

    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>> {
        let mut total = vec![0.0; self.possible_values(position).len()];
        for (model, &weight) in self.models.iter().zip(&self.weights) {
            let scores = model.scores_of(sequence, position)?;
            if scores.len() != total.len() {
                return Err(CliqueError::invalid_argument(format!(
                    "factored models disagree on the labels of position {position}"
                )));
            }
            for (t, s) in total.iter_mut().zip(scores) {
                *t += weight * s;
            }
        }
        Ok(total)
    }

    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64> {
        let mut total = 0.0;
        for (model, &weight) in self.models.iter().zip(&self.weights) {
            total += weight * model.score_of(sequence, position)?;
        }
        Ok(total)
    }
}
