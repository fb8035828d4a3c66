//! Windowed scoring contract shared by decoders, samplers and composed models.
//!
//! Sequences handed to these traits are padded buffers: `left_window` background
//! entries, one entry per position, then `right_window` background entries. Every
//! `position` argument indexes that buffer.

use alloc::vec::Vec;

use crate::errors::Result;

/// A model that scores one position of a label sequence given its neighbors.
pub trait SequenceModel {
    /// Returns the number of real (unpadded) positions.
    fn length(&self) -> usize;

    /// Returns how many positions a score may look back.
    fn left_window(&self) -> usize;

    /// Returns how many positions a score may look ahead.
    fn right_window(&self) -> usize;

    /// Gets the labels `position` may take. Padding positions only take the
    /// background label.
    fn possible_values(&self, position: usize) -> &[usize];

    /// Scores every value of [`SequenceModel::possible_values`] at `position`, in
    /// that order.
    ///
    /// `sequence` may be overwritten at `position` while scoring but is restored
    /// before returning. The buffer must not be shared with another caller.
    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>>;

    /// Scores the value `sequence` holds at `position`.
    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64>;

    /// Sums [`SequenceModel::score_of`] over every real position.
    fn score_of_sequence(&self, sequence: &[usize]) -> Result<f64> {
        let left = self.left_window();
        let mut score = 0.0;
        for position in left..left + self.length() {
            score += self.score_of(sequence, position)?;
        }
        Ok(score)
    }

    /// Returns the length of the padded buffer this model expects.
    fn padded_length(&self) -> usize {
        self.left_window() + self.length() + self.right_window()
    }
}

impl<M> SequenceModel for &M
where
    M: SequenceModel + ?Sized,
{
    fn length(&self) -> usize {
        (**self).length()
    }

    fn left_window(&self) -> usize {
        (**self).left_window()
    }

    fn right_window(&self) -> usize {
        (**self).right_window()
    }

    fn possible_values(&self, position: usize) -> &[usize] {
        (**self).possible_values(position)
    }

    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>> {
        (**self).scores_of(sequence, position)
    }

    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64> {
        (**self).score_of(sequence, position)
    }
}

/// Observes a sequence that is being changed one position at a time.
pub trait SequenceListener {
    /// Receives the full padded sequence before any update.
    fn set_initial_sequence(&mut self, sequence: &[usize]);

    /// Called after `sequence[position]` changed from `old_value`.
    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_value: usize);
}

/// Finds a high-scoring label sequence under a [`SequenceModel`].
pub trait BestSequenceFinder {
    /// Returns a padded buffer of length [`SequenceModel::padded_length`].
    fn best_sequence(&mut self, model: &dyn SequenceModel) -> Result<Vec<usize>>;
}
