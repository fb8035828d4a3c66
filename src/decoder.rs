//! Label sequence decoders.

use core::str::FromStr;

use alloc::boxed::Box;
use alloc::vec::Vec;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::{CliqueError, Result};
use crate::math;
use crate::sequence::{BestSequenceFinder, SequenceModel};

// Starts every position at its first possible value.
fn initial_sequence(model: &dyn SequenceModel) -> Result<Vec<usize>> {
    (0..model.padded_length())
        .map(|position| {
            model.possible_values(position).first().copied().ok_or_else(|| {
                CliqueError::invalid_argument(format!("position {position} has no possible values"))
            })
        })
        .collect()
}

// Enumerates every assignment of the positions `from..=to`.
fn window_assignments(model: &dyn SequenceModel, from: usize, to: usize) -> Vec<Vec<usize>> {
    let values: Vec<&[usize]> = (from..=to).map(|p| model.possible_values(p)).collect();
    let mut assignments = vec![];
    let mut digits = vec![0; values.len()];
    loop {
        assignments.push(digits.iter().zip(&values).map(|(&d, v)| v[d]).collect());
        let mut i = digits.len();
        loop {
            if i == 0 {
                return assignments;
            }
            i -= 1;
            digits[i] += 1;
            if digits[i] < values[i].len() {
                break;
            }
            digits[i] = 0;
        }
    }
}

/// Forward sampler: visits positions left to right and draws each label from the
/// model's distribution given the labels decided so far.
///
/// Positions ahead of the current one still hold their first possible value, so
/// models that look ahead are sampled approximately.
pub struct SequenceSampler<R> {
    rng: R,
}

impl<R> SequenceSampler<R>
where
    R: Rng,
{
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl SequenceSampler<StdRng> {
    /// Creates a reproducible sampler.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R> BestSequenceFinder for SequenceSampler<R>
where
    R: Rng,
{
    fn best_sequence(&mut self, model: &dyn SequenceModel) -> Result<Vec<usize>> {
        let mut sequence = initial_sequence(model)?;
        let left = model.left_window();
        for position in left..left + model.length() {
            let mut dist = model.scores_of(&mut sequence, position)?;
            if !math::exp_normalize(&mut dist) {
                return Err(CliqueError::invalid_argument(format!(
                    "every label at position {position} has zero probability"
                )));
            }
            let index = math::sample_from_distribution(&dist, self.rng.gen::<f64>());
            sequence[position] = model.possible_values(position)[index];
        }
        Ok(sequence)
    }
}

/// Exact decoder: Viterbi over assignments of `left_window + right_window + 1`
/// consecutive positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactBestSequenceFinder;

impl ExactBestSequenceFinder {
    pub const fn new() -> Self {
        Self
    }
}

impl BestSequenceFinder for ExactBestSequenceFinder {
    fn best_sequence(&mut self, model: &dyn SequenceModel) -> Result<Vec<usize>> {
        let mut sequence = initial_sequence(model)?;
        let left = model.left_window();
        let right = model.right_window();
        let length = model.length();
        if length == 0 {
            return Ok(sequence);
        }

        // (windows, back pointers) per position
        let mut steps: Vec<(Vec<Vec<usize>>, Vec<usize>)> = Vec::with_capacity(length);
        let mut prev_scores: Vec<f64> = vec![];
        for (i, position) in (left..left + length).enumerate() {
            let windows = window_assignments(model, position - left, position + right);
            let mut scores = Vec::with_capacity(windows.len());
            let mut back = Vec::with_capacity(windows.len());
            {
                // Best predecessor per overlap with the current window.
                let mut best: HashMap<&[usize], (f64, usize)> = HashMap::new();
                if let Some((prev_windows, _)) = steps.last() {
                    for (j, w) in prev_windows.iter().enumerate() {
                        match best.entry(&w[1..]) {
                            Entry::Vacant(e) => {
                                e.insert((prev_scores[j], j));
                            }
                            Entry::Occupied(mut e) => {
                                if prev_scores[j] > e.get().0 {
                                    e.insert((prev_scores[j], j));
                                }
                            }
                        }
                    }
                }
                for w in &windows {
                    sequence[position - left..=position + right].copy_from_slice(w);
                    let local = model.score_of(&sequence, position)?;
                    if i == 0 {
                        scores.push(local);
                        back.push(usize::MAX);
                    } else if let Some(&(score, j)) = best.get(&w[..w.len() - 1]) {
                        scores.push(score + local);
                        back.push(j);
                    } else {
                        scores.push(f64::NEG_INFINITY);
                        back.push(usize::MAX);
                    }
                }
            }
            prev_scores = scores;
            steps.push((windows, back));
        }

        let mut j = 0;
        for (k, &score) in prev_scores.iter().enumerate() {
            if score > prev_scores[j] {
                j = k;
            }
        }
        if prev_scores[j] == f64::NEG_INFINITY {
            return Err(CliqueError::invalid_argument(
                "every label sequence has zero probability",
            ));
        }
        for (i, (windows, back)) in steps.iter().enumerate().rev() {
            let position = left + i;
            sequence[position - left..=position + right].copy_from_slice(&windows[j]);
            j = back[j];
        }
        Ok(sequence)
    }
}

/// Selects a decoder by name.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InferenceType {
    /// [`ExactBestSequenceFinder`]
    #[default]
    Viterbi,

    /// [`SequenceSampler`] seeded from the operating system.
    Sample,
}

impl InferenceType {
    pub fn finder(self) -> Box<dyn BestSequenceFinder> {
        match self {
            Self::Viterbi => Box::new(ExactBestSequenceFinder::new()),
            Self::Sample => Box::new(SequenceSampler::new(StdRng::from_entropy())),
        }
    }
}

impl FromStr for InferenceType {
    type Err = CliqueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viterbi" => Ok(Self::Viterbi),
            "sample" => Ok(Self::Sample),
            _ => Err(CliqueError::invalid_argument(format!(
                "unknown inference type: {s}"
            ))),
        }
    }
}

/// Returns the share of positions where `predicted` agrees with `gold`. An empty
/// sequence has accuracy 0.
///
/// # Errors
///
/// Both sequences must have the same length.
pub fn accuracy(gold: &[usize], predicted: &[usize]) -> Result<f64> {
    if gold.len() != predicted.len() {
        return Err(CliqueError::invalid_argument(format!(
            "{} gold labels and {} predicted labels",
            gold.len(),
            predicted.len()
        )));
    }
    if gold.is_empty() {
        return Ok(0.0);
    }
    let correct = gold.iter().zip(predicted).filter(|(g, p)| g == p).count();
    Ok(correct as f64 / gold.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::TableModel;

    fn random_table(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<Vec<f64>> {
        (0..rows)
            .map(|_| (0..cols).map(|_| rng.gen_range(-2.0..2.0)).collect())
            .collect()
    }

    fn brute_force_best(model: &TableModel) -> f64 {
        let left = model.left_window();
        let mut best = f64::NEG_INFINITY;
        let windows = window_assignments(model, left, left + model.length() - 1);
        let mut sequence = initial_sequence(model).unwrap();
        for w in windows {
            sequence[left..left + model.length()].copy_from_slice(&w);
            best = best.max(model.score_of_sequence(&sequence).unwrap());
        }
        best
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        for (left, right) in [(1, 0), (1, 1), (2, 1)] {
            for _ in 0..5 {
                let model = TableModel::new(left, right, random_table(&mut rng, 4, 3))
                    .with_transitions(random_table(&mut rng, 3, 3));
                let sequence = ExactBestSequenceFinder::new()
                    .best_sequence(&model)
                    .unwrap();
                assert_eq!(model.padded_length(), sequence.len());
                let score = model.score_of_sequence(&sequence).unwrap();
                assert!((score - brute_force_best(&model)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_viterbi_without_dependencies() {
        let model = TableModel::new(0, 0, vec![vec![0.0, 1.0], vec![2.0, -1.0, 0.5]]);
        let sequence = ExactBestSequenceFinder::new()
            .best_sequence(&model)
            .unwrap();
        assert_eq!(vec![1, 0], sequence);
    }

    #[test]
    fn test_sampler_validity() {
        let mut rng = StdRng::seed_from_u64(3);
        let unary = vec![vec![0.0], vec![0.3, -0.2, 1.0], vec![-1.0, 0.0], vec![0.5, 0.5, 0.5]];
        let model = TableModel::new(1, 1, unary).with_transitions(random_table(&mut rng, 3, 3));
        for seed in 0..50 {
            let sequence = SequenceSampler::seeded(seed).best_sequence(&model).unwrap();
            assert_eq!(model.padded_length(), sequence.len());
            for (position, label) in sequence.iter().enumerate() {
                assert!(model.possible_values(position).contains(label));
            }
        }
    }

    #[test]
    fn test_sampler_skips_impossible_labels() {
        let model = TableModel::new(0, 0, vec![vec![f64::NEG_INFINITY, 0.0, -0.5]; 3]);
        let mut sampler = SequenceSampler::new(StdRng::seed_from_u64(11));
        for _ in 0..20 {
            let sequence = sampler.best_sequence(&model).unwrap();
            assert!(sequence.iter().all(|&label| label != 0));
        }

        let model = TableModel::new(0, 0, vec![vec![f64::NEG_INFINITY; 2]]);
        assert!(matches!(
            sampler.best_sequence(&model),
            Err(CliqueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_inference_type() {
        assert_eq!(InferenceType::Viterbi, "viterbi".parse().unwrap());
        assert_eq!(InferenceType::Sample, "sample".parse().unwrap());
        assert!("beam".parse::<InferenceType>().is_err());

        let model = TableModel::new(0, 0, vec![vec![0.0, 3.0]]);
        let sequence = InferenceType::default()
            .finder()
            .best_sequence(&model)
            .unwrap();
        assert_eq!(vec![1], sequence);
    }

    #[test]
    fn test_accuracy() {
        assert!((accuracy(&[1, 2, 0, 1], &[1, 0, 0, 1]).unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(0.0, accuracy(&[], &[]).unwrap());
        assert!(accuracy(&[1], &[1, 2]).is_err());
    }
}
