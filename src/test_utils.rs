use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::clique::{Clique, LabeledClique};
use crate::dataset::{
    CliqueDatasetBuilder, DatumType, MultiDocumentCliqueDataset, Observation, Position,
};
use crate::errors::Result;
use crate::meta_info::DatasetMetaInfo;
use crate::sequence::SequenceModel;

macro_rules! hashmap {
    ( $($k:expr => $v:expr,)* ) => {
        {
            #[allow(unused_mut)]
            let mut h = HashMap::new();
            $(
                h.insert($k, $v);
            )*
            h
        }
    };
    ( $($k:expr => $v:expr),* ) => {
        hashmap![$( $k => $v, )*]
    };
}

macro_rules! logsumexp {
    ( $($x:expr,)* ) => {
        {
            let mut y = f64::NEG_INFINITY;
            $(
                y = $crate::math::logsumexp(y, $x);
            )*
            y
        }
    };
    ( $($x:expr),* ) => {
        logsumexp!($( $x, )*)
    };
}

fn unary() -> Clique {
    Clique::window(0, 0)
}

fn position(observations: Vec<Observation>, candidates: &[usize], gold: usize) -> Position {
    Position {
        observations,
        candidates: candidates.to_vec(),
        gold,
    }
}

/// Labels: O (background), A, B. Window: one position back.
pub fn test_documents() -> Vec<Vec<Position>> {
    let trans = || Observation::new("trans", Clique::window(1, 0));
    vec![
        vec![
            position(
                vec![Observation::new("w=x", unary()), trans()],
                &[1, 2],
                1,
            ),
            position(
                vec![
                    Observation::new("w=y", unary()),
                    Observation::with_value("len", unary(), 0.5),
                    trans(),
                ],
                &[0, 1, 2],
                0,
            ),
            position(
                vec![
                    Observation::new("w=x", unary()),
                    Observation::with_value("len", unary(), 2.0),
                    trans(),
                ],
                &[1, 2],
                2,
            ),
        ],
        vec![
            position(vec![Observation::new("w=y", unary()), trans()], &[0, 1], 1),
            position(vec![Observation::new("w=x", unary()), trans()], &[2], 2),
        ],
    ]
}

pub fn test_meta_info() -> DatasetMetaInfo {
    let mut meta = DatasetMetaInfo::new(1, 0, "O");
    meta.add_label("A");
    meta.add_label("B");
    meta
}

pub fn generate_test_corpus_with(datum_type: DatumType) -> Result<MultiDocumentCliqueDataset> {
    let mut meta = test_meta_info();
    let mut documents = vec![];
    for positions in test_documents() {
        let doc = CliqueDatasetBuilder::new(&mut meta)
            .datum_type(datum_type)
            .build(&positions)?;
        documents.push(doc);
    }
    meta.freeze()?;
    Ok(MultiDocumentCliqueDataset::new(Arc::new(meta), documents))
}

pub fn test_weights(len: usize) -> Vec<f64> {
    (0..len).map(|i| ((i * 37 % 11) as f64 - 5.0) / 4.0).collect()
}

/// A two-document corpus with mixed boolean and real-valued features, plus
/// deterministic nonzero weights.
pub fn generate_test_corpus() -> (MultiDocumentCliqueDataset, Vec<f64>) {
    let corpus = generate_test_corpus_with(DatumType::Type2).unwrap();
    let weights = test_weights(corpus.meta_info().num_features());
    (corpus, weights)
}

/// One document of two positions over the labels {0, 1}, with a feature `f` that
/// fires at every position. Returns the ID of `f` conjoined with label 1.
pub fn generate_binary_corpus(left_window: usize) -> (MultiDocumentCliqueDataset, usize) {
    let mut meta = DatasetMetaInfo::new(left_window, 0, "0");
    meta.add_label("1");
    let mut observations = vec![Observation::new("f", unary())];
    if left_window > 0 {
        observations.push(Observation::new("t", Clique::window(left_window, 0)));
    }
    let positions = vec![
        position(observations.clone(), &[0, 1], 1),
        position(observations, &[0, 1], 0),
    ];
    let doc = CliqueDatasetBuilder::new(&mut meta).build(&positions).unwrap();
    let one = LabeledClique::new(unary(), &[1]).unwrap();
    let feature = meta.index_of_feature("f", &one).unwrap();
    meta.freeze().unwrap();
    (
        MultiDocumentCliqueDataset::new(Arc::new(meta), vec![doc]),
        feature,
    )
}

/// A hand-written model: a score table per position plus optional transition scores
/// between neighboring labels. Position `p` takes the labels `0..unary[p].len()`.
pub struct TableModel {
    left: usize,
    right: usize,
    unary: Vec<Vec<f64>>,
    transitions: Option<Vec<Vec<f64>>>,
    values: Vec<Vec<usize>>,
    background: [usize; 1],
}

impl TableModel {
    pub fn new(left: usize, right: usize, unary: Vec<Vec<f64>>) -> Self {
        let values = unary.iter().map(|row| (0..row.len()).collect()).collect();
        Self {
            left,
            right,
            unary,
            transitions: None,
            values,
            background: [0],
        }
    }

    /// Scores `transitions[prev][curr]` on top of the table; needs `left >= 1`.
    pub fn with_transitions(mut self, transitions: Vec<Vec<f64>>) -> Self {
        assert!(self.left >= 1);
        self.transitions = Some(transitions);
        self
    }
}

impl SequenceModel for TableModel {
    fn length(&self) -> usize {
        self.unary.len()
    }

    fn left_window(&self) -> usize {
        self.left
    }

    fn right_window(&self) -> usize {
        self.right
    }

    fn possible_values(&self, position: usize) -> &[usize] {
        match position.checked_sub(self.left) {
            Some(p) if p < self.unary.len() => &self.values[p],
            _ => &self.background,
        }
    }

    fn scores_of(&self, sequence: &mut [usize], position: usize) -> Result<Vec<f64>> {
        let original = sequence[position];
        let mut scores = vec![];
        for &value in self.possible_values(position) {
            sequence[position] = value;
            scores.push(self.score_of(sequence, position)?);
        }
        sequence[position] = original;
        Ok(scores)
    }

    fn score_of(&self, sequence: &[usize], position: usize) -> Result<f64> {
        let Some(p) = position.checked_sub(self.left).filter(|&p| p < self.unary.len()) else {
            return Ok(0.0);
        };
        let label = sequence[position];
        let mut score = self.unary[p][label];
        if let Some(transitions) = &self.transitions {
            score += transitions[sequence[position - 1]][label];
        }
        Ok(score)
    }
}

pub(crate) use hashmap;
pub(crate) use logsumexp;
