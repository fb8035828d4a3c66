use alloc::vec::Vec;

use bincode::{Decode, Encode};

use crate::clique::LabeledClique;
use crate::cmm::CliqueCmm;
use crate::crf::CliqueCrf;
use crate::dataset::CliqueDataset;
use crate::errors::{CliqueError, Result};
use crate::meta_info::DatasetMetaInfo;
use crate::queriable::{QueriableSequenceModel, SequenceModelAdapter};
use crate::sequence::BestSequenceFinder;

/// Selects how label sequences are normalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub enum ModelType {
    /// Conditional Markov model: normalized at every position.
    Cmm,

    /// Conditional random field: normalized over whole sequences.
    #[default]
    Crf,
}

/// A scorer of either [`ModelType`].
pub enum Scorer<'a> {
    /// Locally normalized.
    Cmm(CliqueCmm<'a>),

    /// Globally normalized.
    Crf(CliqueCrf<'a>),
}

impl<'a> Scorer<'a> {
    /// Creates a scorer bound to `weights`.
    ///
    /// # Errors
    ///
    /// Calibrating a CRF forwards feature lookup failures.
    pub fn new(
        model_type: ModelType,
        dataset: &'a CliqueDataset,
        meta: &'a DatasetMetaInfo,
        weights: &'a [f64],
    ) -> Result<Self> {
        Ok(match model_type {
            ModelType::Cmm => Self::Cmm(CliqueCmm::new(dataset, meta, weights)),
            ModelType::Crf => Self::Crf(CliqueCrf::new(dataset, meta, weights)?),
        })
    }
}

impl QueriableSequenceModel for Scorer<'_> {
    fn dataset(&self) -> &CliqueDataset {
        match self {
            Self::Cmm(m) => m.dataset(),
            Self::Crf(m) => m.dataset(),
        }
    }

    fn meta_info(&self) -> &DatasetMetaInfo {
        match self {
            Self::Cmm(m) => m.meta_info(),
            Self::Crf(m) => m.meta_info(),
        }
    }

    fn log_conditional_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64> {
        match self {
            Self::Cmm(m) => m.log_conditional_prob_of(position, lc),
            Self::Crf(m) => m.log_conditional_prob_of(position, lc),
        }
    }

    fn log_prob_of(&self, position: usize, lc: &LabeledClique) -> Result<f64> {
        match self {
            Self::Cmm(m) => m.log_prob_of(position, lc),
            Self::Crf(m) => m.log_prob_of(position, lc),
        }
    }

    fn log_prob_of_sequence(&self, labels: &[usize], positions: &[usize]) -> Result<f64> {
        match self {
            Self::Cmm(m) => m.log_prob_of_sequence(labels, positions),
            Self::Crf(m) => m.log_prob_of_sequence(labels, positions),
        }
    }
}

/// Represents a trained model
///
/// The model owns a copy of the [`DatasetMetaInfo`] it was trained with: windows,
/// labels, the feature index and the [`FeatureMap`](crate::FeatureMap). Build new
/// documents against [`Model::meta_info_mut`] so they receive the trained feature
/// IDs after the model is loaded.
#[derive(Clone, Debug, Encode, Decode)]
pub struct Model {
    model_type: ModelType,
    weights: Vec<f64>,
    meta: DatasetMetaInfo,
}

impl Model {
    /// Creates a new model.
    ///
    /// # Arguments
    ///
    /// * `model_type` - Normalization the weights were trained for.
    /// * `weights` - Weight of every feature ID.
    /// * `meta` - Meta info the feature IDs belong to.
    pub fn new(model_type: ModelType, weights: Vec<f64>, meta: DatasetMetaInfo) -> Self {
        Self {
            model_type,
            weights,
            meta,
        }
    }

    #[inline(always)]
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    #[inline(always)]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline(always)]
    pub fn labels(&self) -> &[String] {
        self.meta.labels()
    }

    /// Gets the name of a label index.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.meta.label(index)
    }

    #[inline(always)]
    pub fn meta_info(&self) -> &DatasetMetaInfo {
        &self.meta
    }

    /// Gets the meta info for building documents to tag.
    #[inline(always)]
    pub fn meta_info_mut(&mut self) -> &mut DatasetMetaInfo {
        &mut self.meta
    }

    /// Binds the weights to a dataset.
    ///
    /// # Errors
    ///
    /// See [`Scorer::new`].
    pub fn scorer<'a>(
        &'a self,
        dataset: &'a CliqueDataset,
        meta: &'a DatasetMetaInfo,
    ) -> Result<Scorer<'a>> {
        Scorer::new(self.model_type, dataset, meta, &self.weights)
    }

    /// Labels a dataset with `finder` and returns one label per position.
    ///
    /// # Errors
    ///
    /// `meta` must carry the label set the model was trained with. Scoring and
    /// decoding errors are forwarded.
    pub fn tag(
        &self,
        dataset: &CliqueDataset,
        meta: &DatasetMetaInfo,
        finder: &mut dyn BestSequenceFinder,
    ) -> Result<Vec<usize>> {
        if meta.labels() != self.labels() {
            return Err(CliqueError::invalid_argument(
                "the meta info does not carry the labels of the model",
            ));
        }
        let adapter = SequenceModelAdapter::new(self.scorer(dataset, meta)?);
        let sequence = finder.best_sequence(&adapter)?;
        let left = meta.left_window();
        Ok(sequence[left..left + dataset.len()].to_vec())
    }
}
