use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::clique::{Clique, LabeledClique};
use crate::datum::{CliqueDatum, Type1Datum, Type2Datum};
use crate::errors::{CliqueError, Result};
use crate::features::Features;
use crate::meta_info::DatasetMetaInfo;

/// A named observation made at one position by an external feature extractor.
///
/// The observation is conjoined with the labels of `clique` to become a feature.
#[derive(Clone, Debug)]
pub struct Observation {
    name: String,
    clique: Clique,
    value: Option<f64>,
}

impl Observation {
    /// Creates a boolean observation.
    pub fn new(name: impl Into<String>, clique: Clique) -> Self {
        Self {
            name: name.into(),
            clique,
            value: None,
        }
    }

    /// Creates a real-valued observation.
    pub fn with_value(name: impl Into<String>, clique: Clique, value: f64) -> Self {
        Self {
            name: name.into(),
            clique,
            value: Some(value),
        }
    }
}

/// Everything the builder consumes about one position.
#[derive(Clone, Debug)]
pub struct Position {
    /// Observations made at this position.
    pub observations: Vec<Observation>,

    /// Labels this position may take.
    pub candidates: Vec<usize>,

    /// The correct label.
    pub gold: usize,
}

/// Storage strategy of the datums built by [`CliqueDatasetBuilder`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DatumType {
    /// One feature array per position, others derived on access.
    Type1,

    /// One feature array per labeled clique.
    #[default]
    Type2,
}

/// One sequence ready for scoring.
#[derive(Clone, Debug)]
pub struct CliqueDataset {
    datums: Vec<CliqueDatum>,
    gold_cliques: Vec<LabeledClique>,
    labels: Vec<usize>,
    possible_labels: Vec<Vec<usize>>,
}

impl CliqueDataset {
    /// Creates a new dataset from prebuilt datums.
    ///
    /// # Errors
    ///
    /// The arrays must have one entry per position, and each gold clique must be a
    /// key of its datum.
    pub fn new(
        datums: Vec<CliqueDatum>,
        gold_cliques: Vec<LabeledClique>,
        possible_labels: Vec<Vec<usize>>,
    ) -> Result<Self> {
        if datums.len() != gold_cliques.len() || datums.len() != possible_labels.len() {
            return Err(CliqueError::invalid_argument(format!(
                "{} datums, {} gold cliques and {} candidate sets",
                datums.len(),
                gold_cliques.len(),
                possible_labels.len()
            )));
        }
        let mut labels = Vec::with_capacity(gold_cliques.len());
        for (position, (datum, gold)) in datums.iter().zip(&gold_cliques).enumerate() {
            if !datum.contains(gold) {
                return Err(CliqueError::invalid_argument(format!(
                    "gold clique {gold} is not a candidate at position {position}"
                )));
            }
            let label = gold.label_at(0).ok_or_else(|| {
                CliqueError::invalid_argument(format!("gold clique {gold} has no offset 0"))
            })?;
            labels.push(label);
        }
        Ok(Self {
            datums,
            gold_cliques,
            labels,
            possible_labels,
        })
    }

    /// Returns the number of positions.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.datums.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }

    #[inline(always)]
    pub fn datum(&self, position: usize) -> &CliqueDatum {
        &self.datums[position]
    }

    #[inline(always)]
    pub fn datums(&self) -> &[CliqueDatum] {
        &self.datums
    }

    /// Gets the gold assignment of the maximum clique at `position`.
    #[inline(always)]
    pub fn gold_clique(&self, position: usize) -> &LabeledClique {
        &self.gold_cliques[position]
    }

    /// Gets the gold label of every position.
    #[inline(always)]
    pub fn gold_labels(&self) -> &[usize] {
        &self.labels
    }

    /// Gets the labels `position` may take.
    #[inline(always)]
    pub fn possible_labels(&self, position: usize) -> &[usize] {
        &self.possible_labels[position]
    }

    /// Lists the assignments that agree with `lc` everywhere but offset 0.
    ///
    /// The label at offset 0 ranges over the candidates of `position`; assignments
    /// that the datum does not hold are skipped.
    ///
    /// # Errors
    ///
    /// `lc` must contain offset 0.
    pub fn max_clique_conditional_labels(
        &self,
        position: usize,
        lc: &LabeledClique,
    ) -> Result<Vec<LabeledClique>> {
        let datum = &self.datums[position];
        let mut result = Vec::with_capacity(self.possible_labels[position].len());
        for &label in &self.possible_labels[position] {
            let candidate = lc.with_label_at(0, label)?;
            if datum.contains(&candidate) {
                result.push(candidate);
            }
        }
        Ok(result)
    }

    pub(crate) fn materialize(&mut self, meta: &DatasetMetaInfo) -> Result<()> {
        for datum in &mut self.datums {
            datum.materialize(meta)?;
        }
        Ok(())
    }

    pub(crate) fn retain_features(
        &mut self,
        mapping: &[Option<usize>],
        meta: &DatasetMetaInfo,
    ) -> Result<()> {
        for datum in &mut self.datums {
            datum.retain_features(mapping, meta)?;
        }
        Ok(())
    }
}

/// Turns externally extracted observations into a [`CliqueDataset`].
///
/// Feature IDs are registered in the meta info while building, so every document of
/// a corpus must be built against the same [`DatasetMetaInfo`].
pub struct CliqueDatasetBuilder<'a> {
    meta: &'a mut DatasetMetaInfo,
    datum_type: DatumType,
}

impl<'a> CliqueDatasetBuilder<'a> {
    /// Creates a new builder.
    pub fn new(meta: &'a mut DatasetMetaInfo) -> Self {
        Self {
            meta,
            datum_type: DatumType::default(),
        }
    }

    /// Chooses the datum storage strategy.
    pub fn datum_type(mut self, datum_type: DatumType) -> Self {
        self.datum_type = datum_type;
        self
    }

    /// Builds one sequence.
    ///
    /// Candidate assignments of the maximum clique are every combination of the
    /// candidate labels at its offsets; offsets outside the sequence take the
    /// background label.
    ///
    /// # Errors
    ///
    /// Every position needs at least one known candidate label and its gold label
    /// must be a candidate. Observation cliques must fit in the maximum clique.
    pub fn build(&mut self, positions: &[Position]) -> Result<CliqueDataset> {
        if positions.is_empty() {
            return Err(CliqueError::invalid_argument("a sequence must not be empty"));
        }
        let num_labels = self.meta.num_labels();
        for (i, position) in positions.iter().enumerate() {
            if position.candidates.is_empty() {
                return Err(CliqueError::invalid_argument(format!(
                    "position {i} has no candidate labels"
                )));
            }
            if let Some(&label) = position.candidates.iter().find(|&&l| l >= num_labels) {
                return Err(CliqueError::invalid_argument(format!(
                    "unknown label {label} at position {i}"
                )));
            }
            if !position.candidates.contains(&position.gold) {
                return Err(CliqueError::invalid_argument(format!(
                    "gold label {} is not a candidate at position {i}",
                    position.gold
                )));
            }
        }

        let mut datums = Vec::with_capacity(positions.len());
        let mut gold_cliques = Vec::with_capacity(positions.len());
        for i in 0..positions.len() {
            let candidates = self.candidate_assignments(positions, i)?;
            let gold = self.gold_assignment(positions, i)?;
            datums.push(self.build_datum(&positions[i].observations, candidates)?);
            gold_cliques.push(gold);
        }
        let possible_labels = positions.iter().map(|p| p.candidates.clone()).collect();
        CliqueDataset::new(datums, gold_cliques, possible_labels)
    }

    // Index of `i + offset` if it lies inside the sequence.
    fn index_at(positions: &[Position], i: usize, offset: isize) -> Option<usize> {
        i.checked_add_signed(offset).filter(|&j| j < positions.len())
    }

    fn candidate_assignments(
        &self,
        positions: &[Position],
        i: usize,
    ) -> Result<Vec<LabeledClique>> {
        let max_clique = self.meta.max_clique();
        let background = [self.meta.background_index()];
        let choices: Vec<&[usize]> = max_clique
            .offsets()
            .iter()
            .map(|&offset| match Self::index_at(positions, i, offset) {
                Some(j) => &positions[j].candidates[..],
                None => &background[..],
            })
            .collect();

        let mut result = vec![];
        let mut digits = vec![0; choices.len()];
        let mut labels = vec![0; choices.len()];
        'outer: loop {
            for (k, &d) in digits.iter().enumerate() {
                labels[k] = choices[k][d];
            }
            result.push(LabeledClique::new(max_clique.clone(), &labels)?);
            for k in (0..digits.len()).rev() {
                digits[k] += 1;
                if digits[k] < choices[k].len() {
                    continue 'outer;
                }
                digits[k] = 0;
            }
            break;
        }
        Ok(result)
    }

    fn gold_assignment(&self, positions: &[Position], i: usize) -> Result<LabeledClique> {
        let max_clique = self.meta.max_clique();
        let labels: Vec<usize> = max_clique
            .offsets()
            .iter()
            .map(|&offset| {
                Self::index_at(positions, i, offset)
                    .map_or(self.meta.background_index(), |j| positions[j].gold)
            })
            .collect();
        LabeledClique::new(max_clique.clone(), &labels)
    }

    // `None` for an observation whose feature under `lc` was pruned.
    fn feature_ids(
        &self,
        observations: &[Observation],
        lc: &LabeledClique,
    ) -> Result<Vec<Option<usize>>> {
        let mut ids = Vec::with_capacity(observations.len());
        for observation in observations {
            let restricted = lc.restrict(&observation.clique)?;
            ids.push(self.meta.live_feature(&observation.name, restricted));
        }
        Ok(ids)
    }

    fn features(ids: &[Option<usize>], values: &Option<Arc<[f64]>>) -> Result<Features> {
        if ids.iter().all(Option::is_some) {
            let ids: Vec<usize> = ids.iter().flatten().copied().collect();
            return Features::new(ids, values.clone());
        }
        let kept: Vec<usize> = ids.iter().flatten().copied().collect();
        let values = values.as_ref().map(|values| {
            ids.iter()
                .zip(values.iter())
                .filter_map(|(id, &v)| id.map(|_| v))
                .collect::<Vec<f64>>()
                .into()
        });
        Features::new(kept, values)
    }

    fn build_datum(
        &mut self,
        observations: &[Observation],
        candidates: Vec<LabeledClique>,
    ) -> Result<CliqueDatum> {
        let values: Option<Arc<[f64]>> = observations
            .iter()
            .any(|o| o.value.is_some())
            .then(|| observations.iter().map(|o| o.value.unwrap_or(1.0)).collect());

        if self.datum_type == DatumType::Type1 {
            let origin = candidates
                .first()
                .ok_or_else(|| CliqueError::invalid_argument("no candidate assignment"))?;
            let origin_ids = self.feature_ids(observations, origin)?;
            // Counterparts of a pruned origin feature cannot be derived.
            if let Some(origin_ids) = origin_ids.into_iter().collect::<Option<Vec<usize>>>() {
                return self.build_type1(observations, candidates, origin_ids, values);
            }
            log::debug!("storing a position with pruned origin features as Type-2");
        }
        let mut datum = Type2Datum::new();
        for lc in candidates {
            let ids = self.feature_ids(observations, &lc)?;
            datum.set(lc, Self::features(&ids, &values)?)?;
        }
        Ok(datum.into())
    }

    fn build_type1(
        &mut self,
        observations: &[Observation],
        candidates: Vec<LabeledClique>,
        origin_ids: Vec<usize>,
        values: Option<Arc<[f64]>>,
    ) -> Result<CliqueDatum> {
        let mut candidates = candidates.into_iter();
        let origin = candidates
            .next()
            .ok_or_else(|| CliqueError::invalid_argument("no candidate assignment"))?;
        // A frozen map completes these pairs itself.
        let record = !self.meta.is_frozen();
        if record {
            for &id in &origin_ids {
                self.meta.record_equivalent(id, origin.clone(), id)?;
            }
        }
        let mut datum = Type1Datum::new(origin, Features::new(origin_ids.clone(), values)?);
        for lc in candidates {
            if record {
                let ids = self.feature_ids(observations, &lc)?;
                for (&orig, &new) in origin_ids.iter().zip(&ids) {
                    match new {
                        Some(new) => self.meta.record_equivalent(orig, lc.clone(), new)?,
                        None => self.meta.record_pruned(orig, lc.clone())?,
                    }
                }
            }
            datum.add_labeled_clique(lc);
        }
        Ok(datum.into())
    }
}

/// A corpus of sequences sharing one [`DatasetMetaInfo`].
#[derive(Clone, Debug)]
pub struct MultiDocumentCliqueDataset {
    meta: Arc<DatasetMetaInfo>,
    documents: Vec<CliqueDataset>,
}

impl MultiDocumentCliqueDataset {
    /// Creates a new corpus.
    pub fn new(meta: Arc<DatasetMetaInfo>, documents: Vec<CliqueDataset>) -> Self {
        Self { meta, documents }
    }

    #[inline(always)]
    pub fn meta_info(&self) -> &Arc<DatasetMetaInfo> {
        &self.meta
    }

    #[inline(always)]
    pub fn documents(&self) -> &[CliqueDataset] {
        &self.documents
    }

    #[inline(always)]
    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    /// Returns the total number of positions.
    pub fn num_datums(&self) -> usize {
        self.documents.iter().map(CliqueDataset::len).sum()
    }

    /// Sums the feature values of every gold assignment.
    ///
    /// # Errors
    ///
    /// Forwards feature lookup failures of Type-1 datums.
    pub fn empirical_counts(&self) -> Result<Vec<f64>> {
        let mut counts = vec![0.0; self.meta.num_features()];
        for doc in &self.documents {
            for (position, datum) in doc.datums().iter().enumerate() {
                let features = datum
                    .features(doc.gold_clique(position), &self.meta)?
                    .ok_or_else(|| CliqueError::lookup_miss("gold clique without features"))?;
                for (fid, value) in features.iter() {
                    if fid >= counts.len() {
                        counts.resize(fid + 1, 0.0);
                    }
                    counts[fid] += value;
                }
            }
        }
        Ok(counts)
    }

    /// Logs corpus statistics at info level.
    pub fn log_stats(&self) {
        let num_cliques: usize = self
            .documents
            .iter()
            .flat_map(|doc| doc.datums())
            .map(CliqueDatum::len)
            .sum();
        log::info!(
            "corpus: {} documents, {} positions, {} labeled cliques, {} labels, {} features",
            self.num_documents(),
            self.num_datums(),
            num_cliques,
            self.meta.num_labels(),
            self.meta.num_features(),
        );
    }

    /// Keeps the features with `keep[id] == true`, renumbers them densely and
    /// rewrites every document. Returns the old-to-new ID mapping.
    ///
    /// # Errors
    ///
    /// The corpus must hold the only reference to its meta info.
    pub(crate) fn keep_features(&mut self, keep: &[bool]) -> Result<Vec<Option<usize>>> {
        let meta = Arc::get_mut(&mut self.meta).ok_or_else(|| {
            CliqueError::invalid_argument("the meta info is shared with another corpus")
        })?;
        // Type-1 datums read the feature map before it is renumbered. A frozen map
        // may register features while they are materialized.
        for doc in &mut self.documents {
            doc.materialize(meta)?;
        }
        // Same numbering as `DatasetMetaInfo::keep_features`.
        let mut next = 0;
        let mapping: Vec<Option<usize>> = (0..meta.num_features())
            .map(|id| {
                keep.get(id).copied().unwrap_or(false).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        for doc in &mut self.documents {
            doc.retain_features(&mapping, meta)?;
        }
        let applied = meta.keep_features(keep);
        debug_assert_eq!(mapping, applied);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unary() -> Clique {
        Clique::new(&[0]).unwrap()
    }

    fn positions() -> Vec<Position> {
        vec![
            Position {
                observations: vec![
                    Observation::new("w=a", unary()),
                    Observation::new("bias", Clique::window(1, 0)),
                ],
                candidates: vec![1, 2],
                gold: 1,
            },
            Position {
                observations: vec![
                    Observation::with_value("len", unary(), 3.0),
                    Observation::new("bias", Clique::window(1, 0)),
                ],
                candidates: vec![1, 2],
                gold: 2,
            },
        ]
    }

    fn meta() -> DatasetMetaInfo {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        meta.add_label("A");
        meta.add_label("B");
        meta
    }

    #[test]
    fn test_candidates_pad_with_background() {
        let mut meta = meta();
        let doc = CliqueDatasetBuilder::new(&mut meta)
            .build(&positions())
            .unwrap();
        assert_eq!(2, doc.len());
        assert_eq!(&[1, 2], doc.gold_labels());

        // Position 0 looks back into padding.
        let lcs: Vec<&[usize]> = doc.datum(0).labeled_cliques().iter().map(|lc| lc.labels()).collect();
        assert_eq!(vec![&[0, 1][..], &[0, 2][..]], lcs);
        assert_eq!(4, doc.datum(1).len());
        assert_eq!(&[1, 2], doc.gold_clique(1).labels());
    }

    #[test]
    fn test_conditional_labels() {
        let mut meta = meta();
        let doc = CliqueDatasetBuilder::new(&mut meta)
            .build(&positions())
            .unwrap();
        let lc = LabeledClique::new(Clique::window(1, 0), &[2, 1]).unwrap();
        let cond = doc.max_clique_conditional_labels(1, &lc).unwrap();
        let labels: Vec<&[usize]> = cond.iter().map(|lc| lc.labels()).collect();
        assert_eq!(vec![&[2, 1][..], &[2, 2][..]], labels);
    }

    #[test]
    fn test_both_datum_types_agree() {
        let mut meta1 = meta();
        let doc1 = CliqueDatasetBuilder::new(&mut meta1)
            .datum_type(DatumType::Type1)
            .build(&positions())
            .unwrap();
        let mut meta2 = meta();
        let doc2 = CliqueDatasetBuilder::new(&mut meta2)
            .datum_type(DatumType::Type2)
            .build(&positions())
            .unwrap();
        for position in 0..doc1.len() {
            for lc in doc1.datum(position).labeled_cliques() {
                let f1 = doc1.datum(position).features(lc, &meta1).unwrap().unwrap();
                let f2 = doc2.datum(position).features(lc, &meta2).unwrap().unwrap();
                assert_eq!(f1.indices(), f2.indices());
                assert_eq!(f1.values(), f2.values());
            }
        }
    }

    #[test]
    fn test_gold_must_be_candidate() {
        let mut meta = meta();
        let mut input = positions();
        input[0].gold = 0;
        assert!(CliqueDatasetBuilder::new(&mut meta).build(&input).is_err());
        assert!(CliqueDatasetBuilder::new(&mut meta).build(&[]).is_err());
    }

    #[test]
    fn test_empirical_counts() {
        let mut meta = meta();
        let doc = CliqueDatasetBuilder::new(&mut meta)
            .build(&positions())
            .unwrap();
        let meta = Arc::new(meta);
        let corpus = MultiDocumentCliqueDataset::new(meta.clone(), vec![doc]);
        assert_eq!(1, corpus.num_documents());
        assert_eq!(2, corpus.num_datums());

        let counts = corpus.empirical_counts().unwrap();
        let u = |l| LabeledClique::new(unary(), &[l]).unwrap();
        let p = |a, b| LabeledClique::new(Clique::window(1, 0), &[a, b]).unwrap();
        let len = meta.index_of_feature("len", &u(2)).unwrap();
        assert_eq!(3.0, counts[len]);
        let bias = meta.index_of_feature("bias", &p(0, 1)).unwrap();
        assert_eq!(1.0, counts[bias]);
        let unused = meta.index_of_feature("w=a", &u(2)).unwrap();
        assert_eq!(0.0, counts[unused]);
    }
}
