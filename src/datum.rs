//! Per-position storage of the features of every candidate labeled clique.

use alloc::borrow::Cow;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::clique::LabeledClique;
use crate::errors::{CliqueError, Result};
use crate::features::Features;
use crate::meta_info::DatasetMetaInfo;

/// Insertion-ordered set of labeled cliques.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CliqueIndex {
    keys: Vec<LabeledClique>,
    index: HashMap<LabeledClique, usize>,
}

impl CliqueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `lc` if new and returns its index.
    pub fn add(&mut self, lc: LabeledClique) -> usize {
        if let Some(&i) = self.index.get(&lc) {
            return i;
        }
        let i = self.keys.len();
        self.keys.push(lc.clone());
        self.index.insert(lc, i);
        i
    }

    #[inline(always)]
    pub fn index_of(&self, lc: &LabeledClique) -> Option<usize> {
        self.index.get(lc).copied()
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> Option<&LabeledClique> {
        self.keys.get(i)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[LabeledClique] {
        &self.keys
    }
}

/// Stores one origin feature array and derives the others through the feature map.
///
/// Smallest footprint; every access to a non-origin key remaps the whole array.
#[derive(Clone, Debug)]
pub struct Type1Datum {
    keys: CliqueIndex,
    origin: LabeledClique,
    features: Features,
}

impl Type1Datum {
    /// Creates a new datum whose only key is `origin`.
    pub fn new(origin: LabeledClique, features: Features) -> Self {
        let mut keys = CliqueIndex::new();
        keys.add(origin.clone());
        Self {
            keys,
            origin,
            features,
        }
    }

    /// Adds a key whose features are derived from the origin on access.
    pub fn add_labeled_clique(&mut self, lc: LabeledClique) {
        self.keys.add(lc);
    }

    #[inline(always)]
    pub fn origin(&self) -> &LabeledClique {
        &self.origin
    }

    // Counterparts removed by pruning are skipped.
    fn features_of(&self, lc: &LabeledClique, meta: &DatasetMetaInfo) -> Result<Cow<'_, Features>> {
        if *lc == self.origin {
            return Ok(Cow::Borrowed(&self.features));
        }
        let indices = meta.remap_features(self.features.indices(), lc)?;
        Ok(Cow::Owned(self.features.remap_partial(&indices)?))
    }

    // Stores every key explicitly.
    fn to_type2(&self, meta: &DatasetMetaInfo) -> Result<Type2Datum> {
        let mut datum = Type2Datum::new();
        for lc in self.keys.as_slice() {
            let features = self.features_of(lc, meta)?.into_owned();
            datum.set(lc.clone(), features)?;
        }
        Ok(datum)
    }
}

/// Stores the features of every key.
///
/// Faster to read than [`Type1Datum`]. A value array equal to the one stored just
/// before it is shared instead of kept twice.
#[derive(Clone, Debug, Default)]
pub struct Type2Datum {
    keys: CliqueIndex,
    features: Vec<Features>,
}

impl Type2Datum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the features of `lc`.
    ///
    /// # Errors
    ///
    /// Features of a key cannot be replaced once set.
    pub fn set(&mut self, lc: LabeledClique, mut features: Features) -> Result<()> {
        if self.keys.index_of(&lc).is_some() {
            return Err(CliqueError::invalid_argument(format!(
                "features of {lc} are already set"
            )));
        }
        if let (Some(prev), Some(curr)) = (
            self.features.last().and_then(Features::values),
            features.values(),
        ) {
            if !Arc::ptr_eq(prev, curr) && prev[..] == curr[..] {
                let prev = prev.clone();
                features.share_values(&prev);
            }
        }
        self.keys.add(lc);
        self.features.push(features);
        Ok(())
    }
}

/// Features of every candidate labeled clique at one position.
#[derive(Clone, Debug)]
pub enum CliqueDatum {
    /// Memory-optimal storage; see [`Type1Datum`].
    Type1(Type1Datum),

    /// Time-optimal storage; see [`Type2Datum`].
    Type2(Type2Datum),
}

impl CliqueDatum {
    #[inline(always)]
    fn keys(&self) -> &CliqueIndex {
        match self {
            Self::Type1(d) => &d.keys,
            Self::Type2(d) => &d.keys,
        }
    }

    /// Gets the labeled cliques in insertion order.
    #[inline(always)]
    pub fn labeled_cliques(&self) -> &[LabeledClique] {
        self.keys().as_slice()
    }

    /// Returns the number of labeled cliques.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    #[inline(always)]
    pub fn index_of(&self, lc: &LabeledClique) -> Option<usize> {
        self.keys().index_of(lc)
    }

    #[inline(always)]
    pub fn contains(&self, lc: &LabeledClique) -> bool {
        self.index_of(lc).is_some()
    }

    /// Gets the features of `lc`, or `None` if `lc` is not a key.
    ///
    /// # Errors
    ///
    /// A [`Type1Datum`] forwards feature map failures.
    pub fn features(
        &self,
        lc: &LabeledClique,
        meta: &DatasetMetaInfo,
    ) -> Result<Option<Cow<'_, Features>>> {
        match self.index_of(lc) {
            Some(i) => self.features_at(i, meta).map(Some),
            None => Ok(None),
        }
    }

    /// Gets the features of the `i`-th labeled clique.
    ///
    /// # Errors
    ///
    /// `i` must be in range. A [`Type1Datum`] forwards feature map failures.
    pub fn features_at(&self, i: usize, meta: &DatasetMetaInfo) -> Result<Cow<'_, Features>> {
        match self {
            Self::Type1(d) => {
                let lc = d
                    .keys
                    .get(i)
                    .ok_or_else(|| CliqueError::invalid_argument("clique index out of range"))?;
                d.features_of(lc, meta)
            }
            Self::Type2(d) => d
                .features
                .get(i)
                .map(Cow::Borrowed)
                .ok_or_else(|| CliqueError::invalid_argument("clique index out of range")),
        }
    }

    /// Stores a [`Type1Datum`] as a [`Type2Datum`]; a [`Type2Datum`] is left as is.
    ///
    /// # Errors
    ///
    /// Forwards feature map failures.
    pub(crate) fn materialize(&mut self, meta: &DatasetMetaInfo) -> Result<()> {
        if let Self::Type1(d) = self {
            let d = d.to_type2(meta)?;
            *self = Self::Type2(d);
        }
        Ok(())
    }

    /// Drops and renumbers stored feature IDs after feature selection.
    ///
    /// `meta` must still carry the feature IDs before selection. A [`Type1Datum`]
    /// cannot derive the kept counterparts of a dropped origin feature, so it is
    /// materialized first and stored as a [`Type2Datum`] from now on.
    ///
    /// # Errors
    ///
    /// Forwards feature map failures of a [`Type1Datum`].
    pub(crate) fn retain_features(
        &mut self,
        mapping: &[Option<usize>],
        meta: &DatasetMetaInfo,
    ) -> Result<()> {
        self.materialize(meta)?;
        if let Self::Type2(d) = self {
            for features in &mut d.features {
                *features = features.retain_mapped(mapping);
            }
        }
        Ok(())
    }
}

impl From<Type1Datum> for CliqueDatum {
    fn from(d: Type1Datum) -> Self {
        Self::Type1(d)
    }
}

impl From<Type2Datum> for CliqueDatum {
    fn from(d: Type2Datum) -> Self {
        Self::Type2(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clique::Clique;

    fn pair(prev: usize, curr: usize) -> LabeledClique {
        LabeledClique::new(Clique::window(1, 0), &[prev, curr]).unwrap()
    }

    fn unary(label: usize) -> LabeledClique {
        LabeledClique::new(Clique::new(&[0]).unwrap(), &[label]).unwrap()
    }

    // Two real-valued features "a" and "b" conjoined with the current label, plus
    // the transition feature "t" conjoined with both labels.
    fn build(meta: &mut DatasetMetaInfo) -> (CliqueDatum, CliqueDatum) {
        meta.add_label("X");
        meta.add_label("Y");
        let values: Arc<[f64]> = vec![0.5, 2.0, 1.0].into();
        let candidates = [pair(0, 1), pair(0, 2)];

        let mut per_label = vec![];
        for lc in &candidates {
            let a = meta.add_feature("a", lc.restrict(&Clique::new(&[0]).unwrap()).unwrap());
            let b = meta.add_feature("b", lc.restrict(&Clique::new(&[0]).unwrap()).unwrap());
            let t = meta.add_feature("t", lc.clone());
            per_label.push(vec![a, b, t]);
        }

        let origin = &per_label[0];
        for (lc, ids) in candidates.iter().zip(&per_label) {
            for (&orig, &new) in origin.iter().zip(ids) {
                meta.record_equivalent(orig, lc.clone(), new).unwrap();
            }
        }

        let mut type1 = Type1Datum::new(
            candidates[0].clone(),
            Features::new(per_label[0].clone(), Some(values.clone())).unwrap(),
        );
        type1.add_labeled_clique(candidates[1].clone());

        let mut type2 = Type2Datum::new();
        for (lc, ids) in candidates.iter().zip(&per_label) {
            let values: Arc<[f64]> = values.to_vec().into();
            type2
                .set(lc.clone(), Features::new(ids.clone(), Some(values)).unwrap())
                .unwrap();
        }
        (type1.into(), type2.into())
    }

    #[test]
    fn test_type1_and_type2_agree() {
        for freeze in [false, true] {
            let mut meta = DatasetMetaInfo::new(1, 0, "O");
            let (type1, type2) = build(&mut meta);
            if freeze {
                meta.freeze().unwrap();
            }
            assert_eq!(type1.labeled_cliques(), type2.labeled_cliques());
            for lc in type1.labeled_cliques() {
                let f1 = type1.features(lc, &meta).unwrap().unwrap();
                let f2 = type2.features(lc, &meta).unwrap().unwrap();
                assert_eq!(f1.indices(), f2.indices());
                assert_eq!(f1.values(), f2.values());
            }
        }
    }

    #[test]
    fn test_missing_key() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        let (type1, type2) = build(&mut meta);
        assert!(type1.features(&pair(1, 1), &meta).unwrap().is_none());
        assert!(type2.features(&pair(1, 1), &meta).unwrap().is_none());
        assert!(type2.features_at(9, &meta).is_err());
    }

    #[test]
    fn test_type2_deduplicates_values() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        let (_, type2) = build(&mut meta);
        let CliqueDatum::Type2(d) = type2 else {
            unreachable!()
        };
        let v0 = d.features[0].values().unwrap();
        let v1 = d.features[1].values().unwrap();
        assert!(Arc::ptr_eq(v0, v1));
    }

    #[test]
    fn test_type2_keys_are_stable() {
        let mut d = Type2Datum::new();
        d.set(unary(1), Features::boolean(vec![0])).unwrap();
        assert!(d.set(unary(1), Features::boolean(vec![1])).is_err());
        let datum = CliqueDatum::from(d);
        let meta = DatasetMetaInfo::new(0, 0, "O");
        let f = datum.features(&unary(1), &meta).unwrap().unwrap();
        assert_eq!(&[0], f.indices());
    }

    #[test]
    fn test_retain_features() {
        let mut d = Type2Datum::new();
        d.set(unary(1), Features::boolean(vec![0, 1, 2])).unwrap();
        let mut datum = CliqueDatum::from(d);
        let meta = DatasetMetaInfo::new(0, 0, "O");
        datum.retain_features(&[None, Some(0), Some(1)], &meta).unwrap();
        let f = datum.features(&unary(1), &meta).unwrap().unwrap();
        assert_eq!(&[0, 1], f.indices());
    }

    #[test]
    fn test_type1_skips_pruned_counterparts() {
        for freeze in [false, true] {
            let mut meta = DatasetMetaInfo::new(1, 0, "O");
            let (type1, _) = build(&mut meta);
            if freeze {
                meta.freeze().unwrap();
            }
            // drop "b" under the second candidate
            let b = meta.index_of_feature("b", &unary(2)).unwrap();
            let keep: Vec<bool> = (0..meta.num_features()).map(|fid| fid != b).collect();
            meta.keep_features(&keep);

            let CliqueDatum::Type1(d) = &type1 else {
                unreachable!()
            };
            let f = d.features_of(&pair(0, 2), &meta).unwrap();
            let a = meta.index_of_feature("a", &unary(2)).unwrap();
            let t = meta.index_of_feature("t", &pair(0, 2)).unwrap();
            assert_eq!(&[a, t], f.indices());
            assert_eq!(&[0.5, 1.0], &f.values().unwrap()[..]);
            assert_eq!(5, meta.num_features());
        }
    }

    #[test]
    fn test_retain_features_matches_type2() {
        // drop every feature of the origin candidate, then every feature but "a"
        for dropped in [vec!["a|1", "b|1", "t|1"], vec!["b|1", "t|1", "b|2", "t|2"]] {
            let mut meta1 = DatasetMetaInfo::new(1, 0, "O");
            let (mut type1, _) = build(&mut meta1);
            let mut meta2 = DatasetMetaInfo::new(1, 0, "O");
            let (_, mut type2) = build(&mut meta2);

            let name_of = |meta: &DatasetMetaInfo, fid: usize| {
                let (name, lc) = meta.feature(fid).unwrap();
                format!("{name}|{}", lc.label_at(0).unwrap())
            };
            let keep: Vec<bool> = (0..meta1.num_features())
                .map(|fid| !dropped.contains(&name_of(&meta1, fid).as_str()))
                .collect();
            let mut mapping = vec![];
            let mut next = 0;
            for &k in &keep {
                mapping.push(k.then(|| {
                    next += 1;
                    next - 1
                }));
            }
            type1.retain_features(&mapping, &meta1).unwrap();
            type2.retain_features(&mapping, &meta2).unwrap();
            assert_eq!(mapping, meta1.keep_features(&keep));
            assert_eq!(mapping, meta2.keep_features(&keep));

            for lc in type2.labeled_cliques() {
                let f1 = type1.features(lc, &meta1).unwrap().unwrap();
                let f2 = type2.features(lc, &meta2).unwrap().unwrap();
                assert_eq!(f1.indices(), f2.indices());
                assert_eq!(f1.values(), f2.values());
            }
        }
    }
}
