use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::{PoisonError, RwLock};

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use hashbrown::{HashMap, HashSet};

use crate::clique::{Clique, LabeledClique};
use crate::errors::{CliqueError, Result};
use crate::feature_map::FeatureMap;

type FeatureKey = (Arc<str>, LabeledClique);

#[derive(Clone, Debug, Default)]
struct FeatureIndex {
    entries: Vec<FeatureKey>,
    index: HashMap<FeatureKey, usize>,
    // removed by feature selection; never registered again implicitly
    pruned: HashSet<FeatureKey>,
}

impl FeatureIndex {
    fn get_or_add(&mut self, key: FeatureKey) -> usize {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        self.pruned.remove(&key);
        let id = self.entries.len();
        self.entries.push(key.clone());
        self.index.insert(key, id);
        id
    }
}

/// Global configuration shared by every dataset built from one corpus.
///
/// Holds the window extents, the label and feature indices, and the [`FeatureMap`].
/// Build it mutably while the corpus is assembled, call [`DatasetMetaInfo::freeze`],
/// then share it read-only (usually as `Arc<DatasetMetaInfo>`).
///
/// The meta info is saved with a trained [`Model`](crate::Model), so documents built
/// in another process receive the same feature IDs.
#[derive(Debug)]
pub struct DatasetMetaInfo {
    left_window: usize,
    right_window: usize,
    max_clique: Clique,
    labels: Vec<String>,
    label_index: HashMap<String, usize>,
    features: RwLock<FeatureIndex>,
    feature_map: FeatureMap,
}

impl DatasetMetaInfo {
    /// Creates a new meta info. The background label receives index 0.
    ///
    /// # Arguments
    ///
    /// * `left_window` - How many positions the maximum clique looks back.
    /// * `right_window` - How many positions the maximum clique looks ahead.
    /// * `background` - Name of the label used outside the sequence.
    pub fn new(left_window: usize, right_window: usize, background: &str) -> Self {
        let mut meta = Self {
            left_window,
            right_window,
            max_clique: Clique::window(left_window, right_window),
            labels: vec![],
            label_index: HashMap::new(),
            features: RwLock::new(FeatureIndex::default()),
            feature_map: FeatureMap::new(),
        };
        meta.add_label(background);
        meta
    }

    #[inline(always)]
    pub fn left_window(&self) -> usize {
        self.left_window
    }

    #[inline(always)]
    pub fn right_window(&self) -> usize {
        self.right_window
    }

    /// Gets the clique every label assignment is phrased over.
    #[inline(always)]
    pub fn max_clique(&self) -> &Clique {
        &self.max_clique
    }

    /// Gets the index of the background label.
    #[inline(always)]
    pub const fn background_index(&self) -> usize {
        0
    }

    /// Adds a label if it is new and returns its index.
    pub fn add_label(&mut self, name: &str) -> usize {
        if let Some(&i) = self.label_index.get(name) {
            return i;
        }
        let i = self.labels.len();
        self.labels.push(name.to_string());
        self.label_index.insert(name.to_string(), i);
        i
    }

    pub fn index_of_label(&self, name: &str) -> Option<usize> {
        self.label_index.get(name).copied()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Returns the ID of the feature `name` conjoined with `lc`, adding it if new.
    ///
    /// A feature removed by pruning is registered again under a new ID.
    pub fn add_feature(&self, name: &str, lc: LabeledClique) -> usize {
        self.features
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_add((Arc::from(name), lc))
    }

    /// Like [`DatasetMetaInfo::add_feature`], but returns `None` for a pruned
    /// feature.
    pub(crate) fn live_feature(&self, name: &str, lc: LabeledClique) -> Option<usize> {
        let key: FeatureKey = (Arc::from(name), lc);
        let mut features = self.features.write().unwrap_or_else(PoisonError::into_inner);
        if features.pruned.contains(&key) {
            return None;
        }
        Some(features.get_or_add(key))
    }

    pub fn index_of_feature(&self, name: &str, lc: &LabeledClique) -> Option<usize> {
        let features = self.features.read().unwrap_or_else(PoisonError::into_inner);
        features.index.get(&(Arc::<str>::from(name), lc.clone())).copied()
    }

    /// Returns `true` if the feature `name` conjoined with `lc` was removed by
    /// feature selection.
    pub fn is_pruned(&self, name: &str, lc: &LabeledClique) -> bool {
        let features = self.features.read().unwrap_or_else(PoisonError::into_inner);
        features.pruned.contains(&(Arc::<str>::from(name), lc.clone()))
    }

    /// Gets the name and labeled clique of a feature ID.
    pub fn feature(&self, id: usize) -> Option<(Arc<str>, LabeledClique)> {
        let features = self.features.read().unwrap_or_else(PoisonError::into_inner);
        features.entries.get(id).cloned()
    }

    /// Returns the size of the feature space.
    pub fn num_features(&self) -> usize {
        self.features
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[inline(always)]
    pub fn feature_map(&self) -> &FeatureMap {
        &self.feature_map
    }

    /// Records that feature `orig` is feature `new` under `lc`.
    ///
    /// # Errors
    ///
    /// See [`FeatureMap::add`].
    pub fn record_equivalent(&mut self, orig: usize, lc: LabeledClique, new: usize) -> Result<()> {
        self.feature_map.add(orig, lc, new)
    }

    pub(crate) fn record_pruned(&mut self, orig: usize, lc: LabeledClique) -> Result<()> {
        self.feature_map.add_pruned(orig, lc)
    }

    /// Freezes the feature map. Nothing can unfreeze it.
    ///
    /// # Errors
    ///
    /// See [`FeatureMap::freeze`].
    pub fn freeze(&mut self) -> Result<()> {
        let num_features = self.num_features();
        let num_labels = self.num_labels();
        self.feature_map
            .freeze(num_features, &self.max_clique, num_labels)
    }

    pub fn is_frozen(&self) -> bool {
        self.feature_map.is_frozen()
    }

    /// Maps feature IDs to their counterparts under `target`; `None` marks a pruned
    /// counterpart.
    ///
    /// On a frozen map, unknown pairs are completed from the feature index: the
    /// feature name of the original ID is conjoined with `target` restricted to the
    /// original feature's clique.
    ///
    /// # Errors
    ///
    /// On an open map every pair must have been recorded.
    pub fn remap_features(
        &self,
        origs: &[usize],
        target: &LabeledClique,
    ) -> Result<Vec<Option<usize>>> {
        self.feature_map
            .get_feature_array(origs, target, |orig| self.synthesize(orig, target))
    }

    fn synthesize(&self, orig: usize, target: &LabeledClique) -> Result<Option<usize>> {
        let (name, lc) = self
            .feature(orig)
            .ok_or_else(|| CliqueError::lookup_miss(format!("unknown feature ID {orig}")))?;
        let restricted = target.restrict(lc.clique())?;
        Ok(self.live_feature(&name, restricted))
    }

    /// Compacts the feature index to the features with `keep[id] == true`.
    ///
    /// Returns the old-to-new ID mapping.
    pub(crate) fn keep_features(&mut self, keep: &[bool]) -> Vec<Option<usize>> {
        let features = self.features.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut mapping = Vec::with_capacity(features.entries.len());
        let mut kept = FeatureIndex {
            pruned: core::mem::take(&mut features.pruned),
            ..FeatureIndex::default()
        };
        for (id, key) in features.entries.drain(..).enumerate() {
            if keep.get(id).copied().unwrap_or(false) {
                mapping.push(Some(kept.get_or_add(key)));
            } else {
                kept.pruned.insert(key);
                mapping.push(None);
            }
        }
        *features = kept;
        self.feature_map.remap(&mapping);
        mapping
    }
}

impl Clone for DatasetMetaInfo {
    fn clone(&self) -> Self {
        let features = self.features.read().unwrap_or_else(PoisonError::into_inner);
        Self {
            left_window: self.left_window,
            right_window: self.right_window,
            max_clique: self.max_clique.clone(),
            labels: self.labels.clone(),
            label_index: self.label_index.clone(),
            features: RwLock::new(features.clone()),
            feature_map: self.feature_map.clone(),
        }
    }
}

impl<Context> Decode<Context> for DatasetMetaInfo {
    #[allow(clippy::type_complexity)]
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let left_window: usize = Decode::decode(decoder)?;
        let right_window: usize = Decode::decode(decoder)?;
        let labels: Vec<String> = Decode::decode(decoder)?;
        let entries: Vec<(String, LabeledClique)> = Decode::decode(decoder)?;
        let pruned: Vec<(String, LabeledClique)> = Decode::decode(decoder)?;
        let feature_map: FeatureMap = Decode::decode(decoder)?;

        let label_index = labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let mut features = FeatureIndex::default();
        for (name, lc) in entries {
            features.get_or_add((Arc::from(name), lc));
        }
        features.pruned = pruned
            .into_iter()
            .map(|(name, lc)| (Arc::from(name), lc))
            .collect();
        Ok(Self {
            left_window,
            right_window,
            max_clique: Clique::window(left_window, right_window),
            labels,
            label_index,
            features: RwLock::new(features),
            feature_map,
        })
    }
}

bincode::impl_borrow_decode!(DatasetMetaInfo);

impl Encode for DatasetMetaInfo {
    #[allow(clippy::type_complexity)]
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let features = self.features.read().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<(&str, &LabeledClique)> = features
            .entries
            .iter()
            .map(|(name, lc)| (&**name, lc))
            .collect();
        let mut pruned: Vec<(&str, &LabeledClique)> = features
            .pruned
            .iter()
            .map(|(name, lc)| (&**name, lc))
            .collect();
        pruned.sort_unstable();
        Encode::encode(&self.left_window, encoder)?;
        Encode::encode(&self.right_window, encoder)?;
        Encode::encode(&self.labels, encoder)?;
        Encode::encode(&entries, encoder)?;
        Encode::encode(&pruned, encoder)?;
        Encode::encode(&self.feature_map, encoder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unary(label: usize) -> LabeledClique {
        LabeledClique::new(Clique::new(&[0]).unwrap(), &[label]).unwrap()
    }

    fn pair(prev: usize, curr: usize) -> LabeledClique {
        LabeledClique::new(Clique::window(1, 0), &[prev, curr]).unwrap()
    }

    #[test]
    fn test_labels() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        assert_eq!(0, meta.background_index());
        assert_eq!(1, meta.add_label("PER"));
        assert_eq!(1, meta.add_label("PER"));
        assert_eq!(Some(1), meta.index_of_label("PER"));
        assert_eq!(Some("O"), meta.label(0));
        assert_eq!(2, meta.num_labels());
        assert_eq!(&Clique::window(1, 0), meta.max_clique());
    }

    #[test]
    fn test_feature_index() {
        let meta = DatasetMetaInfo::new(1, 0, "O");
        let a = meta.add_feature("w=Paris", unary(1));
        let b = meta.add_feature("w=Paris", unary(2));
        assert_ne!(a, b);
        assert_eq!(a, meta.add_feature("w=Paris", unary(1)));
        assert_eq!(Some(b), meta.index_of_feature("w=Paris", &unary(2)));
        assert_eq!(2, meta.num_features());
        let (name, lc) = meta.feature(b).unwrap();
        assert_eq!("w=Paris", &*name);
        assert_eq!(unary(2), lc);
    }

    #[test]
    fn test_remap_features_synthesizes_when_frozen() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        meta.add_label("A");
        meta.add_label("B");
        let a = meta.add_feature("w=x", unary(1));
        let b = meta.add_feature("w=x", unary(2));
        meta.record_equivalent(a, pair(0, 1), a).unwrap();
        meta.record_equivalent(a, pair(0, 2), b).unwrap();

        assert_eq!(vec![Some(b)], meta.remap_features(&[a], &pair(0, 2)).unwrap());
        assert!(meta.remap_features(&[a], &pair(1, 2)).is_err());

        meta.freeze().unwrap();
        assert!(meta.is_frozen());
        assert_eq!(vec![Some(b)], meta.remap_features(&[a], &pair(1, 2)).unwrap());
        let c = meta.remap_features(&[b], &pair(2, 0)).unwrap()[0];
        assert_eq!(3, meta.num_features());
        assert_eq!(c, meta.index_of_feature("w=x", &unary(0)));
    }

    #[test]
    fn test_keep_features() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        meta.add_label("A");
        meta.add_feature("f", unary(0));
        let b = meta.add_feature("g", unary(0));
        let c = meta.add_feature("g", unary(1));
        meta.record_equivalent(b, pair(0, 1), c).unwrap();
        let mapping = meta.keep_features(&[false, true, true]);
        assert_eq!(vec![None, Some(0), Some(1)], mapping);
        assert_eq!(2, meta.num_features());
        assert_eq!(None, meta.index_of_feature("f", &unary(0)));
        assert!(meta.is_pruned("f", &unary(0)));
        assert_eq!(vec![Some(1)], meta.remap_features(&[0], &pair(0, 1)).unwrap());
    }

    #[test]
    fn test_pruned_features_stay_pruned() {
        let mut meta = DatasetMetaInfo::new(0, 0, "O");
        meta.add_label("A");
        let o = meta.add_feature("f", unary(0));
        meta.add_feature("f", unary(1));
        meta.freeze().unwrap();
        meta.keep_features(&[true, false]);
        assert_eq!(1, meta.num_features());

        // The frozen map would otherwise synthesize "f" under A again.
        assert_eq!(vec![None], meta.remap_features(&[o], &unary(1)).unwrap());
        assert_eq!(None, meta.live_feature("f", unary(1)));
        assert_eq!(1, meta.num_features());

        // Explicit registration brings it back.
        assert_eq!(1, meta.add_feature("f", unary(1)));
        assert!(!meta.is_pruned("f", &unary(1)));
    }

    #[test]
    fn test_encode_decode() {
        let mut meta = DatasetMetaInfo::new(1, 0, "O");
        meta.add_label("A");
        let a = meta.add_feature("w=x", unary(1));
        let b = meta.add_feature("w=y", pair(0, 1));
        meta.add_feature("w=z", unary(0));
        meta.record_equivalent(a, pair(0, 1), a).unwrap();
        meta.keep_features(&[true, true, false]);
        meta.freeze().unwrap();

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&meta, config).unwrap();
        let (decoded, _): (DatasetMetaInfo, usize) =
            bincode::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(meta.labels(), decoded.labels());
        assert_eq!(Some(1), decoded.index_of_label("A"));
        assert_eq!(&Clique::window(1, 0), decoded.max_clique());
        assert_eq!(Some(b), decoded.index_of_feature("w=y", &pair(0, 1)));
        assert!(decoded.is_pruned("w=z", &unary(0)));
        assert!(decoded.is_frozen());
        assert_eq!(
            vec![Some(a)],
            decoded.remap_features(&[a], &pair(0, 1)).unwrap()
        );

        let cloned = decoded.clone();
        assert_eq!(decoded.num_features(), cloned.num_features());
    }
}
