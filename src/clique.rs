use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};

use crate::errors::{CliqueError, Result};

/// Represents a set of positions relative to the current position.
///
/// Offsets are kept sorted and unique, so two cliques built from the same offsets
/// in any order compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Clique {
    offsets: Arc<[isize]>,
}

impl Clique {
    /// Creates a new clique.
    ///
    /// # Errors
    ///
    /// The clique must contain at least one offset.
    pub fn new(offsets: &[isize]) -> Result<Self> {
        if offsets.is_empty() {
            return Err(CliqueError::invalid_argument("a clique must not be empty"));
        }
        let mut offsets = offsets.to_vec();
        offsets.sort_unstable();
        offsets.dedup();
        Ok(Self {
            offsets: offsets.into(),
        })
    }

    /// Creates the contiguous clique `-left..=right`.
    pub fn window(left: usize, right: usize) -> Self {
        let offsets: Vec<isize> = (-(left as isize)..=right as isize).collect();
        Self {
            offsets: offsets.into(),
        }
    }

    /// Gets the sorted offsets.
    #[inline(always)]
    pub fn offsets(&self) -> &[isize] {
        &self.offsets
    }

    /// Returns the number of offsets.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Always `false`; cliques cannot be empty.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Distance to the leftmost offset (0 if the clique does not look left).
    pub fn max_left(&self) -> usize {
        self.offsets[0].min(0).unsigned_abs()
    }

    /// Distance to the rightmost offset (0 if the clique does not look right).
    pub fn max_right(&self) -> usize {
        self.offsets[self.offsets.len() - 1].max(0).unsigned_abs()
    }

    /// Returns the slot of `offset`, if present.
    #[inline(always)]
    pub fn index_of(&self, offset: isize) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Returns `true` if the clique contains `offset`.
    pub fn contains(&self, offset: isize) -> bool {
        self.index_of(offset).is_some()
    }

    /// Returns `true` if every offset of `self` is in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.offsets.iter().all(|&o| other.contains(o))
    }
}

impl fmt::Display for Clique {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.offsets())
    }
}

/// Represents a clique together with one label for each of its offsets.
///
/// Used as a hash key wherever features or probabilities are looked up.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabeledClique {
    clique: Clique,
    labels: Arc<[usize]>,
}

impl LabeledClique {
    /// Creates a new labeled clique.
    ///
    /// # Errors
    ///
    /// `labels` must hold exactly one label per offset of `clique`.
    pub fn new(clique: Clique, labels: &[usize]) -> Result<Self> {
        if clique.len() != labels.len() {
            return Err(CliqueError::invalid_argument(format!(
                "clique {} has {} offsets but {} labels were given",
                clique,
                clique.len(),
                labels.len()
            )));
        }
        Ok(Self {
            clique,
            labels: labels.into(),
        })
    }

    /// Reads the labels of `clique` around `position` from a padded sequence buffer.
    ///
    /// # Errors
    ///
    /// Every offset must land inside `sequence`.
    pub fn value_of(clique: &Clique, sequence: &[usize], position: usize) -> Result<Self> {
        let mut labels = Vec::with_capacity(clique.len());
        for &offset in clique.offsets() {
            let label = position
                .checked_add_signed(offset)
                .and_then(|i| sequence.get(i))
                .ok_or_else(|| {
                    CliqueError::invalid_argument(format!(
                        "offset {offset} from position {position} is outside the sequence"
                    ))
                })?;
            labels.push(*label);
        }
        Ok(Self {
            clique: clique.clone(),
            labels: labels.into(),
        })
    }

    /// Gets the clique.
    #[inline(always)]
    pub fn clique(&self) -> &Clique {
        &self.clique
    }

    /// Gets the labels, ordered like the clique offsets.
    #[inline(always)]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Gets the label assigned to `offset`.
    pub fn label_at(&self, offset: isize) -> Option<usize> {
        self.clique.index_of(offset).map(|i| self.labels[i])
    }

    /// Returns a copy with the label at `offset` replaced.
    ///
    /// # Errors
    ///
    /// The clique must contain `offset`.
    pub fn with_label_at(&self, offset: isize, label: usize) -> Result<Self> {
        let i = self.clique.index_of(offset).ok_or_else(|| {
            CliqueError::invalid_argument(format!("offset {offset} is not in clique {}", self.clique))
        })?;
        if self.labels[i] == label {
            return Ok(self.clone());
        }
        let mut labels = self.labels.to_vec();
        labels[i] = label;
        Ok(Self {
            clique: self.clique.clone(),
            labels: labels.into(),
        })
    }

    /// Projects the assignment onto a sub-clique.
    ///
    /// # Errors
    ///
    /// `sub` must be a subset of this clique.
    pub fn restrict(&self, sub: &Clique) -> Result<Self> {
        if *sub == self.clique {
            return Ok(self.clone());
        }
        let mut labels = Vec::with_capacity(sub.len());
        for &offset in sub.offsets() {
            labels.push(self.label_at(offset).ok_or_else(|| {
                CliqueError::invalid_argument(format!(
                    "clique {sub} is not a subset of {}",
                    self.clique
                ))
            })?);
        }
        Ok(Self {
            clique: sub.clone(),
            labels: labels.into(),
        })
    }

    /// Labels shared with the clique of the previous position.
    #[inline(always)]
    pub fn left_message(&self) -> &[usize] {
        &self.labels[..self.labels.len() - 1]
    }

    /// Labels shared with the clique of the next position.
    #[inline(always)]
    pub fn right_message(&self) -> &[usize] {
        &self.labels[1..]
    }
}

impl fmt::Display for LabeledClique {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}=>{:?}", self.clique, self.labels())
    }
}

impl<Context> Decode<Context> for Clique {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let offsets: Vec<isize> = Decode::decode(decoder)?;
        Self::new(&offsets).map_err(|_| DecodeError::Other("empty clique"))
    }
}

bincode::impl_borrow_decode!(Clique);

impl Encode for Clique {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.offsets[..], encoder)
    }
}

impl<Context> Decode<Context> for LabeledClique {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let clique: Clique = Decode::decode(decoder)?;
        let labels: Vec<usize> = Decode::decode(decoder)?;
        Self::new(clique, &labels)
            .map_err(|_| DecodeError::Other("label count does not match the clique"))
    }
}

bincode::impl_borrow_decode!(LabeledClique);

impl Encode for LabeledClique {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.clique, encoder)?;
        Encode::encode(&self.labels[..], encoder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hashbrown::HashSet;

    #[test]
    fn test_clique_is_canonical() {
        let a = Clique::new(&[0, -1, 0]).unwrap();
        let b = Clique::new(&[-1, 0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(&[-1, 0], a.offsets());
        assert_eq!(1, a.max_left());
        assert_eq!(0, a.max_right());
        assert_eq!(Clique::window(1, 0), a);
    }

    #[test]
    fn test_empty_clique() {
        assert!(Clique::new(&[]).is_err());
    }

    #[test]
    fn test_window_bounds() {
        let c = Clique::window(2, 1);
        assert_eq!(&[-2, -1, 0, 1], c.offsets());
        assert_eq!(2, c.max_left());
        assert_eq!(1, c.max_right());
        assert!(Clique::new(&[0]).unwrap().is_subset_of(&c));
        assert!(!Clique::new(&[2]).unwrap().is_subset_of(&c));
    }

    #[test]
    fn test_labeled_clique_equality_and_hash() {
        let c = Clique::window(1, 0);
        let a = LabeledClique::new(c.clone(), &[1, 2]).unwrap();
        let b = LabeledClique::new(Clique::new(&[0, -1]).unwrap(), &[1, 2]).unwrap();
        let d = LabeledClique::new(c, &[2, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, d);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&d));
    }

    #[test]
    fn test_labeled_clique_length_mismatch() {
        assert!(LabeledClique::new(Clique::window(1, 0), &[1]).is_err());
    }

    #[test]
    fn test_value_of() {
        let c = Clique::window(1, 1);
        let seq = [0, 3, 4, 5, 0];
        let lc = LabeledClique::value_of(&c, &seq, 2).unwrap();
        assert_eq!(&[3, 4, 5], lc.labels());
        assert_eq!(Some(3), lc.label_at(-1));
        assert!(LabeledClique::value_of(&c, &seq, 0).is_err());
        assert!(LabeledClique::value_of(&c, &seq, 4).is_err());
    }

    #[test]
    fn test_with_label_and_restrict() {
        let c = Clique::window(1, 0);
        let lc = LabeledClique::new(c, &[1, 2]).unwrap();
        let changed = lc.with_label_at(0, 7).unwrap();
        assert_eq!(&[1, 7], changed.labels());
        assert_eq!(&[1, 2], lc.labels());
        assert!(lc.with_label_at(1, 7).is_err());

        let unary = Clique::new(&[0]).unwrap();
        let restricted = lc.restrict(&unary).unwrap();
        assert_eq!(&[2], restricted.labels());
        assert_eq!(&unary, restricted.clique());
        assert!(lc.restrict(&Clique::new(&[1]).unwrap()).is_err());
    }

    #[test]
    fn test_messages() {
        let lc = LabeledClique::new(Clique::window(2, 0), &[1, 2, 3]).unwrap();
        assert_eq!(&[1, 2], lc.left_message());
        assert_eq!(&[2, 3], lc.right_message());
    }
}
