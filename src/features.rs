use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::errors::{CliqueError, Result};
use crate::vector::WeightVector;

/// A sparse feature vector attached to one labeled clique at one position.
///
/// The arrays are shared, never copied: cloning a [`Features`] is cheap, and two
/// instances may point at the same value array.
#[derive(Clone, Debug, PartialEq)]
pub struct Features {
    indices: Arc<[usize]>,
    values: Option<Arc<[f64]>>,
}

impl Features {
    /// Creates boolean features; every value is 1.0.
    pub fn boolean(indices: impl Into<Arc<[usize]>>) -> Self {
        Self {
            indices: indices.into(),
            values: None,
        }
    }

    /// Creates features with optional explicit values.
    ///
    /// # Errors
    ///
    /// `values`, if given, must be as long as `indices`.
    pub fn new(indices: impl Into<Arc<[usize]>>, values: Option<Arc<[f64]>>) -> Result<Self> {
        let indices = indices.into();
        if let Some(values) = &values {
            if values.len() != indices.len() {
                return Err(CliqueError::invalid_argument(format!(
                    "{} feature indices but {} values",
                    indices.len(),
                    values.len()
                )));
            }
        }
        Ok(Self { indices, values })
    }

    /// Returns the number of active features.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` if no feature is active.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Gets the feature IDs.
    #[inline(always)]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Gets the explicit values, or `None` for boolean features.
    #[inline(always)]
    pub fn values(&self) -> Option<&Arc<[f64]>> {
        self.values.as_ref()
    }

    /// Returns `true` if every value is implicitly 1.0.
    #[inline(always)]
    pub fn is_boolean(&self) -> bool {
        self.values.is_none()
    }

    /// Gets the value of the `i`-th active feature.
    #[inline(always)]
    pub fn value(&self, i: usize) -> f64 {
        self.values.as_ref().map_or(1.0, |v| v[i])
    }

    /// Iterates over `(feature ID, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices
            .iter()
            .enumerate()
            .map(|(i, &fid)| (fid, self.value(i)))
    }

    /// Computes the unnormalized score under `weights`.
    pub fn dot<W>(&self, weights: &W) -> f64
    where
        W: WeightVector + ?Sized,
    {
        let mut score = 0.0;
        for (fid, value) in self.iter() {
            score += value * weights.get_weight(fid);
        }
        score
    }

    /// Replaces the feature IDs, sharing the value array.
    ///
    /// # Errors
    ///
    /// `indices` must be as long as the current index array.
    pub fn remap(&self, indices: impl Into<Arc<[usize]>>) -> Result<Self> {
        Self::new(indices, self.values.clone())
    }

    /// Replaces the feature IDs and drops the entries mapped to `None`.
    ///
    /// The value array is shared when nothing is dropped.
    ///
    /// # Errors
    ///
    /// `indices` must be as long as the current index array.
    pub(crate) fn remap_partial(&self, indices: &[Option<usize>]) -> Result<Self> {
        if indices.len() != self.len() {
            return Err(CliqueError::invalid_argument(format!(
                "{} feature indices but {} replacements",
                self.len(),
                indices.len()
            )));
        }
        if indices.iter().all(Option::is_some) {
            return self.remap(indices.iter().flatten().copied().collect::<Vec<_>>());
        }
        let mut kept = Vec::with_capacity(indices.len());
        let mut values = self.values.as_ref().map(|_| Vec::with_capacity(indices.len()));
        for (i, fid) in indices.iter().enumerate() {
            if let Some(fid) = *fid {
                kept.push(fid);
                if let Some(values) = values.as_mut() {
                    values.push(self.value(i));
                }
            }
        }
        Ok(Self {
            indices: kept.into(),
            values: values.map(Into::into),
        })
    }

    /// Points the value array at `values`, which must be equal to the current one.
    pub(crate) fn share_values(&mut self, values: &Arc<[f64]>) {
        debug_assert_eq!(self.values.as_deref(), Some(&values[..]));
        self.values = Some(values.clone());
    }

    /// Keeps the entries whose feature ID maps to `Some`, renumbering them.
    pub(crate) fn retain_mapped(&self, mapping: &[Option<usize>]) -> Self {
        let mut indices = Vec::with_capacity(self.len());
        let mut values = self.values.as_ref().map(|_| Vec::with_capacity(self.len()));
        for (i, &fid) in self.indices.iter().enumerate() {
            if let Some(new_fid) = mapping.get(fid).copied().flatten() {
                indices.push(new_fid);
                if let Some(values) = values.as_mut() {
                    values.push(self.value(i));
                }
            }
        }
        Self {
            indices: indices.into(),
            values: values.map(Into::into),
        }
    }
}
