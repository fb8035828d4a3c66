use alloc::vec::Vec;

/// Read access to a weight vector.
///
/// Indices past the end read as zero, which is how features synthesized after the
/// weights were fixed contribute to a score.
pub trait WeightVector {
    fn get_weight(&self, index: usize) -> f64;
}

impl WeightVector for [f64] {
    #[inline(always)]
    fn get_weight(&self, index: usize) -> f64 {
        self.get(index).copied().unwrap_or(0.0)
    }
}

impl WeightVector for Vec<f64> {
    #[inline(always)]
    fn get_weight(&self, index: usize) -> f64 {
        self.as_slice().get_weight(index)
    }
}

/// Write access to a gradient vector.
///
/// Dense vectors drop contributions past their end; those coordinates read as zero
/// weights and cannot be trained.
pub trait GradientVector {
    fn add(&mut self, index: usize, value: f64);
}

impl GradientVector for [f64] {
    #[inline(always)]
    fn add(&mut self, index: usize, value: f64) {
        if let Some(g) = self.get_mut(index) {
            *g += value;
        }
    }
}

impl GradientVector for Vec<f64> {
    #[inline(always)]
    fn add(&mut self, index: usize, value: f64) {
        self.as_mut_slice().add(index, value);
    }
}

/// Gradient contributions of a single document, in the order they were produced.
#[derive(Debug, Default)]
pub struct SparseGradientVector {
    gradients: Vec<(usize, f64)>,
}

impl SparseGradientVector {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.gradients.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.gradients.is_empty()
    }

    /// Adds every contribution into `other` and empties `self`.
    #[inline(always)]
    pub fn merge_gradients<G>(&mut self, other: &mut G)
    where
        G: GradientVector + ?Sized,
    {
        for &(index, value) in &self.gradients {
            other.add(index, value);
        }
        self.gradients.clear();
    }
}

impl GradientVector for SparseGradientVector {
    #[inline(always)]
    fn add(&mut self, index: usize, value: f64) {
        self.gradients.push((index, value));
    }
}
