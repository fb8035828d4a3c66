pub mod lbfgs;
pub mod sgd;

/// Learning rate schedule of the SGD optimizer
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LearningRateDecay {
    /// `eta / t` at epoch `t`, counted from 1.
    Inverse,

    /// `eta * alpha^t` at epoch `t`, counted from 0.
    Exponential(f64),
}
