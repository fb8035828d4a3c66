//! Module for SGD optimizer.

use alloc::vec::Vec;

use argmin_math::ArgminScaledSub;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::errors::Result;
use crate::objective::{CliqueObjective, DiffFunction};
use crate::optimizers::LearningRateDecay;
use crate::trainer::Regularization;

const STOP_CRITERIA: f64 = 1e-6;
const SHUFFLE_SEED: u64 = 0;

#[allow(clippy::too_many_arguments)]
pub(crate) fn optimize(
    mut objective: CliqueObjective<'_>,
    weights_init: Vec<f64>,
    regularization: Regularization,
    lambda: f64,
    max_iter: u64,

    // SGD parameters
    batch_size: usize,
    eta: f64,
    learning_rate_decay: LearningRateDecay,
) -> Result<Vec<f64>> {
    let n_docs = objective.num_documents();
    let mut rng = StdRng::seed_from_u64(SHUFFLE_SEED);
    let mut weights = weights_init;

    let start_time = std::time::Instant::now();

    let mut prev_cost = f64::INFINITY;
    for epoch in 0..max_iter {
        let cost = objective.value(&weights)? + regularization.penalty(lambda, &weights, None);
        let elapsed = start_time.elapsed().as_secs_f32();
        log::info!("epoch={epoch}, elapsed={elapsed}, cost={cost}");
        if (cost - prev_cost).abs() / prev_cost < STOP_CRITERIA {
            break;
        }
        prev_cost = cost;

        objective.shuffle(&mut rng);
        let mut start = 0;
        while start < n_docs {
            let progress = epoch as f64 + start as f64 / n_docs as f64;
            let learning_rate = eta
                * match learning_rate_decay {
                    LearningRateDecay::Inverse => 1.0 / (progress + 1.0),
                    LearningRateDecay::Exponential(alpha) => alpha.powf(progress),
                };

            let range = start..n_docs.min(start + batch_size);
            let grad = objective.gradient_partial(&weights, range.clone())?;
            weights = weights.scaled_sub(&learning_rate, &grad);

            let reg_factor = learning_rate * range.len() as f64 / n_docs as f64;
            match regularization {
                Regularization::L1 => {
                    let shrink = reg_factor * lambda;
                    for w in &mut weights {
                        if w.is_sign_positive() {
                            *w = (*w - shrink).max(0.0);
                        } else {
                            *w = (*w + shrink).min(0.0);
                        }
                    }
                }
                _ => {
                    let mut prior = vec![0.0; weights.len()];
                    regularization.penalty(lambda, &weights, Some(&mut prior));
                    weights = weights.scaled_sub(&reg_factor, &prior);
                }
            }
            start += batch_size;
        }
    }
    Ok(weights)
}
