use alloc::vec::Vec;

use argmin::{
    core::{observers::ObserverMode, Executor},
    solver::{
        linesearch::{condition::ArmijoCondition, BacktrackingLineSearch, MoreThuenteLineSearch},
        quasinewton::LBFGS,
    },
};
use argmin_observer_slog::SlogLogger;

use crate::errors::{CliqueError, Result};
use crate::evaluator::SequenceEvaluator;
use crate::objective::CliqueObjective;
use crate::trainer::Regularization;

const HISTORY: usize = 7;

/// Minimizes `objective` with L-BFGS. Under L1-regularization the solver runs as
/// OWL-QN; every other prior is added to the objective.
pub(crate) fn optimize(
    objective: CliqueObjective<'_>,
    weights_init: Vec<f64>,
    regularization: Regularization,
    lambda: f64,
    max_iter: u64,
    evaluator: Option<SequenceEvaluator>,
) -> Result<Vec<f64>> {
    let weights = match regularization {
        Regularization::L1 => {
            let linesearch = BacktrackingLineSearch::new(ArmijoCondition::new(1e-4)?).rho(0.5)?;
            let solver = LBFGS::new(linesearch, HISTORY).with_l1_regularization(lambda)?;
            let mut executor = Executor::new(objective, solver)
                .configure(|state| state.param(weights_init).max_iters(max_iter))
                .add_observer(SlogLogger::term(), ObserverMode::Always);
            if let Some(evaluator) = evaluator {
                executor = executor.add_observer(evaluator, ObserverMode::Always);
            }
            executor.run()?.state.param
        }
        _ => {
            let objective = objective.prior(regularization, lambda)?;
            let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9)?;
            let solver = LBFGS::new(linesearch, HISTORY);
            let mut executor = Executor::new(objective, solver)
                .configure(|state| state.param(weights_init).max_iters(max_iter))
                .add_observer(SlogLogger::term(), ObserverMode::Always);
            if let Some(evaluator) = evaluator {
                executor = executor.add_observer(evaluator, ObserverMode::Always);
            }
            executor.run()?.state.param
        }
    };
    weights.ok_or_else(|| CliqueError::Optimizer("the solver returned no weights".into()))
}
