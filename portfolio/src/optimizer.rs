//! Dynamic position optimizer
//!
//! Greedy single-contract coordinate descent minimizing
//!
//! ```text
//! J(x) = 0.5 * (x - x*)' W S W (x - x*) / tau^2 + kappa * c' |x - x0|
//! ```
//!
//! subject to the asymmetric risk cap
//! `sqrt(x' W S W x) <= (1 + gamma) * tau * capital / ||w||`.
//!
//! The search starts from the integerized held position and applies the
//! single +/-1 contract change that most decreases J each iteration,
//! breaking ties toward the lowest symbol index. Termination on an
//! improvement below the convergence threshold or the iteration cap; a
//! capped run keeps the last iterate and logs a warning.

use common::OptimizerConfig;
use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Inputs for one optimization cycle
#[derive(Debug, Clone)]
pub struct OptimizationInput {
    /// Ideal positions from the strategies, in contracts
    pub ideal: DVector<f64>,
    /// Currently held positions, in contracts
    pub held: DVector<f64>,
    /// Trading cost per contract, in dollars
    pub cost_per_contract: DVector<f64>,
    /// Risk weight per contract
    pub weight_per_contract: DVector<f64>,
    /// Covariance matrix over the same symbol ordering
    pub covariance: DMatrix<f64>,
}

/// Result of one optimization cycle
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Integer positions, in contracts
    pub positions: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Cost-penalized greedy optimizer
#[derive(Debug)]
pub struct DynamicOptimizer {
    config: OptimizerConfig,
}

impl DynamicOptimizer {
    #[must_use]
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run the greedy descent
    pub fn optimize(&self, input: &OptimizationInput) -> OptimizationResult {
        let n = input.ideal.len();
        if n == 0 {
            return OptimizationResult {
                positions: DVector::zeros(0),
                objective: 0.0,
                iterations: 0,
                converged: true,
            };
        }

        // M = W S W: risk matrix in contract space
        let w = DMatrix::from_diagonal(&input.weight_per_contract);
        let risk_matrix = &w * &input.covariance * &w;

        let risk_cap = self.risk_cap(&input.weight_per_contract);
        let objective =
            |x: &DVector<f64>| self.objective(x, &input.ideal, &input.held, &risk_matrix, input);
        let portfolio_risk = |x: &DVector<f64>| (x.dot(&(&risk_matrix * x))).max(0.0).sqrt();

        let mut current = input.held.map(f64::round);
        let mut current_objective = objective(&current);
        let mut current_risk = portfolio_risk(&current);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let mut best_move: Option<(usize, f64, f64, f64)> = None; // (idx, delta, J, risk)
            for i in 0..n {
                for delta in [1.0, -1.0] {
                    let mut candidate = current.clone();
                    candidate[i] += delta;

                    let candidate_risk = portfolio_risk(&candidate);
                    // Feasible moves stay under the cap; from an
                    // infeasible start, risk-reducing moves are allowed
                    if candidate_risk > risk_cap && candidate_risk >= current_risk {
                        continue;
                    }

                    let candidate_objective = objective(&candidate);
                    let improves = match best_move {
                        // Strict comparison keeps the lowest-index move
                        // on equal improvement
                        Some((_, _, best_objective, _)) => candidate_objective < best_objective,
                        None => candidate_objective < current_objective,
                    };
                    if improves {
                        best_move = Some((i, delta, candidate_objective, candidate_risk));
                    }
                }
            }

            match best_move {
                Some((i, delta, candidate_objective, candidate_risk))
                    if current_objective - candidate_objective > self.config.convergence_threshold =>
                {
                    current[i] += delta;
                    current_objective = candidate_objective;
                    current_risk = candidate_risk;
                }
                _ => {
                    converged = true;
                    break;
                }
            }
        }

        if !converged {
            warn!(
                iterations,
                objective = current_objective,
                "optimizer hit iteration cap, using last iterate"
            );
        }

        // Never return worse than the integerized ideal when feasible
        let rounded_ideal = input.ideal.map(f64::round);
        if portfolio_risk(&rounded_ideal) <= risk_cap {
            let ideal_objective = objective(&rounded_ideal);
            if ideal_objective < current_objective {
                current = rounded_ideal;
                current_objective = ideal_objective;
            }
        }

        OptimizationResult {
            positions: current,
            objective: current_objective,
            iterations,
            converged,
        }
    }

    /// Asymmetric risk cap: `(1 + gamma) * tau * capital / ||w||`
    fn risk_cap(&self, weights: &DVector<f64>) -> f64 {
        let norm = weights.norm();
        if norm <= f64::EPSILON {
            return f64::INFINITY;
        }
        (1.0 + self.config.asymmetric_risk_buffer) * self.config.tau * self.config.capital / norm
    }

    fn objective(
        &self,
        x: &DVector<f64>,
        ideal: &DVector<f64>,
        held: &DVector<f64>,
        risk_matrix: &DMatrix<f64>,
        input: &OptimizationInput,
    ) -> f64 {
        let tracking = x - ideal;
        let quadratic = 0.5 * tracking.dot(&(risk_matrix * &tracking))
            / (self.config.tau * self.config.tau);

        let turnover = x - held;
        let cost: f64 = turnover
            .iter()
            .zip(input.cost_per_contract.iter())
            .map(|(d, c)| d.abs() * c)
            .sum();

        quadratic + self.config.cost_penalty_scalar * cost
    }
}
