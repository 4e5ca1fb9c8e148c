//! Policy and neural network wrappers
//!
//! This module provides the per-agent policy components using tch-rs:
//! weight-shared pairwise processors, symmetric pooling, and the action
//! head with its discrete-utterance relaxation.

pub mod action;
pub mod gumbel;
pub mod processing;

/// Forward-pass mode, threaded explicitly through every stochastic choice
///
/// Training uses the differentiable relaxation for discrete sampling;
/// evaluation uses deterministic arg-max selection so runs are
/// reproducible. There is deliberately no ambient training flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Gradient-carrying stochastic path
    Training,
    /// Deterministic arg-max path, with per-timestep audit records
    Evaluation,
}
