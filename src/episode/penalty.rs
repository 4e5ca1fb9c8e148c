//! Vocabulary-usage penalty
//!
//! Charges every spoken symbol the negative log of its usage probability
//! across the episode so far, with an out-of-vocabulary mass term keeping
//! rare words expensive. Pressure toward a small effective vocabulary
//! comes from this cost, not from shrinking the vocabulary itself.

use tch::{Device, Kind, Tensor};

/// Running word-usage accounting and its cost
#[derive(Debug)]
pub struct WordCountPenalty {
    word_counts: Tensor,
    cost_coefficient: f64,
    oov_prob: f64,
}

impl WordCountPenalty {
    /// Create a zeroed penalty for one vocabulary
    pub fn new(vocab_size: i64, cost_coefficient: f64, device: Device) -> Self {
        Self {
            word_counts: Tensor::zeros([vocab_size], (Kind::Float, device)),
            cost_coefficient,
            oov_prob: 1.0,
        }
    }

    /// Price one timestep's utterances, `[batch, num_agents, vocab]` -> `[batch]`
    ///
    /// The usage counters accumulate outside the gradient graph; the cost
    /// itself stays differentiable with respect to the utterances.
    pub fn forward(&mut self, utterances: &Tensor) -> Tensor {
        self.word_counts = &self.word_counts
            + utterances
                .detach()
                .sum_dim_intlist([0, 1].as_slice(), false, Kind::Float);

        let total = self.word_counts.sum(Kind::Float) + self.oov_prob;
        let usage_prob = &self.word_counts / total;
        let word_cost = -((usage_prob + 1e-10).log());

        (utterances * word_cost)
            .sum_dim_intlist([1, 2].as_slice(), false, Kind::Float)
            * self.cost_coefficient
    }

    /// Zero the usage counters for a new episode
    pub fn reset(&mut self) {
        self.word_counts = Tensor::zeros_like(&self.word_counts);
    }
}
