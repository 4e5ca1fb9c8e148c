//! Shared-weight recurrent processing over entity/agent pairs
//!
//! One GRU cell per channel, weight-shared across every (agent, target)
//! pair, so the policy reasons about an arbitrary number of entities and
//! agents with a fixed parameter count. Each invocation consumes the pair's
//! own memory slot and produces its replacement; pairs are independent, so
//! iteration order over targets never changes the result.

use anyhow::{anyhow, Result};
use tch::{
    nn::{self, Module, RNN},
    Tensor,
};

/// Architecture parameters for one processing channel
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Width of the per-pair input feature vector
    pub input_size: i64,
    /// Width of the recurrent hidden state (the memory slot)
    pub memory_size: i64,
    /// Width of the output feature vector
    pub feat_size: i64,
}

impl ProcessorConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.input_size <= 0 {
            return Err(anyhow!("input_size must be positive"));
        }
        if self.memory_size <= 0 {
            return Err(anyhow!("memory_size must be positive"));
        }
        if self.feat_size <= 0 {
            return Err(anyhow!("feat_size must be positive"));
        }
        Ok(())
    }
}

/// Weight-shared recurrent cell for one relationship channel
///
/// Maps (input features, prior memory) to (output features, new memory).
/// The GRU advances the pair's memory; a small feed-forward head turns the
/// new memory into the output feature vector.
pub struct PairwiseProcessor {
    cell: nn::GRU,
    feed_forward: nn::Sequential,
}

impl PairwiseProcessor {
    /// Build the processor under the given variable-store path
    pub fn new(vs: &nn::Path, config: &ProcessorConfig) -> Self {
        let cell = nn::gru(vs / "cell", config.input_size, config.memory_size, Default::default());
        let feed_forward = nn::seq()
            .add(nn::linear(
                vs / "ff1",
                config.memory_size,
                config.feat_size,
                Default::default(),
            ))
            .add_fn(|x| x.elu())
            .add(nn::linear(vs / "ff2", config.feat_size, config.feat_size, Default::default()));
        Self { cell, feed_forward }
    }

    /// Process one pair for one timestep
    ///
    /// # Arguments
    ///
    /// * `input` - Per-pair input features `[batch, input_size]`
    /// * `memory` - The pair's prior memory `[batch, memory_size]`
    ///
    /// Returns `(features [batch, feat_size], new_memory [batch, memory_size])`.
    pub fn forward(&self, input: &Tensor, memory: &Tensor) -> (Tensor, Tensor) {
        let state = nn::GRUState(memory.unsqueeze(0));
        let new_memory = self.cell.step(input, &state).0.squeeze_dim(0);
        let features = self.feed_forward.forward(&new_memory);
        (features, new_memory)
    }
}

/// Pairwise processor that additionally predicts the target agent's goal
///
/// Used on the utterance channel: listening to another agent both produces
/// the pooled communication feature and a guess at that agent's private
/// goal, which the game prices as part of the step cost.
pub struct GoalPredictingProcessor {
    processor: PairwiseProcessor,
    goal_predictor: nn::Sequential,
}

impl GoalPredictingProcessor {
    /// Build the processor and its goal head
    pub fn new(vs: &nn::Path, config: &ProcessorConfig, goal_size: i64) -> Self {
        let processor = PairwiseProcessor::new(&(vs / "processor"), config);
        let goal_predictor = nn::seq()
            .add(nn::linear(
                vs / "goal1",
                config.feat_size,
                config.feat_size,
                Default::default(),
            ))
            .add_fn(|x| x.elu())
            .add(nn::linear(vs / "goal2", config.feat_size, goal_size, Default::default()));
        Self { processor, goal_predictor }
    }

    /// Process one heard utterance for one timestep
    ///
    /// Returns `(features, new_memory, goal_prediction [batch, goal_size])`.
    pub fn forward(&self, input: &Tensor, memory: &Tensor) -> (Tensor, Tensor, Tensor) {
        let (features, new_memory) = self.processor.forward(input, memory);
        let goal_prediction = self.goal_predictor.forward(&features);
        (features, new_memory, goal_prediction)
    }
}

/// Permutation-invariant reduction over a set of per-target features
///
/// Element-wise max over the target axis, so the pooled vector has a fixed
/// width regardless of how many entities or agents the episode contains and
/// regardless of the order they were processed in.
pub fn pool_max(features: &[Tensor]) -> Tensor {
    Tensor::stack(features, 1).max_dim(1, false).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn config() -> ProcessorConfig {
        ProcessorConfig { input_size: 6, memory_size: 8, feat_size: 10 }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        let bad = ProcessorConfig { input_size: 0, ..config() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let processor = PairwiseProcessor::new(&vs.root(), &config());

        let input = Tensor::randn([4, 6], (Kind::Float, Device::Cpu));
        let memory = Tensor::zeros([4, 8], (Kind::Float, Device::Cpu));
        let (features, new_memory) = processor.forward(&input, &memory);

        assert_eq!(features.size(), vec![4, 10]);
        assert_eq!(new_memory.size(), vec![4, 8]);
    }

    #[test]
    fn test_memory_advances() {
        let vs = nn::VarStore::new(Device::Cpu);
        let processor = PairwiseProcessor::new(&vs.root(), &config());

        let input = Tensor::randn([4, 6], (Kind::Float, Device::Cpu));
        let memory = Tensor::zeros([4, 8], (Kind::Float, Device::Cpu));
        let (_, new_memory) = processor.forward(&input, &memory);

        let moved: f64 =
            (&new_memory - &memory).abs().sum(Kind::Float).try_into().unwrap();
        assert!(moved > 0.0, "GRU step left the memory unchanged");
    }

    #[test]
    fn test_goal_predictor_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let processor = GoalPredictingProcessor::new(&vs.root(), &config(), 3);

        let input = Tensor::randn([2, 6], (Kind::Float, Device::Cpu));
        let memory = Tensor::zeros([2, 8], (Kind::Float, Device::Cpu));
        let (features, new_memory, goal) = processor.forward(&input, &memory);

        assert_eq!(features.size(), vec![2, 10]);
        assert_eq!(new_memory.size(), vec![2, 8]);
        assert_eq!(goal.size(), vec![2, 3]);
    }

    #[test]
    fn test_pooling_is_permutation_invariant() {
        let a = Tensor::randn([4, 10], (Kind::Float, Device::Cpu));
        let b = Tensor::randn([4, 10], (Kind::Float, Device::Cpu));
        let c = Tensor::randn([4, 10], (Kind::Float, Device::Cpu));

        let forward = pool_max(&[a.copy(), b.copy(), c.copy()]);
        let shuffled = pool_max(&[c, a, b]);

        let diff: f64 = (&forward - &shuffled).abs().max().try_into().unwrap();
        assert!(diff < 1e-6);
        assert_eq!(forward.size(), vec![4, 10]);
    }
}
