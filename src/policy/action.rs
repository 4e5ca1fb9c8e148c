//! Per-agent action selection
//!
//! Consumes the pooled physical and utterance features, the agent's private
//! goal, and its action memory; emits a bounded movement vector and, when
//! communication is enabled, a discrete utterance symbol. The discrete
//! choice uses the Gumbel-softmax relaxation in training mode and a
//! deterministic one-hot arg-max in evaluation mode; the mode is an
//! explicit parameter, never ambient state.

use anyhow::{anyhow, Result};
use tch::{
    nn::{self, Module},
    Kind, Tensor,
};

use super::{
    gumbel::gumbel_softmax,
    processing::{PairwiseProcessor, ProcessorConfig},
    Mode,
};

/// Architecture and behavior parameters for the action module
#[derive(Debug, Clone)]
pub struct ActionConfig {
    /// Width of each pooled feature vector
    pub feat_size: i64,
    /// Width of the agent's goal vector
    pub goal_size: i64,
    /// Hidden width of the output heads
    pub hidden_size: i64,
    /// Width of the private action memory slot
    pub memory_size: i64,
    /// Movement vector dimensionality
    pub movement_dim: i64,
    /// Vocabulary size of the discrete utterance symbol
    pub vocab_size: i64,
    /// Whether the utterance channel exists at all
    pub use_utterances: bool,
    /// Scale applied to the tanh-bounded movement output
    pub movement_step: f64,
    /// Temperature of the Gumbel-softmax relaxation
    pub gumbel_temperature: f64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            feat_size: 256,
            goal_size: 3,
            hidden_size: 128,
            memory_size: 32,
            movement_dim: 2,
            vocab_size: 20,
            use_utterances: true,
            movement_step: 2.0,
            gumbel_temperature: 1.0,
        }
    }
}

impl ActionConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.feat_size <= 0 {
            return Err(anyhow!("feat_size must be positive"));
        }
        if self.goal_size <= 0 {
            return Err(anyhow!("goal_size must be positive"));
        }
        if self.hidden_size <= 0 {
            return Err(anyhow!("hidden_size must be positive"));
        }
        if self.memory_size <= 0 {
            return Err(anyhow!("memory_size must be positive"));
        }
        if self.movement_dim <= 0 {
            return Err(anyhow!("movement_dim must be positive"));
        }
        if self.vocab_size <= 0 {
            return Err(anyhow!("vocab_size must be positive"));
        }
        if self.movement_step <= 0.0 {
            return Err(anyhow!("movement_step must be positive"));
        }
        if self.gumbel_temperature <= 0.0 {
            return Err(anyhow!("gumbel_temperature must be positive"));
        }
        Ok(())
    }

    /// Width of the action processor's input vector
    ///
    /// Pooled physical feature ++ goal, plus the pooled utterance feature
    /// when communication is enabled.
    pub fn input_size(&self) -> i64 {
        let comm = if self.use_utterances { self.feat_size } else { 0 };
        self.feat_size + self.goal_size + comm
    }
}

/// One agent step's outputs
pub struct ActionOutput {
    /// Bounded movement vector `[batch, movement_dim]`
    pub movement: Tensor,
    /// Utterance symbol over the vocabulary `[batch, vocab_size]`;
    /// `None` when communication is disabled
    pub utterance: Option<Tensor>,
    /// Replacement for the agent's private action memory
    pub memory: Tensor,
}

/// Movement and utterance selection head, weight-shared across agents
pub struct ActionModule {
    processor: PairwiseProcessor,
    movement_head: nn::Sequential,
    utterance_head: Option<nn::Sequential>,
    config: ActionConfig,
}

impl ActionModule {
    /// Build the module under the given variable-store path
    pub fn new(vs: &nn::Path, config: ActionConfig) -> Self {
        let processor_config = ProcessorConfig {
            input_size: config.input_size(),
            memory_size: config.memory_size,
            feat_size: config.feat_size,
        };
        let processor = PairwiseProcessor::new(&(vs / "processor"), &processor_config);

        let movement_head = nn::seq()
            .add(nn::linear(
                vs / "move1",
                config.feat_size,
                config.hidden_size,
                Default::default(),
            ))
            .add_fn(|x| x.elu())
            .add(nn::linear(
                vs / "move2",
                config.hidden_size,
                config.movement_dim,
                Default::default(),
            ))
            .add_fn(|x| x.tanh());

        let utterance_head = config.use_utterances.then(|| {
            nn::seq()
                .add(nn::linear(
                    vs / "utter1",
                    config.feat_size,
                    config.hidden_size,
                    Default::default(),
                ))
                .add_fn(|x| x.elu())
                .add(nn::linear(
                    vs / "utter2",
                    config.hidden_size,
                    config.vocab_size,
                    Default::default(),
                ))
        });

        Self { processor, movement_head, utterance_head, config }
    }

    /// Advance the private cell and return `(processed, new_memory)`
    ///
    /// The processed vector is the context the utterance engine generates
    /// and scores against.
    pub fn process(
        &self,
        physical_feat: &Tensor,
        utterance_feat: Option<&Tensor>,
        goal: &Tensor,
        memory: &Tensor,
    ) -> (Tensor, Tensor) {
        assert_eq!(
            self.config.use_utterances,
            utterance_feat.is_some(),
            "utterance feature presence must match the communication setting"
        );
        let input = match utterance_feat {
            Some(utterance) => Tensor::cat(&[physical_feat, goal, utterance], 1),
            None => Tensor::cat(&[physical_feat, goal], 1),
        };
        self.processor.forward(&input, memory)
    }

    /// Compute one agent's action for one timestep
    pub fn forward(
        &self,
        physical_feat: &Tensor,
        utterance_feat: Option<&Tensor>,
        goal: &Tensor,
        memory: &Tensor,
        mode: Mode,
    ) -> ActionOutput {
        let (processed, new_memory) = self.process(physical_feat, utterance_feat, goal, memory);

        let movement = self.movement_head.forward(&processed) * self.config.movement_step;

        let utterance = self.utterance_head.as_ref().map(|head| {
            let logits = head.forward(&processed);
            match mode {
                Mode::Training => gumbel_softmax(&logits, self.config.gumbel_temperature),
                Mode::Evaluation => logits
                    .argmax(-1, false)
                    .one_hot(self.config.vocab_size)
                    .to_kind(Kind::Float),
            }
        });

        ActionOutput { movement, utterance, memory: new_memory }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn module(use_utterances: bool) -> (nn::VarStore, ActionModule, ActionConfig) {
        let config = ActionConfig {
            feat_size: 16,
            goal_size: 3,
            hidden_size: 8,
            memory_size: 12,
            movement_dim: 2,
            vocab_size: 5,
            use_utterances,
            ..Default::default()
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let module = ActionModule::new(&vs.root(), config.clone());
        (vs, module, config)
    }

    fn inputs(config: &ActionConfig, comm: bool) -> (Tensor, Option<Tensor>, Tensor, Tensor) {
        let opts = (Kind::Float, Device::Cpu);
        let physical = Tensor::randn([4, config.feat_size], opts);
        let utterance = comm.then(|| Tensor::randn([4, config.feat_size], opts));
        let goal = Tensor::randn([4, config.goal_size], opts);
        let memory = Tensor::zeros([4, config.memory_size], opts);
        (physical, utterance, goal, memory)
    }

    #[test]
    fn test_config_validation() {
        assert!(ActionConfig::default().validate().is_ok());
        let bad = ActionConfig { movement_step: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_forward_with_communication() {
        let (_vs, module, config) = module(true);
        let (physical, utterance, goal, memory) = inputs(&config, true);

        let out = module.forward(&physical, utterance.as_ref(), &goal, &memory, Mode::Training);

        assert_eq!(out.movement.size(), vec![4, 2]);
        assert_eq!(out.memory.size(), vec![4, 12]);
        let symbol = out.utterance.unwrap();
        assert_eq!(symbol.size(), vec![4, 5]);
        let sums: Vec<f32> =
            Vec::try_from(symbol.sum_dim_intlist(-1, false, Kind::Float)).unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_forward_without_communication() {
        let (_vs, module, config) = module(false);
        let (physical, utterance, goal, memory) = inputs(&config, false);

        let out = module.forward(&physical, utterance.as_ref(), &goal, &memory, Mode::Training);
        assert!(out.utterance.is_none());
        assert_eq!(out.movement.size(), vec![4, 2]);
    }

    #[test]
    fn test_evaluation_symbol_is_one_hot() {
        let (_vs, module, config) = module(true);
        let (physical, utterance, goal, memory) = inputs(&config, true);

        let out = module.forward(&physical, utterance.as_ref(), &goal, &memory, Mode::Evaluation);
        let symbol = out.utterance.unwrap();

        let maxes: Vec<f32> = Vec::try_from(symbol.max_dim(-1, false).0).unwrap();
        let sums: Vec<f32> =
            Vec::try_from(symbol.sum_dim_intlist(-1, false, Kind::Float)).unwrap();
        for (max, sum) in maxes.into_iter().zip(sums) {
            assert_eq!(max, 1.0);
            assert_eq!(sum, 1.0);
        }
    }

    #[test]
    fn test_movement_is_bounded_by_step() {
        let (_vs, module, config) = module(false);
        let (physical, _, goal, memory) = inputs(&config, false);

        let out = module.forward(&physical, None, &goal, &memory, Mode::Evaluation);
        let max_abs: f64 = out.movement.abs().max().try_into().unwrap();
        assert!(max_abs <= config.movement_step + 1e-6);
    }
}
