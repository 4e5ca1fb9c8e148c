//! Episode orchestration
//!
//! Drives a fixed-horizon interaction: at every timestep each agent
//! attends to every entity and every other agent through the shared
//! recurrent processors, pools the results, and acts; the game prices the
//! step and the orchestrator accumulates the running cost that training
//! backpropagates through. Timesteps form a strict sequential dependency
//! chain (backpropagation through time); parallelism lives in the batch
//! dimension and is the numeric substrate's business.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tch::{
    nn::{self, OptimizerConfig},
    Device, IndexOp, Kind, Tensor,
};

use crate::{
    dataset::UtteranceDatasetWriter,
    env::Game,
    language::dictionary::Dictionary,
    memory::Channel,
    policy::{
        action::{ActionConfig, ActionModule},
        processing::{pool_max, GoalPredictingProcessor, PairwiseProcessor, ProcessorConfig},
        Mode,
    },
};

pub mod penalty;

use penalty::WordCountPenalty;

/// Episode-level configuration
///
/// Covers the horizon, the communication switches, and every width the
/// policy networks are built from.
#[derive(Debug, Clone)]
pub struct EpisodeConfig {
    /// Number of timesteps per episode
    pub time_horizon: i64,
    /// Whether agents produce and hear utterances at all
    pub use_utterances: bool,
    /// Whether vocabulary usage is charged into the cost
    pub penalize_words: bool,
    /// Utterance vocabulary size
    pub vocab_size: i64,
    /// Width of each agent's goal vector
    pub goal_size: i64,
    /// Movement vector dimensionality
    pub movement_dim: i64,
    /// Width of an agent's observation of one entity
    pub obs_size: i64,
    /// Width of an entity's physical state
    pub phys_size: i64,
    /// Width of every relationship memory slot
    pub memory_size: i64,
    /// Width of the pooled feature vectors
    pub feat_size: i64,
    /// Hidden width of the action heads
    pub hidden_size: i64,
    /// Scale applied to the bounded movement output
    pub movement_step: f64,
    /// Temperature of the Gumbel-softmax utterance relaxation
    pub gumbel_temperature: f64,
    /// Coefficient of the word-count penalty
    pub word_cost: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            time_horizon: 16,
            use_utterances: true,
            penalize_words: false,
            vocab_size: 20,
            goal_size: 2,
            movement_dim: 2,
            obs_size: 2,
            phys_size: 3,
            memory_size: 32,
            feat_size: 256,
            hidden_size: 128,
            movement_step: 2.0,
            gumbel_temperature: 1.0,
            word_cost: 0.1,
        }
    }
}

impl EpisodeConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.time_horizon <= 0 {
            return Err(anyhow!("time_horizon must be positive"));
        }
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("goal_size", self.goal_size),
            ("movement_dim", self.movement_dim),
            ("obs_size", self.obs_size),
            ("phys_size", self.phys_size),
            ("memory_size", self.memory_size),
            ("feat_size", self.feat_size),
            ("hidden_size", self.hidden_size),
        ] {
            if value <= 0 {
                return Err(anyhow!("{} must be positive", name));
            }
        }
        if self.movement_step <= 0.0 {
            return Err(anyhow!("movement_step must be positive"));
        }
        if self.gumbel_temperature <= 0.0 {
            return Err(anyhow!("gumbel_temperature must be positive"));
        }
        if self.word_cost < 0.0 {
            return Err(anyhow!("word_cost must be non-negative"));
        }
        if self.penalize_words && !self.use_utterances {
            return Err(anyhow!("penalize_words requires use_utterances"));
        }
        Ok(())
    }

    /// Set the episode horizon
    pub fn time_horizon(mut self, steps: i64) -> Self {
        self.time_horizon = steps;
        self
    }

    /// Enable or disable the utterance channel
    pub fn use_utterances(mut self, enabled: bool) -> Self {
        self.use_utterances = enabled;
        self
    }

    /// Enable or disable the word-count penalty
    pub fn penalize_words(mut self, enabled: bool) -> Self {
        self.penalize_words = enabled;
        self
    }

    /// Set the vocabulary size
    pub fn vocab_size(mut self, size: i64) -> Self {
        self.vocab_size = size;
        self
    }

    /// Set the pooled feature width
    pub fn feat_size(mut self, size: i64) -> Self {
        self.feat_size = size;
        self
    }

    /// Set the relationship memory width
    pub fn memory_size(mut self, size: i64) -> Self {
        self.memory_size = size;
        self
    }
}

/// One evaluation-mode timestep snapshot
///
/// Detached from the computation graph; this is the audit trail, not part
/// of training.
#[derive(Debug)]
pub struct TimestepRecord {
    /// Entity locations after the move, `[batch, num_entities, 2]`
    pub locations: Tensor,
    /// Movements taken, `[batch, num_entities, movement_dim]`
    pub movements: Tensor,
    /// This timestep's cost, `[batch]`
    pub cost: Tensor,
    /// Utterances spoken, `[batch, num_agents, vocab]`, when enabled
    pub utterances: Option<Tensor>,
}

/// Result of one full episode
pub struct EpisodeOutcome {
    /// Running cost summed over all timesteps, `[batch]`
    pub total_cost: Tensor,
    /// Per-timestep snapshots; empty outside evaluation mode
    pub records: Vec<TimestepRecord>,
}

#[derive(Serialize)]
struct TraceEntry {
    timestep: usize,
    cost: Vec<f32>,
    locations: Vec<f32>,
    movements: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    utterances: Option<Vec<f32>>,
}

impl EpisodeOutcome {
    /// Serialize the evaluation records to a JSON file
    pub fn save_trace<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let entries: Vec<TraceEntry> = self
            .records
            .iter()
            .enumerate()
            .map(|(timestep, record)| TraceEntry {
                timestep,
                cost: tensor_to_vec(&record.cost),
                locations: tensor_to_vec(&record.locations),
                movements: tensor_to_vec(&record.movements),
                utterances: record.utterances.as_ref().map(tensor_to_vec),
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn tensor_to_vec(tensor: &Tensor) -> Vec<f32> {
    let flat = tensor.to_device(Device::Cpu).to_kind(Kind::Float).contiguous().view(-1);
    Vec::try_from(flat).expect("flattened tensor converts to Vec<f32>")
}

/// Fixed-horizon multi-agent episode driver
///
/// Owns the policy parameter set (one `VarStore` shared by the pairwise
/// processors and the action module) and the word-usage accounting; the
/// game owns everything else.
pub struct EpisodeOrchestrator {
    vs: nn::VarStore,
    config: EpisodeConfig,
    physical_processor: PairwiseProcessor,
    utterance_processor: Option<GoalPredictingProcessor>,
    action: ActionModule,
    word_penalty: Option<WordCountPenalty>,
    device: Device,
}

impl EpisodeOrchestrator {
    /// Build the orchestrator and its policy networks
    pub fn new(config: EpisodeConfig) -> Result<Self> {
        config.validate()?;
        let device = Device::cuda_if_available();
        tracing::info!("EpisodeOrchestrator using device: {:?}", device);

        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let physical_processor = PairwiseProcessor::new(
            &(&root / "physical"),
            &ProcessorConfig {
                input_size: config.obs_size + config.phys_size,
                memory_size: config.memory_size,
                feat_size: config.feat_size,
            },
        );

        let utterance_processor = if config.use_utterances {
            Some(GoalPredictingProcessor::new(
                &(&root / "utterance"),
                &ProcessorConfig {
                    input_size: config.vocab_size,
                    memory_size: config.memory_size,
                    feat_size: config.feat_size,
                },
                config.goal_size,
            ))
        } else {
            None
        };

        let action = ActionModule::new(
            &(&root / "action"),
            ActionConfig {
                feat_size: config.feat_size,
                goal_size: config.goal_size,
                hidden_size: config.hidden_size,
                memory_size: config.memory_size,
                movement_dim: config.movement_dim,
                vocab_size: config.vocab_size,
                use_utterances: config.use_utterances,
                movement_step: config.movement_step,
                gumbel_temperature: config.gumbel_temperature,
            },
        );

        let word_penalty = (config.use_utterances && config.penalize_words)
            .then(|| WordCountPenalty::new(config.vocab_size, config.word_cost, device));

        Ok(Self {
            vs,
            config,
            physical_processor,
            utterance_processor,
            action,
            word_penalty,
            device,
        })
    }

    /// The orchestrator's configuration
    pub fn config(&self) -> &EpisodeConfig {
        &self.config
    }

    /// Zero the word-usage accumulators for a new episode
    ///
    /// The cost accumulator itself is functional: every `run` starts a
    /// fresh one and returns it, so only the usage counters carry state
    /// between episodes.
    pub fn reset(&mut self) {
        if let Some(penalty) = &mut self.word_penalty {
            penalty.reset();
        }
    }

    /// Run one full episode against a game
    ///
    /// In training mode the discrete choices use the differentiable
    /// relaxation and no snapshots are taken; in evaluation mode choices
    /// are arg-max and every timestep is recorded. When `dataset` is
    /// provided, each agent's spoken symbol is decoded through the
    /// dictionary and handed to the writer.
    pub fn run<G: Game>(
        &mut self,
        game: &mut G,
        mode: Mode,
        mut dataset: Option<(&Dictionary, &mut UtteranceDatasetWriter)>,
    ) -> Result<EpisodeOutcome> {
        let batch_size = game.batch_size();
        let num_agents = game.num_agents();
        let num_entities = game.num_entities();
        assert_eq!(
            game.memories().memory_size(),
            self.config.memory_size,
            "game memory bank width does not match the configured memory_size"
        );
        if dataset.is_some() && !self.config.use_utterances {
            return Err(anyhow!("dataset export requires use_utterances"));
        }

        let mut total_cost = Tensor::zeros([batch_size], (Kind::Float, self.device));
        let mut records = Vec::new();

        for timestep in 0..self.config.time_horizon {
            let mut movements = Vec::with_capacity(num_agents as usize);
            let mut utterances = Vec::with_capacity(num_agents as usize);
            let mut goal_predictions = Vec::with_capacity(num_agents as usize);

            for agent in 0..num_agents {
                let physical_feat = self.physical_feature(game, agent);
                let utterance_feat = match &self.utterance_processor {
                    Some(processor) => {
                        let (feat, predictions) =
                            Self::utterance_feature(processor, game, agent);
                        goal_predictions.push(predictions);
                        Some(feat)
                    }
                    None => None,
                };

                let memory = game.memories().read(Channel::Action, agent, None);
                let output = self.action.forward(
                    &physical_feat,
                    utterance_feat.as_ref(),
                    &game.goal(agent),
                    &memory,
                    mode,
                );
                game.memories_mut().update(Channel::Action, agent, None, &output.memory);

                movements.push(output.movement);
                if let Some(utterance) = output.utterance {
                    utterances.push(utterance);
                }
            }

            // [batch, num_entities, movement_dim]; landmark rows stay zero.
            let mut movement_tensor = Tensor::stack(&movements, 1);
            if num_entities > num_agents {
                let still = Tensor::zeros(
                    [batch_size, num_entities - num_agents, self.config.movement_dim],
                    (Kind::Float, self.device),
                );
                movement_tensor = Tensor::cat(&[movement_tensor, still], 1);
            }

            let utterance_tensor =
                (!utterances.is_empty()).then(|| Tensor::stack(&utterances, 1));
            let prediction_tensor =
                (!goal_predictions.is_empty()).then(|| Tensor::stack(&goal_predictions, 1));

            if let Some((dictionary, writer)) = dataset.as_mut() {
                let spoken = utterance_tensor.as_ref().unwrap();
                for agent in 0..num_agents {
                    let symbols: Vec<i64> =
                        Vec::try_from(spoken.i((.., agent)).argmax(-1, false)).unwrap();
                    let rows: Vec<String> = symbols
                        .into_iter()
                        .map(|symbol| dictionary.word(symbol).to_string())
                        .collect();
                    writer.record(agent, timestep, &rows);
                }
            }

            let mut cost = game.step_cost(
                &movement_tensor,
                prediction_tensor.as_ref(),
                utterance_tensor.as_ref(),
                timestep,
            );
            if let Some(penalty) = &mut self.word_penalty {
                cost = cost + penalty.forward(utterance_tensor.as_ref().unwrap());
            }
            total_cost = total_cost + &cost;

            if mode == Mode::Evaluation {
                records.push(TimestepRecord {
                    locations: game.locations().detach(),
                    movements: movement_tensor.detach(),
                    cost: cost.detach(),
                    utterances: utterance_tensor.as_ref().map(|u| u.detach()),
                });
            }
        }

        Ok(EpisodeOutcome { total_cost, records })
    }

    /// Pool one agent's view of every entity through the physical channel
    fn physical_feature<G: Game>(&self, game: &mut G, agent: i64) -> Tensor {
        let num_entities = game.num_entities();
        let mut outputs = Vec::with_capacity(num_entities as usize);
        for entity in 0..num_entities {
            let input =
                Tensor::cat(&[game.observation(agent, entity), game.physical(entity)], 1);
            let memory = game.memories().read(Channel::Physical, agent, Some(entity));
            let (features, new_memory) = self.physical_processor.forward(&input, &memory);
            game.memories_mut().update(Channel::Physical, agent, Some(entity), &new_memory);
            outputs.push(features);
        }
        pool_max(&outputs)
    }

    /// Pool what one agent hears from every agent through the utterance channel
    ///
    /// Returns the pooled feature and this listener's goal predictions,
    /// `[batch, num_agents, goal_size]`.
    fn utterance_feature<G: Game>(
        processor: &GoalPredictingProcessor,
        game: &mut G,
        agent: i64,
    ) -> (Tensor, Tensor) {
        let num_agents = game.num_agents();
        let mut outputs = Vec::with_capacity(num_agents as usize);
        let mut predictions = Vec::with_capacity(num_agents as usize);
        for speaker in 0..num_agents {
            let heard = game.utterance(speaker);
            let memory = game.memories().read(Channel::Utterance, agent, Some(speaker));
            let (features, new_memory, predicted_goal) = processor.forward(&heard, &memory);
            game.memories_mut().update(Channel::Utterance, agent, Some(speaker), &new_memory);
            outputs.push(features);
            predictions.push(predicted_goal);
        }
        (pool_max(&outputs), Tensor::stack(&predictions, 1))
    }

    /// Create an Adam optimizer over the policy parameters
    pub fn optimizer(&self, learning_rate: f64) -> Result<nn::Optimizer> {
        Ok(nn::Adam::default().build(&self.vs, learning_rate)?)
    }

    /// Reference to the policy variable store
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Save policy parameters to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs.save(path)?;
        Ok(())
    }

    /// Load policy parameters from a file
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.vs.load(path)?;
        Ok(())
    }
}
