//! Persistent pairwise relationship memory
//!
//! Every agent keeps one recurrent hidden state per relationship it tracks:
//! one per observed entity (physical channel), one per other agent
//! (utterance channel), and one private slot for its own action cell
//! (action channel). The bank is owned by the game for the lifetime of an
//! episode and is replaced wholesale on every write.

use tch::{Device, IndexOp, Kind, Tensor};

/// Relationship channel selector
///
/// Each channel has independent storage and an independent recurrent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Agent-to-entity physical observation memory
    Physical,
    /// Agent-to-agent utterance memory
    Utterance,
    /// Private per-agent action memory (no target key)
    Action,
}

/// Recurrent memory bank for all relationship channels
///
/// # Storage Layout
///
/// - physical: `[batch, num_agents, num_entities, memory_size]`
/// - utterance: `[batch, num_agents, num_agents, memory_size]`
/// - action: `[batch, num_agents, memory_size]`
///
/// Updates are copy-on-write: each write builds a full replacement tensor
/// for the channel with exactly one relationship changed, using the
/// out-of-place `index_put`. Overwriting a slice of a tensor that already
/// participates in the autograd graph would sever gradient flow to every
/// untouched slot, so in-place writes are never used here.
#[derive(Debug)]
pub struct MemoryBank {
    physical: Tensor,
    utterance: Tensor,
    action: Tensor,
    num_agents: i64,
    num_entities: i64,
    memory_size: i64,
}

impl MemoryBank {
    /// Allocate a zeroed bank for one episode
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Shared batch dimension of the episode
    /// * `num_agents` - Number of agents in the episode
    /// * `num_entities` - Number of entities (agents + landmarks)
    /// * `memory_size` - Width of each relationship's hidden state
    /// * `device` - Device the episode's tensors live on
    pub fn new(
        batch_size: i64,
        num_agents: i64,
        num_entities: i64,
        memory_size: i64,
        device: Device,
    ) -> Self {
        let opts = (Kind::Float, device);
        Self {
            physical: Tensor::zeros([batch_size, num_agents, num_entities, memory_size], opts),
            utterance: Tensor::zeros([batch_size, num_agents, num_agents, memory_size], opts),
            action: Tensor::zeros([batch_size, num_agents, memory_size], opts),
            num_agents,
            num_entities,
            memory_size,
        }
    }

    /// Width of each relationship's hidden state
    pub fn memory_size(&self) -> i64 {
        self.memory_size
    }

    /// Read the memory for one relationship, shape `[batch, memory_size]`
    ///
    /// `target` keys the relationship for the pairwise channels and must be
    /// omitted for the action channel. Out-of-range keys are a programming
    /// error and panic.
    pub fn read(&self, channel: Channel, agent: i64, target: Option<i64>) -> Tensor {
        self.check_key(channel, agent, target);
        match channel {
            Channel::Physical => self.physical.i((.., agent, target.unwrap())),
            Channel::Utterance => self.utterance.i((.., agent, target.unwrap())),
            Channel::Action => self.action.i((.., agent)),
        }
    }

    /// Replace the memory for one relationship
    ///
    /// Builds a new channel tensor with only the keyed slot changed and
    /// swaps it in; the previous tensor (and anything holding it) is left
    /// untouched, value and gradient path both.
    pub fn update(&mut self, channel: Channel, agent: i64, target: Option<i64>, state: &Tensor) {
        self.check_key(channel, agent, target);
        debug_assert_eq!(
            state.size()[1],
            self.memory_size,
            "memory state width {} != configured {}",
            state.size()[1],
            self.memory_size
        );
        let agent_idx = Tensor::from(agent);
        match channel {
            Channel::Physical => {
                let target_idx = Tensor::from(target.unwrap());
                self.physical =
                    self.physical.index_put(&[None, Some(agent_idx), Some(target_idx)], state, false);
            }
            Channel::Utterance => {
                let target_idx = Tensor::from(target.unwrap());
                self.utterance =
                    self.utterance.index_put(&[None, Some(agent_idx), Some(target_idx)], state, false);
            }
            Channel::Action => {
                self.action = self.action.index_put(&[None, Some(agent_idx)], state, false);
            }
        }
    }

    fn check_key(&self, channel: Channel, agent: i64, target: Option<i64>) {
        assert!(
            (0..self.num_agents).contains(&agent),
            "agent {} out of range (num_agents = {})",
            agent,
            self.num_agents
        );
        match channel {
            Channel::Physical => {
                let t = target.expect("physical channel is keyed by (agent, entity)");
                assert!(
                    (0..self.num_entities).contains(&t),
                    "entity {} out of range (num_entities = {})",
                    t,
                    self.num_entities
                );
            }
            Channel::Utterance => {
                let t = target.expect("utterance channel is keyed by (agent, agent)");
                assert!(
                    (0..self.num_agents).contains(&t),
                    "target agent {} out of range (num_agents = {})",
                    t,
                    self.num_agents
                );
            }
            Channel::Action => {
                assert!(target.is_none(), "action channel is keyed by agent alone");
            }
        }
    }
}
