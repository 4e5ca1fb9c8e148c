//! Game collaborator interface
//!
//! The episode orchestrator is generic over the game: physics, reward
//! shaping, and episode construction live on the other side of this trait.
//! The game owns the episode's tensors (observations, entity state, goals,
//! utterances) and the memory bank; the core reads them per (agent, target)
//! pair and prices each timestep through `step_cost`.

use tch::Tensor;

use crate::memory::MemoryBank;

/// One episode's worth of game state and physics
///
/// All returned tensors share the episode's batch dimension; mismatched
/// shapes are an integration defect and fail fast downstream.
pub trait Game {
    /// Shared batch dimension of the episode
    fn batch_size(&self) -> i64;

    /// Number of agents
    fn num_agents(&self) -> i64;

    /// Number of entities (agents plus landmarks)
    fn num_entities(&self) -> i64;

    /// One agent's observation of one entity, `[batch, obs_size]`
    fn observation(&self, agent: i64, entity: i64) -> Tensor;

    /// An entity's physical state, `[batch, phys_size]`
    fn physical(&self, entity: i64) -> Tensor;

    /// An agent's current utterance, `[batch, vocab_size]`
    fn utterance(&self, agent: i64) -> Tensor;

    /// An agent's private goal, `[batch, goal_size]`
    fn goal(&self, agent: i64) -> Tensor;

    /// Entity locations, `[batch, num_entities, 2]` (audit trail only)
    fn locations(&self) -> Tensor;

    /// The episode's relationship memory, allocated by the game
    fn memories(&self) -> &MemoryBank;

    /// Mutable access to the relationship memory
    fn memories_mut(&mut self) -> &mut MemoryBank;

    /// Advance the physics one timestep and price it
    ///
    /// # Arguments
    ///
    /// * `movements` - `[batch, num_entities, movement_dim]`, landmark rows zero
    /// * `goal_predictions` - `[batch, num_agents, num_agents, goal_size]` when
    ///   communication is enabled
    /// * `utterances` - `[batch, num_agents, vocab_size]` when communication
    ///   is enabled; the game stores them for the next timestep's listeners
    /// * `timestep` - Index within the episode horizon
    ///
    /// Returns the per-batch-element cost `[batch]`.
    fn step_cost(
        &mut self,
        movements: &Tensor,
        goal_predictions: Option<&Tensor>,
        utterances: Option<&Tensor>,
        timestep: i64,
    ) -> Tensor;
}

pub mod gather;
