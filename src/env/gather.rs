//! Reference gather game
//!
//! A minimal game collaborator used by the integration tests and demos:
//! agents and landmarks scatter over a 2-D field, every agent is privately
//! assigned one landmark, and the step cost is the squared distance between
//! each agent and its assignment after the move. When communication is on,
//! the game also prices how well listeners guess the speakers' goals.

use tch::{Device, IndexOp, Kind, Tensor};

use super::Game;
use crate::memory::MemoryBank;

/// Observation width: the observed entity's position relative to the agent
pub const OBS_SIZE: i64 = 2;
/// Physical-state width: color/shape features
pub const PHYS_SIZE: i64 = 3;
/// Goal width: a landmark location to reach
pub const GOAL_SIZE: i64 = 2;

const FIELD_EXTENT: f64 = 10.0;

/// Landmark-reaching game over a continuous 2-D field
#[derive(Debug)]
pub struct GatherGame {
    batch_size: i64,
    num_agents: i64,
    num_entities: i64,
    locations: Tensor,
    physical: Tensor,
    goals: Tensor,
    utterances: Tensor,
    memories: MemoryBank,
}

impl GatherGame {
    /// Construct one episode's worth of game state
    ///
    /// Locations and entity features are drawn uniformly; the memory bank
    /// is allocated zeroed, as the orchestrator expects at episode start.
    pub fn new(
        batch_size: i64,
        num_agents: i64,
        num_landmarks: i64,
        vocab_size: i64,
        memory_size: i64,
        device: Device,
    ) -> Self {
        let num_entities = num_agents + num_landmarks;
        let opts = (Kind::Float, device);

        let locations = Tensor::rand([batch_size, num_entities, 2], opts) * FIELD_EXTENT
            - FIELD_EXTENT / 2.0;
        let physical = Tensor::rand([batch_size, num_entities, PHYS_SIZE], opts);

        // Each agent is privately assigned one landmark; its goal vector is
        // that landmark's location.
        let assignment = Tensor::randint(
            num_landmarks,
            [batch_size, num_agents, 1],
            (Kind::Int64, device),
        ) + num_agents;
        let goals = locations
            .gather(1, &assignment.expand([batch_size, num_agents, 2], false), false)
            .detach();

        let utterances = Tensor::zeros([batch_size, num_agents, vocab_size], opts);
        let memories =
            MemoryBank::new(batch_size, num_agents, num_entities, memory_size, device);

        Self {
            batch_size,
            num_agents,
            num_entities,
            locations,
            physical,
            goals,
            utterances,
            memories,
        }
    }
}

impl Game for GatherGame {
    fn batch_size(&self) -> i64 {
        self.batch_size
    }

    fn num_agents(&self) -> i64 {
        self.num_agents
    }

    fn num_entities(&self) -> i64 {
        self.num_entities
    }

    fn observation(&self, agent: i64, entity: i64) -> Tensor {
        self.locations.i((.., entity)) - self.locations.i((.., agent))
    }

    fn physical(&self, entity: i64) -> Tensor {
        self.physical.i((.., entity))
    }

    fn utterance(&self, agent: i64) -> Tensor {
        self.utterances.i((.., agent))
    }

    fn goal(&self, agent: i64) -> Tensor {
        self.goals.i((.., agent))
    }

    fn locations(&self) -> Tensor {
        self.locations.shallow_clone()
    }

    fn memories(&self) -> &MemoryBank {
        &self.memories
    }

    fn memories_mut(&mut self) -> &mut MemoryBank {
        &mut self.memories
    }

    fn step_cost(
        &mut self,
        movements: &Tensor,
        goal_predictions: Option<&Tensor>,
        utterances: Option<&Tensor>,
        _timestep: i64,
    ) -> Tensor {
        assert_eq!(
            movements.size()[..2],
            [self.batch_size, self.num_entities],
            "movement tensor shape mismatch"
        );

        // Landmark rows arrive zeroed, so adding the full tensor moves
        // agents only. The previous locations tensor stays intact for any
        // holder of it.
        self.locations = &self.locations + movements;
        if let Some(utterances) = utterances {
            self.utterances = utterances.shallow_clone();
        }

        let agent_locations = self.locations.narrow(1, 0, self.num_agents);
        let mut cost = (agent_locations - &self.goals)
            .square()
            .sum_dim_intlist([1, 2].as_slice(), false, Kind::Float);

        if let Some(predictions) = goal_predictions {
            let truth = self.goals.unsqueeze(1);
            cost = cost
                + (predictions - truth)
                    .square()
                    .sum_dim_intlist([1, 2, 3].as_slice(), false, Kind::Float);
        }

        cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Channel;

    fn game() -> GatherGame {
        GatherGame::new(2, 3, 2, 8, 4, Device::Cpu)
    }

    #[test]
    fn test_tensor_shapes() {
        let game = game();
        assert_eq!(game.num_entities(), 5);
        assert_eq!(game.observation(0, 4).size(), vec![2, OBS_SIZE]);
        assert_eq!(game.physical(1).size(), vec![2, PHYS_SIZE]);
        assert_eq!(game.goal(2).size(), vec![2, GOAL_SIZE]);
        assert_eq!(game.utterance(0).size(), vec![2, 8]);
        assert_eq!(game.locations().size(), vec![2, 5, 2]);
        assert_eq!(game.memories().read(Channel::Physical, 0, Some(3)).size(), vec![2, 4]);
    }

    #[test]
    fn test_step_cost_shape_and_gradient() {
        let mut game = game();
        let movements =
            Tensor::zeros([2, 5, 2], (Kind::Float, Device::Cpu)).set_requires_grad(true);

        let cost = game.step_cost(&movements, None, None, 0);
        assert_eq!(cost.size(), vec![2]);

        cost.sum(Kind::Float).backward();
        let grad_norm: f64 = movements.grad().abs().sum(Kind::Float).try_into().unwrap();
        assert!(grad_norm > 0.0, "cost carries no gradient back to movements");
    }

    #[test]
    fn test_moving_toward_goal_reduces_cost() {
        let mut game = game();
        let idle = Tensor::zeros([2, 5, 2], (Kind::Float, Device::Cpu));
        let baseline = game.step_cost(&idle, None, None, 0);

        // Step every agent exactly onto its goal.
        let to_goal = &game.goals - game.locations.narrow(1, 0, 3);
        let movements = Tensor::cat(
            &[to_goal, Tensor::zeros([2, 2, 2], (Kind::Float, Device::Cpu))],
            1,
        );
        let cost = game.step_cost(&movements, None, None, 1);

        let baseline: f64 = baseline.sum(Kind::Float).try_into().unwrap();
        let cost: f64 = cost.sum(Kind::Float).try_into().unwrap();
        assert!(cost < baseline);
        assert!(cost < 1e-6);
    }

    #[test]
    fn test_utterances_are_stored_for_next_step() {
        let mut game = game();
        let movements = Tensor::zeros([2, 5, 2], (Kind::Float, Device::Cpu));
        let spoken = Tensor::rand([2, 3, 8], (Kind::Float, Device::Cpu));

        game.step_cost(&movements, None, Some(&spoken), 0);
        let heard = game.utterance(1);
        let equal: f64 = heard.eq_tensor(&spoken.i((.., 1))).all().try_into().unwrap();
        assert_eq!(equal, 1.0);
    }
}
