//! # Parley
//!
//! Multi-agent coordination and emergent communication in Rust + libtorch
//!
//! Parley trains a population of cooperating agents end-to-end by
//! backpropagating through whole interaction episodes (via tch-rs). Agents
//! attend to every entity and every other agent through weight-shared
//! recurrent cells with persistent pairwise memory, act through a common
//! action head, and optionally communicate — either with a differentiable
//! one-symbol channel or through a recurrent language model that can be
//! trained on a corpus and then run freely.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley_rl::prelude::*;
//! use tch::Device;
//!
//! let config = EpisodeConfig::new().time_horizon(8).use_utterances(false);
//! let mut orchestrator = EpisodeOrchestrator::new(config).unwrap();
//! let mut game = GatherGame::new(32, 3, 2, 20, 32, Device::Cpu);
//!
//! let outcome = orchestrator.run(&mut game, Mode::Training, None).unwrap();
//! let loss = outcome.total_cost.mean(tch::Kind::Float);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Game collaborator interface and the reference gather game
pub mod env;

/// Per-relationship recurrent memory with copy-on-write updates
pub mod memory;

/// Policy components: pairwise processors, pooling, and the action head
pub mod policy;

/// Dictionary and the recurrent utterance engine
pub mod language;

/// Fixed-horizon episode orchestration and cost accumulation
pub mod episode;

/// Utterance dataset export for language-model pretraining
pub mod dataset;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dataset::UtteranceDatasetWriter;
    pub use crate::env::{gather::GatherGame, Game};
    pub use crate::episode::{EpisodeConfig, EpisodeOrchestrator, EpisodeOutcome};
    pub use crate::language::{Dictionary, EngineMode, UtteranceConfig, UtteranceEngine};
    pub use crate::memory::{Channel, MemoryBank};
    pub use crate::policy::Mode;
}

/// Current version of parley-rl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
