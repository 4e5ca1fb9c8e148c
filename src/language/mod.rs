//! Symbolic language: dictionary and the recurrent utterance engine
//!
//! The dictionary is the read-only surface of the corpus collaborator;
//! the engine is the recurrent language model that scores target
//! sentences during training and free-runs during self-play.

pub mod dictionary;
pub mod engine;

pub use dictionary::Dictionary;
pub use engine::{EngineMode, UtteranceConfig, UtteranceEngine};
