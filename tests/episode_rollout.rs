//! End-to-end episode tests against the reference gather game
//!
//! These exercise the full per-timestep pipeline: pairwise processing over
//! entities and agents, pooling, action selection, game costing, and the
//! running total the training signal backpropagates through.

use parley_rl::prelude::*;
use tch::{Device, Kind};

const BATCH: i64 = 2;
const AGENTS: i64 = 3;
const LANDMARKS: i64 = 2;
const VOCAB: i64 = 8;
const MEMORY: i64 = 16;
const HORIZON: i64 = 5;

fn small_config(use_utterances: bool) -> EpisodeConfig {
    EpisodeConfig {
        hidden_size: 16,
        ..EpisodeConfig::new()
            .time_horizon(HORIZON)
            .use_utterances(use_utterances)
            .vocab_size(VOCAB)
            .feat_size(32)
            .memory_size(MEMORY)
    }
}

fn game() -> GatherGame {
    GatherGame::new(BATCH, AGENTS, LANDMARKS, VOCAB, MEMORY, Device::Cpu)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

#[test]
fn test_episode_without_communication() {
    init_tracing();
    let mut orchestrator = EpisodeOrchestrator::new(small_config(false)).unwrap();
    let mut game = game();

    let outcome = orchestrator.run(&mut game, Mode::Evaluation, None).unwrap();

    assert_eq!(outcome.total_cost.size(), vec![BATCH]);
    assert_eq!(outcome.records.len(), HORIZON as usize);
    for record in &outcome.records {
        assert_eq!(record.movements.size(), vec![BATCH, AGENTS + LANDMARKS, 2]);
        assert_eq!(record.locations.size(), vec![BATCH, AGENTS + LANDMARKS, 2]);
        assert_eq!(record.cost.size(), vec![BATCH]);
        assert!(record.utterances.is_none());
    }
}

#[test]
fn test_training_mode_takes_no_snapshots() {
    let mut orchestrator = EpisodeOrchestrator::new(small_config(false)).unwrap();
    let mut game = game();

    let outcome = orchestrator.run(&mut game, Mode::Training, None).unwrap();
    assert!(outcome.records.is_empty());
}

#[test]
fn test_total_cost_gradient_reaches_policy() {
    let mut orchestrator = EpisodeOrchestrator::new(small_config(false)).unwrap();
    let mut game = game();

    let outcome = orchestrator.run(&mut game, Mode::Training, None).unwrap();
    outcome.total_cost.sum(Kind::Float).backward();

    let grad_norm: f64 = orchestrator
        .var_store()
        .trainable_variables()
        .iter()
        .map(|variable| {
            let grad = variable.grad();
            if grad.defined() {
                grad.abs().sum(Kind::Float).try_into().unwrap()
            } else {
                0.0
            }
        })
        .sum();
    assert!(grad_norm > 0.0, "episode cost carries no gradient to the policy");
}

#[test]
fn test_cost_accumulates_exactly() {
    let mut orchestrator = EpisodeOrchestrator::new(small_config(true)).unwrap();
    let mut game = game();

    let outcome = orchestrator.run(&mut game, Mode::Evaluation, None).unwrap();

    let mut summed = vec![0.0_f64; BATCH as usize];
    for record in &outcome.records {
        let step: Vec<f32> = Vec::try_from(&record.cost).unwrap();
        for (total, value) in summed.iter_mut().zip(step) {
            *total += value as f64;
        }
    }
    let total: Vec<f32> = Vec::try_from(&outcome.total_cost).unwrap();
    for (expected, actual) in summed.iter().zip(total) {
        assert!((expected - actual as f64).abs() < 1e-3);
    }
}

#[test]
fn test_episode_with_communication_and_penalty() {
    let config = small_config(true).penalize_words(true);
    let mut orchestrator = EpisodeOrchestrator::new(config).unwrap();
    let mut game = game();

    let outcome = orchestrator.run(&mut game, Mode::Evaluation, None).unwrap();
    for record in &outcome.records {
        let utterances = record.utterances.as_ref().unwrap();
        assert_eq!(utterances.size(), vec![BATCH, AGENTS, VOCAB]);
    }
    let total: f64 = outcome.total_cost.sum(Kind::Float).try_into().unwrap();
    assert!(total.is_finite());

    orchestrator.reset();
}

#[test]
fn test_training_reduces_cost_on_fixed_layout() {
    init_tracing();
    let mut orchestrator = EpisodeOrchestrator::new(small_config(false)).unwrap();
    let mut optimizer = orchestrator.optimizer(1e-2).unwrap();

    let episode_cost = |orchestrator: &mut EpisodeOrchestrator,
                        optimizer: &mut tch::nn::Optimizer|
     -> f64 {
        // Re-seeding gives every iteration the same entity layout, so the
        // only thing changing between episodes is the policy.
        tch::manual_seed(7);
        let mut game = game();
        let outcome = orchestrator.run(&mut game, Mode::Training, None).unwrap();
        let loss = outcome.total_cost.mean(Kind::Float);
        let value = f64::try_from(&loss).unwrap();
        optimizer.zero_grad();
        loss.backward();
        optimizer.step();
        value
    };

    let first = episode_cost(&mut orchestrator, &mut optimizer);
    let mut last = first;
    for _ in 0..25 {
        last = episode_cost(&mut orchestrator, &mut optimizer);
    }
    assert!(last < first, "training did not reduce episode cost: {} -> {}", first, last);
}

#[test]
fn test_dataset_export_decodes_symbols() {
    let dictionary = Dictionary::new(["red", "green", "blue", "circle", "triangle"]);
    assert_eq!(dictionary.len(), VOCAB);

    let mut orchestrator = EpisodeOrchestrator::new(small_config(true)).unwrap();
    let mut game = game();
    let mut writer = UtteranceDatasetWriter::new();

    orchestrator
        .run(&mut game, Mode::Evaluation, Some((&dictionary, &mut writer)))
        .unwrap();
    assert_eq!(writer.len(), (AGENTS * HORIZON) as usize);

    let path = std::env::temp_dir().join("parley_test_episode_dataset.csv");
    writer.write(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.lines().count() > 1);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_policy_checkpoint_round_trip() {
    let orchestrator = EpisodeOrchestrator::new(small_config(false)).unwrap();
    let path = std::env::temp_dir().join("parley_test_policy.safetensors");
    orchestrator.save(&path).unwrap();

    let mut restored = EpisodeOrchestrator::new(small_config(false)).unwrap();
    restored.load(&path).unwrap();

    let originals = orchestrator.var_store().variables();
    for (name, variable) in restored.var_store().variables() {
        let original = originals.get(&name).expect("restored variable missing from source");
        let diff: f64 =
            (&variable - original).abs().sum(Kind::Float).try_into().unwrap();
        assert!(diff < 1e-6, "variable {} changed across save/load", name);
    }

    std::fs::remove_file(path).ok();
}

#[test]
fn test_trace_export() {
    let mut orchestrator = EpisodeOrchestrator::new(small_config(true)).unwrap();
    let mut game = game();
    let outcome = orchestrator.run(&mut game, Mode::Evaluation, None).unwrap();

    let path = std::env::temp_dir().join("parley_test_trace.json");
    outcome.save_trace(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"timestep\""));
    assert!(contents.contains("\"utterances\""));
    std::fs::remove_file(path).ok();
}
