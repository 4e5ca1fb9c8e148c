//! Recurrent utterance generation and scoring
//!
//! One recurrent language model with two named behaviors:
//!
//! - **Scoring**: teacher-forced evaluation of a supplied sentence against
//!   a context vector, with a gradient step, norm clipping, and a
//!   checkpoint write — this is how the model is trained on a corpus.
//! - **Generation**: free-running autoregressive sampling from the same
//!   context, temperature-scaled, with the start token injected rather
//!   than sampled. No optimizer step ever happens on this path.
//!
//! The writer cell consumes the previous token's embedding concatenated
//! with the context; vocabulary scores come from decoding the hidden state
//! into embedding space and multiplying with the transposed embedding
//! table.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tch::{
    nn::{self, Module, OptimizerConfig, RNN},
    Device, IndexOp, Kind, Reduction, Tensor,
};

use super::dictionary::Dictionary;

/// Behavior selected when the engine is dispatched through [`UtteranceEngine::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Teacher-forced scoring of target sentences, with a gradient step
    Score,
    /// Free-running autoregressive generation, no gradient step
    Generate,
}

/// Configuration for the utterance engine
#[derive(Debug, Clone)]
pub struct UtteranceConfig {
    /// Width of the word embeddings
    pub word_embed_size: i64,
    /// Hidden width of the writer cell
    pub lang_hidden_size: i64,
    /// Width of the context vector (the action module's processed feature)
    pub context_size: i64,
    /// Fixed utterance length, start token included
    pub max_len: i64,
    /// Sampling temperature for generation
    pub temperature: f64,
    /// Gradient norm clip applied on every scoring step
    pub grad_clip: f64,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Epoch at which the learning rate is stepped down
    pub lr_drop_epoch: usize,
    /// Learning rate after the scheduled drop
    pub lr_after_drop: f64,
    /// Select tokens by arg-max instead of sampling during generation
    pub greedy: bool,
    /// Behavior used by [`UtteranceEngine::run`]
    pub mode: EngineMode,
    /// Where scoring steps persist the model weights, if anywhere
    pub checkpoint: Option<PathBuf>,
}

impl Default for UtteranceConfig {
    fn default() -> Self {
        Self {
            word_embed_size: 256,
            lang_hidden_size: 128,
            context_size: 256,
            max_len: 10,
            temperature: 0.5,
            grad_clip: 0.5,
            learning_rate: 1e-3,
            lr_drop_epoch: 100,
            lr_after_drop: 1e-6,
            greedy: false,
            mode: EngineMode::Score,
            checkpoint: None,
        }
    }
}

impl UtteranceConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.word_embed_size <= 0 {
            return Err(anyhow!("word_embed_size must be positive"));
        }
        if self.lang_hidden_size <= 0 {
            return Err(anyhow!("lang_hidden_size must be positive"));
        }
        if self.context_size <= 0 {
            return Err(anyhow!("context_size must be positive"));
        }
        if self.max_len < 2 {
            return Err(anyhow!("max_len must be at least 2 (start token plus one word)"));
        }
        if self.temperature <= 0.0 {
            return Err(anyhow!("temperature must be positive"));
        }
        if self.grad_clip <= 0.0 {
            return Err(anyhow!("grad_clip must be positive"));
        }
        if self.learning_rate <= 0.0 {
            return Err(anyhow!("learning_rate must be positive"));
        }
        if self.lr_after_drop <= 0.0 {
            return Err(anyhow!("lr_after_drop must be positive"));
        }
        Ok(())
    }

    /// Set the fixed utterance length
    pub fn max_len(mut self, max_len: i64) -> Self {
        self.max_len = max_len;
        self
    }

    /// Set the sampling temperature
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the context vector width
    pub fn context_size(mut self, context_size: i64) -> Self {
        self.context_size = context_size;
        self
    }

    /// Set the engine behavior used by `run`
    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set greedy arg-max selection for generation
    pub fn greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    /// Set the checkpoint path written after every scoring step
    pub fn checkpoint<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.checkpoint = Some(path.into());
        self
    }
}

/// Result of one teacher-forced scoring step
pub struct ScoreOutcome {
    /// Mean cross-entropy over non-pad next-token targets
    pub loss: f64,
    /// Sentence sampled from the scored distributions, `[batch, max_len]`
    pub sample: Tensor,
}

/// Result of one free-running generation pass
pub struct Generated {
    /// Generated token indices `[batch, max_len]`, start token at position 0
    pub tokens: Tensor,
    /// Writer hidden state after each generated position, `[batch, lang_hidden_size]` each
    pub hidden_trace: Vec<Tensor>,
}

/// Outcome of a mode-dispatched engine invocation
pub enum EngineOutcome {
    /// Scoring mode ran
    Scored(ScoreOutcome),
    /// Generation mode ran
    Generated(Generated),
}

/// Recurrent language model over a fixed dictionary
pub struct UtteranceEngine {
    vs: nn::VarStore,
    embedding: nn::Embedding,
    writer: nn::GRU,
    decoder: nn::Linear,
    optimizer: nn::Optimizer,
    special_mask: Tensor,
    dictionary: Dictionary,
    config: UtteranceConfig,
    device: Device,
}

impl UtteranceEngine {
    /// Build the engine over a dictionary
    pub fn new(dictionary: Dictionary, config: UtteranceConfig) -> Result<Self> {
        config.validate()?;
        let device = Device::cuda_if_available();
        tracing::info!("UtteranceEngine using device: {:?}", device);

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let vocab_size = dictionary.len();

        let embedding = nn::embedding(
            &root / "embed",
            vocab_size,
            config.word_embed_size,
            Default::default(),
        );
        let writer = nn::gru(
            &root / "writer",
            config.word_embed_size + config.context_size,
            config.lang_hidden_size,
            Default::default(),
        );
        let decoder = nn::linear(
            &root / "decoder",
            config.lang_hidden_size,
            config.word_embed_size,
            Default::default(),
        );
        let optimizer = nn::Adam::default().build(&vs, config.learning_rate)?;

        // Sampling never emits pad or the start token; both get a score
        // floor that survives the max-subtraction step.
        let mut mask = vec![0.0_f32; vocab_size as usize];
        mask[dictionary.pad_index() as usize] = -1e9;
        mask[dictionary.start_index() as usize] = -1e9;
        let special_mask = Tensor::from_slice(&mask).to_device(device);

        Ok(Self {
            vs,
            embedding,
            writer,
            decoder,
            optimizer,
            special_mask,
            dictionary,
            config,
            device,
        })
    }

    /// The dictionary the engine encodes and decodes with
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// The engine's configuration
    pub fn config(&self) -> &UtteranceConfig {
        &self.config
    }

    /// Dispatch on the configured mode
    ///
    /// Scoring requires target sentences; generation ignores them.
    pub fn run(
        &mut self,
        context: &Tensor,
        targets: Option<&[String]>,
        epoch: usize,
    ) -> Result<EngineOutcome> {
        match self.config.mode {
            EngineMode::Score => {
                let targets =
                    targets.ok_or_else(|| anyhow!("scoring mode requires target sentences"))?;
                Ok(EngineOutcome::Scored(self.score_step(context, targets, epoch)?))
            }
            EngineMode::Generate => Ok(EngineOutcome::Generated(self.generate(context))),
        }
    }

    /// One teacher-forced scoring step over a batch of target sentences
    ///
    /// Encodes the sentences (padding or truncating to `max_len`), runs the
    /// writer once per position with the true previous token as input,
    /// computes shifted-by-one cross-entropy (pad positions ignored), takes
    /// a clipped gradient step, and persists the weights. The scheduled
    /// learning-rate drop fires when `epoch` reaches the configured
    /// boundary.
    pub fn score_step(
        &mut self,
        context: &Tensor,
        sentences: &[String],
        epoch: usize,
    ) -> Result<ScoreOutcome> {
        let batch = context.size()[0];
        assert_eq!(
            batch as usize,
            sentences.len(),
            "context batch {} != sentence count {}",
            batch,
            sentences.len()
        );
        let max_len = self.config.max_len;
        let vocab_size = self.dictionary.len();

        // The language model trains against the context as given; policy
        // gradients travel through the episode cost, not through this loss.
        let context = context.detach().to_device(self.device);

        let mut flat = Vec::with_capacity((batch * max_len) as usize);
        for sentence in sentences {
            flat.extend(self.dictionary.encode_padded(sentence, max_len as usize));
        }
        let tokens = Tensor::from_slice(&flat).view([batch, max_len]).to_device(self.device);

        let mut state = self.writer.zero_state(batch);
        let mut outputs = Vec::with_capacity((max_len - 1) as usize);
        for position in 0..max_len - 1 {
            let input_embedding = self.embedding.forward(&tokens.i((.., position)));
            let (scores, next_state) = self.advance(&input_embedding, &context, &state);
            state = next_state;
            outputs.push(scores);
        }
        let scores = Tensor::stack(&outputs, 0);

        let targets = tokens.narrow(1, 1, max_len - 1).transpose(0, 1).reshape(-1);
        let loss = scores.view([-1, vocab_size]).cross_entropy_loss::<Tensor>(
            &targets,
            None,
            Reduction::Mean,
            self.dictionary.pad_index(),
            0.0,
        );

        let sample = self.sample_from_scores(&scores);

        if epoch == self.config.lr_drop_epoch {
            tracing::info!(
                "epoch {}: dropping learning rate to {}",
                epoch,
                self.config.lr_after_drop
            );
            self.optimizer.set_lr(self.config.lr_after_drop);
        }

        self.optimizer.zero_grad();
        loss.backward();
        self.optimizer.clip_grad_norm(self.config.grad_clip);
        self.optimizer.step();

        let loss_value = f64::try_from(&loss).unwrap_or(f64::NAN);
        tracing::debug!(epoch, loss = loss_value, "utterance scoring step");

        if let Some(path) = self.config.checkpoint.clone() {
            self.save(&path)?;
        }

        Ok(ScoreOutcome { loss: loss_value, sample })
    }

    /// Free-running generation from a context vector
    ///
    /// The start token is injected at position 0, never sampled; every
    /// following position samples (or arg-maxes, when configured greedy)
    /// from the temperature-scaled distribution. Pad and start stay masked
    /// out of the distribution.
    pub fn generate(&self, context: &Tensor) -> Generated {
        let batch = context.size()[0];
        let context = context.to_device(self.device);
        let start = Tensor::full(
            [batch],
            self.dictionary.start_index(),
            (Kind::Int64, self.device),
        );

        let mut state = self.writer.zero_state(batch);
        let mut tokens = vec![start];
        let mut hidden_trace = Vec::with_capacity((self.config.max_len - 1) as usize);

        for _position in 1..self.config.max_len {
            let previous = tokens.last().unwrap();
            let input_embedding = self.embedding.forward(previous);
            let (scores, next_state) = self.advance(&input_embedding, &context, &state);
            state = next_state;
            hidden_trace.push(state.0.squeeze_dim(0));

            let masked = scores + &self.special_mask;
            let probs = temperature_distribution(&masked, self.config.temperature);
            let next_token = if self.config.greedy {
                probs.argmax(-1, false)
            } else {
                probs.multinomial(1, false).squeeze_dim(-1)
            };
            tokens.push(next_token.detach());
        }

        Generated { tokens: Tensor::stack(&tokens, 1), hidden_trace }
    }

    /// Decode a `[batch, len]` token tensor into one sentence per row
    pub fn decode_tokens(&self, tokens: &Tensor) -> Vec<String> {
        let batch = tokens.size()[0];
        (0..batch)
            .map(|row| {
                let indices: Vec<i64> = Vec::try_from(tokens.get(row)).unwrap();
                self.dictionary.decode(&indices)
            })
            .collect()
    }

    /// Save model weights to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs
            .save(path.as_ref())
            .with_context(|| format!("saving utterance model to {:?}", path.as_ref()))
    }

    /// Load model weights from a file
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.vs
            .load(path.as_ref())
            .with_context(|| format!("loading utterance model from {:?}", path.as_ref()))
    }

    /// Advance the writer one token position
    ///
    /// Returns vocabulary scores `[batch, vocab]` and the new writer state.
    fn advance(
        &self,
        token_embedding: &Tensor,
        context: &Tensor,
        state: &nn::GRUState,
    ) -> (Tensor, nn::GRUState) {
        let input = Tensor::cat(&[token_embedding, context], 1);
        let next_state = self.writer.step(&input, state);
        let hidden = next_state.0.squeeze_dim(0);
        let scores = self.decoder.forward(&hidden).matmul(&self.embedding.ws.tr());
        (scores, next_state)
    }

    /// Draw one inspection sentence from teacher-forced score stacks
    fn sample_from_scores(&self, scores: &Tensor) -> Tensor {
        let positions = scores.size()[0];
        let batch = scores.size()[1];
        let start = Tensor::full(
            [batch, 1],
            self.dictionary.start_index(),
            (Kind::Int64, self.device),
        );
        let mut words = vec![start];
        for position in 0..positions {
            let masked = scores.get(position) + &self.special_mask;
            let probs = temperature_distribution(&masked, 1.0);
            words.push(probs.multinomial(1, false).detach());
        }
        Tensor::cat(&words, 1)
    }
}

/// Temperature-scaled categorical distribution over scores
///
/// The per-row maximum is subtracted before normalizing; without it the
/// exponentiation overflows at low temperatures. This is a required
/// invariant of every sampling path, not tuning.
pub fn temperature_distribution(scores: &Tensor, temperature: f64) -> Tensor {
    let scaled = scores / temperature;
    let stable = &scaled - scaled.max_dim(-1, true).0;
    stable.softmax(-1, Kind::Float)
}
