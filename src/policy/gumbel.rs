//! Gumbel-softmax relaxation for discrete utterance choice
//!
//! During training the discrete symbol choice must carry gradient, so the
//! categorical sample is replaced with a reparameterized soft sample:
//! Gumbel noise added to the logits, then a temperature-scaled softmax.

use tch::{Kind, Tensor};

const EPS: f64 = 1e-20;

/// Draw one soft sample from the categorical distribution over `logits`
///
/// Lower temperatures concentrate the sample toward a one-hot vector;
/// gradient flows to `logits` through the softmax.
pub fn gumbel_softmax(logits: &Tensor, temperature: f64) -> Tensor {
    let noise = sample_gumbel(logits);
    ((logits + noise) / temperature).softmax(-1, Kind::Float)
}

/// Sample standard Gumbel noise with the shape and device of `like`
fn sample_gumbel(like: &Tensor) -> Tensor {
    let uniform = like.rand_like();
    -(((-((uniform + EPS).log())) + EPS).log())
}
