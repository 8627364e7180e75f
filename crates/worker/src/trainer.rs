//! Reference training routine: least-squares linear regression fitted by
//! batch gradient descent on a synthetic, noise-free dataset.
//!
//! The dataset is `y = TRUE_WEIGHT * x + TRUE_BIAS` sampled at `samples`
//! evenly spaced points in `[0, 1]`, so results are deterministic.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trainq_core::training::training_fn;
use trainq_core::{ParameterSchema, ParameterType, TrainingFunction};

const TRUE_WEIGHT: f64 = 3.0;
const TRUE_BIAS: f64 = 2.0;

fn default_samples() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionParams {
    pub learning_rate: f64,
    pub epochs: u32,
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Sleep after every epoch. Lets callers simulate long jobs.
    #[serde(default)]
    pub epoch_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionResult {
    pub weight: f64,
    pub bias: f64,
    pub loss: f64,
    pub epochs: u32,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegressionError {
    #[error("learning_rate must be positive, got {0}")]
    NonPositiveLearningRate(f64),

    #[error("samples must be at least 1")]
    NoSamples,

    #[error("loss diverged at epoch {epoch}")]
    Diverged { epoch: u32 },
}

/// Parameters the trainer accepts, as advertised in the worker record.
pub fn accepted_parameters() -> ParameterSchema {
    ParameterSchema::from([
        ("learning_rate".to_string(), ParameterType::Float),
        ("epochs".to_string(), ParameterType::Int),
        ("samples".to_string(), ParameterType::Int),
        ("epoch_delay_ms".to_string(), ParameterType::Int),
    ])
}

/// The trainer behind the [`TrainingFunction`] seam.
pub fn trainer() -> impl TrainingFunction {
    training_fn(train)
}

pub fn train(params: RegressionParams) -> Result<RegressionResult, RegressionError> {
    if params.learning_rate.is_nan() || params.learning_rate <= 0.0 {
        return Err(RegressionError::NonPositiveLearningRate(params.learning_rate));
    }
    if params.samples == 0 {
        return Err(RegressionError::NoSamples);
    }

    let xs: Vec<f64> = (0..params.samples)
        .map(|i| {
            if params.samples == 1 {
                0.0
            } else {
                i as f64 / (params.samples - 1) as f64
            }
        })
        .collect();
    let ys: Vec<f64> = xs.iter().map(|x| TRUE_WEIGHT * x + TRUE_BIAS).collect();
    let n = params.samples as f64;

    let mut weight = 0.0_f64;
    let mut bias = 0.0_f64;
    let mut loss = mean_squared_error(&xs, &ys, weight, bias);

    for epoch in 1..=params.epochs {
        let (mut grad_w, mut grad_b) = (0.0_f64, 0.0_f64);
        for (x, y) in xs.iter().zip(&ys) {
            let residual = weight * x + bias - y;
            grad_w += 2.0 * residual * x / n;
            grad_b += 2.0 * residual / n;
        }
        weight -= params.learning_rate * grad_w;
        bias -= params.learning_rate * grad_b;

        loss = mean_squared_error(&xs, &ys, weight, bias);
        if !loss.is_finite() {
            return Err(RegressionError::Diverged { epoch });
        }
        tracing::debug!(epoch, loss, "Epoch complete");

        if params.epoch_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(params.epoch_delay_ms));
        }
    }

    Ok(RegressionResult {
        weight,
        bias,
        loss,
        epochs: params.epochs,
    })
}

fn mean_squared_error(xs: &[f64], ys: &[f64], weight: f64, bias: f64) -> f64 {
    let total: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (weight * x + bias - y).powi(2))
        .sum();
    total / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use trainq_core::TrainingError;

    use super::*;

    fn params(learning_rate: f64, epochs: u32) -> RegressionParams {
        RegressionParams {
            learning_rate,
            epochs,
            samples: 32,
            epoch_delay_ms: 0,
        }
    }

    #[test]
    fn converges_to_generating_line() {
        let result = train(params(0.5, 2_000)).unwrap();
        assert!((result.weight - TRUE_WEIGHT).abs() < 1e-3, "weight = {}", result.weight);
        assert!((result.bias - TRUE_BIAS).abs() < 1e-3, "bias = {}", result.bias);
        assert!(result.loss < 1e-6);
    }

    #[test]
    fn zero_epochs_reports_initial_loss() {
        let result = train(params(0.1, 0)).unwrap();
        assert_eq!(result.weight, 0.0);
        assert!(result.loss > 0.0);
    }

    #[test]
    fn non_positive_learning_rate_is_a_fault() {
        assert_matches!(train(params(0.0, 5)), Err(RegressionError::NonPositiveLearningRate(_)));
        assert_matches!(train(params(-1.0, 5)), Err(RegressionError::NonPositiveLearningRate(_)));
    }

    #[test]
    fn huge_learning_rate_diverges() {
        assert_matches!(train(params(1e6, 500)), Err(RegressionError::Diverged { .. }));
    }

    #[test]
    fn trainer_reads_named_parameters() {
        let mut p = serde_json::Map::new();
        p.insert("learning_rate".into(), json!(0.5));
        p.insert("epochs".into(), json!(10));
        let value = trainer().train(p).unwrap();
        assert_eq!(value["epochs"], json!(10));
    }

    #[test]
    fn trainer_rejects_unknown_parameters() {
        let mut p = serde_json::Map::new();
        p.insert("learning_rate".into(), json!(0.5));
        p.insert("epochs".into(), json!(10));
        p.insert("momentum".into(), json!(0.9));
        assert_matches!(trainer().train(p), Err(TrainingError::InvalidParameters(_)));
    }

    #[test]
    fn schema_lists_every_field() {
        let schema = accepted_parameters();
        assert_eq!(schema.len(), 4);
        assert_eq!(schema["learning_rate"], ParameterType::Float);
    }
}
