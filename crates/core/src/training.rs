//! The training-function seam.
//!
//! Worker processes call a [`TrainingFunction`] once per job with the
//! job's training parameters. Most callers write an ordinary function
//! over a typed parameter struct and wrap it with [`training_fn`]: the
//! parameter mapping is deserialized into the struct's named fields, so
//! an unknown or missing argument surfaces as
//! [`TrainingError::InvalidParameters`].

use std::fmt::Display;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::TrainingParameters;

/// A synchronous training routine. May run arbitrarily long.
///
/// The returned value is logged by the worker and otherwise not
/// interpreted. Any `Err` is a training fault and ends the worker
/// process.
pub trait TrainingFunction: Send + Sync {
    fn train(&self, parameters: TrainingParameters) -> Result<serde_json::Value, TrainingError>;
}

/// Errors raised by a training function.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    /// The parameter mapping did not match the function's parameter type.
    #[error("Invalid training parameters: {0}")]
    InvalidParameters(#[source] serde_json::Error),

    /// The training routine itself reported a failure.
    #[error("Training failed: {0}")]
    Failed(String),
}

/// Adapter from a typed `Fn(P) -> Result<R, E>` to [`TrainingFunction`].
pub struct TypedTraining<F, P> {
    func: F,
    _params: PhantomData<fn(P)>,
}

/// Wrap a typed training function.
///
/// ```
/// use serde::Deserialize;
/// use trainq_core::training::{training_fn, TrainingFunction};
///
/// #[derive(Deserialize)]
/// struct Params {
///     lr: f64,
///     epochs: u32,
/// }
///
/// let train = training_fn(|p: Params| Ok::<_, String>(p.lr * p.epochs as f64));
/// let mut params = serde_json::Map::new();
/// params.insert("lr".into(), 0.5.into());
/// params.insert("epochs".into(), 4.into());
/// assert_eq!(train.train(params).unwrap(), 2.0);
/// ```
pub fn training_fn<F, P, R, E>(func: F) -> TypedTraining<F, P>
where
    F: Fn(P) -> Result<R, E> + Send + Sync,
    P: DeserializeOwned,
    R: Serialize,
    E: Display,
{
    TypedTraining {
        func,
        _params: PhantomData,
    }
}

impl<F, P, R, E> TrainingFunction for TypedTraining<F, P>
where
    F: Fn(P) -> Result<R, E> + Send + Sync,
    P: DeserializeOwned,
    R: Serialize,
    E: Display,
{
    fn train(&self, parameters: TrainingParameters) -> Result<serde_json::Value, TrainingError> {
        let params: P = serde_json::from_value(serde_json::Value::Object(parameters))
            .map_err(TrainingError::InvalidParameters)?;

        let output = (self.func)(params).map_err(|e| TrainingError::Failed(e.to_string()))?;

        serde_json::to_value(output)
            .map_err(|e| TrainingError::Failed(format!("Unserializable training result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Params {
        lr: f64,
        epochs: u32,
    }

    fn params(value: serde_json::Value) -> TrainingParameters {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn typed_function_receives_named_fields() {
        let train = training_fn(|p: Params| Ok::<_, String>(json!({"steps": p.epochs, "lr": p.lr})));
        let out = train.train(params(json!({"lr": 0.01, "epochs": 5}))).unwrap();
        assert_eq!(out, json!({"steps": 5, "lr": 0.01}));
    }

    #[test]
    fn missing_argument_is_invalid_parameters() {
        let train = training_fn(|_: Params| Ok::<_, String>(()));
        assert_matches!(
            train.train(params(json!({"lr": 0.01}))),
            Err(TrainingError::InvalidParameters(_))
        );
    }

    #[test]
    fn unexpected_argument_is_invalid_parameters() {
        let train = training_fn(|_: Params| Ok::<_, String>(()));
        assert_matches!(
            train.train(params(json!({"lr": 0.01, "epochs": 1, "gamma": 0.9}))),
            Err(TrainingError::InvalidParameters(_))
        );
    }

    #[test]
    fn function_error_is_failed() {
        let train = training_fn(|_: Params| Err::<(), _>("diverged"));
        assert_matches!(
            train.train(params(json!({"lr": 10.0, "epochs": 1}))),
            Err(TrainingError::Failed(msg)) if msg == "diverged"
        );
    }
}
