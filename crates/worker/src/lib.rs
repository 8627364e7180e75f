//! Reference `trainq-worker` host: a linear-regression trainer served by
//! the dispatcher's process pool.

pub mod trainer;

pub use trainer::{accepted_parameters, trainer};
