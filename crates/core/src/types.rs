/// Remote document identifiers are opaque strings assigned by the store (`_id`).
pub type DocId = String;

/// Training hyperparameters keyed by argument name.
pub type TrainingParameters = serde_json::Map<String, serde_json::Value>;
