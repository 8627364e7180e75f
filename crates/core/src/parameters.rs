//! Accepted-parameter schema advertised in the worker record.
//!
//! A dispatcher tells the coordination service which hyperparameters its
//! training function accepts, as a mapping from argument name to a type
//! tag (`{"lr": "float", "epochs": "int"}`). The schema is informational:
//! jobs are not validated against it before dispatch.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Type tag for a single accepted hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::Int => "int",
            ParameterType::Float => "float",
            ParameterType::Str => "str",
            ParameterType::Bool => "bool",
            ParameterType::List => "list",
            ParameterType::Dict => "dict",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(ParameterType::Int),
            "float" => Ok(ParameterType::Float),
            "str" => Ok(ParameterType::Str),
            "bool" => Ok(ParameterType::Bool),
            "list" => Ok(ParameterType::List),
            "dict" => Ok(ParameterType::Dict),
            other => Err(CoreError::Validation(format!(
                "Unknown parameter type tag: \"{other}\""
            ))),
        }
    }
}

/// Mapping from hyperparameter name to its type tag.
///
/// Ordered so the serialized worker record is stable.
pub type ParameterSchema = BTreeMap<String, ParameterType>;

/// Parse a compact schema string such as `"lr:float, epochs:int"`.
///
/// Entries are comma-separated `name:type` pairs. Whitespace around names
/// and tags is trimmed; empty entries are skipped. Duplicate names are
/// rejected.
pub fn parse_schema(input: &str) -> Result<ParameterSchema, CoreError> {
    let mut schema = ParameterSchema::new();

    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, tag) = entry.split_once(':').ok_or_else(|| {
            CoreError::Validation(format!(
                "Schema entry \"{entry}\" must have the form name:type"
            ))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation(format!(
                "Schema entry \"{entry}\" has an empty name"
            )));
        }
        let tag: ParameterType = tag.trim().parse()?;
        if schema.insert(name.to_string(), tag).is_some() {
            return Err(CoreError::Validation(format!(
                "Duplicate parameter in schema: \"{name}\""
            )));
        }
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_schema_reads_pairs() {
        let schema = parse_schema("lr:float, epochs:int ,verbose: bool").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema["lr"], ParameterType::Float);
        assert_eq!(schema["epochs"], ParameterType::Int);
        assert_eq!(schema["verbose"], ParameterType::Bool);
    }

    #[test]
    fn parse_schema_empty_string_is_empty_schema() {
        assert!(parse_schema("").unwrap().is_empty());
        assert!(parse_schema(" , ").unwrap().is_empty());
    }

    #[test]
    fn parse_schema_rejects_missing_colon() {
        assert_matches!(parse_schema("lr"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn parse_schema_rejects_unknown_tag() {
        assert_matches!(parse_schema("lr:double"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn parse_schema_rejects_duplicates() {
        assert_matches!(
            parse_schema("lr:float,lr:int"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn schema_serializes_as_tag_map() {
        let schema = parse_schema("epochs:int,lr:float").unwrap();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json, serde_json::json!({"epochs": "int", "lr": "float"}));
    }
}
