//! Inbound request bodies and how they become a graph to submit.
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;
use crate::workflow::store::{unwrap_prompt_envelope, DEFAULT_TEMPLATE};

/// Keys that mark a body as a generation request rather than a raw graph.
pub const GENERATION_KEYS: [&str; 4] = ["prompt_file", "positive_prompt", "negative_prompt", "seed"];

#[derive(Debug, Clone, Deserialize)]
struct RawGenerationRequest {
    #[serde(default)]
    prompt_file: Option<String>,
    #[serde(default)]
    positive_prompt: Option<String>,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default)]
    seed: Option<Value>,
}

/// A validated generation request: template name, prompts and optional seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub prompt_file: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub seed: Option<i64>,
}

impl GenerationParams {
    pub fn new(positive_prompt: impl Into<String>) -> Self {
        GenerationParams {
            prompt_file: DEFAULT_TEMPLATE.to_string(),
            positive_prompt: positive_prompt.into(),
            negative_prompt: String::new(),
            seed: None,
        }
    }

    /// Validate a generation request body. `positive_prompt` is required;
    /// every other field has a default.
    pub fn from_value(value: Value) -> AppResult<Self> {
        let raw: RawGenerationRequest = serde_json::from_value(value)
            .map_err(|e| AppError::InvalidRequest(format!("invalid generation request: {e}")))?;

        let positive_prompt = raw
            .positive_prompt
            .ok_or(AppError::MissingParameter("positive_prompt"))?;

        Ok(GenerationParams {
            prompt_file: raw
                .prompt_file
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            positive_prompt,
            negative_prompt: raw.negative_prompt.unwrap_or_default(),
            seed: raw.seed.as_ref().map(parse_seed).transpose()?.flatten(),
        })
    }
}

/// What a `/invocations` body asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Load a template and inject parameters.
    Generate(GenerationParams),
    /// Submit a caller-built graph as is.
    Raw(GraphDocument),
}

impl Submission {
    /// Parse a request body regardless of its declared content type.
    pub fn from_body(body: &[u8]) -> AppResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> AppResult<Self> {
        let Some(map) = value.as_object() else {
            return Err(AppError::InvalidRequest("body must be a JSON object".to_string()));
        };

        let is_generation = map.is_empty() || GENERATION_KEYS.iter().any(|key| map.contains_key(*key));
        if is_generation {
            return GenerationParams::from_value(value).map(Submission::Generate);
        }

        let graph = GraphDocument::from_value(value)
            .map_err(|e| AppError::InvalidRequest(format!("body is not a workflow graph: {e}")))?;
        Ok(Submission::Raw(unwrap_prompt_envelope(graph)))
    }
}

/// Seeds may be JSON numbers (fractions truncated) or numeric strings.
/// `null` means "draw one".
pub fn parse_seed(value: &Value) -> AppResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if n.as_u64().is_some() {
                Ok(Some(i64::MAX))
            } else {
                // `as` saturates out-of-range floats.
                Ok(n.as_f64().map(|f| f.trunc() as i64))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Some(i));
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Some(f.trunc() as i64)),
                _ => Err(AppError::InvalidRequest(format!("seed '{s}' is not a number"))),
            }
        }
        other => Err(AppError::InvalidRequest(format!("seed must be a number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn applies_defaults() {
        let params = GenerationParams::from_value(json!({"positive_prompt": "hill happy dog"})).unwrap();
        assert_eq!(params, GenerationParams::new("hill happy dog"));
        assert_eq!(params.prompt_file, "workflow_api.json");
    }

    #[test]
    fn missing_or_null_positive_prompt_is_rejected() {
        assert_matches!(
            GenerationParams::from_value(json!({"negative_prompt": "hill"})),
            Err(AppError::MissingParameter("positive_prompt"))
        );
        assert_matches!(
            GenerationParams::from_value(json!({"positive_prompt": null})),
            Err(AppError::MissingParameter(_))
        );
    }

    #[test]
    fn seeds_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_seed(&json!(123)).unwrap(), Some(123));
        assert_eq!(parse_seed(&json!(12.9)).unwrap(), Some(12));
        assert_eq!(parse_seed(&json!("42")).unwrap(), Some(42));
        assert_eq!(parse_seed(&json!(" 7.5 ")).unwrap(), Some(7));
        assert_eq!(parse_seed(&json!(u64::MAX)).unwrap(), Some(i64::MAX));
        assert_eq!(parse_seed(&Value::Null).unwrap(), None);
        assert_matches!(parse_seed(&json!("abc")), Err(AppError::InvalidRequest(_)));
        assert_matches!(parse_seed(&json!([1])), Err(AppError::InvalidRequest(_)));
    }

    #[test]
    fn classifies_generation_and_raw_bodies() {
        let generate = Submission::from_value(json!({"positive_prompt": "dog", "seed": 5})).unwrap();
        assert_matches!(generate, Submission::Generate(GenerationParams { seed: Some(5), .. }));

        let raw = Submission::from_value(json!({
            "prompt": {"3": {"class_type": "KSampler", "inputs": {"seed": 1}}}
        }))
        .unwrap();
        match raw {
            Submission::Raw(graph) => assert!(graph.node("3").is_some()),
            other => panic!("Expected raw graph, got {other:?}"),
        }
    }

    #[test]
    fn empty_object_counts_as_generation_request() {
        assert_matches!(Submission::from_value(json!({})), Err(AppError::MissingParameter(_)));
    }

    #[test]
    fn non_json_and_non_object_bodies_are_invalid() {
        assert_matches!(Submission::from_body(b"not json"), Err(AppError::InvalidRequest(_)));
        assert_matches!(Submission::from_body(b"[1, 2]"), Err(AppError::InvalidRequest(_)));
    }
}
