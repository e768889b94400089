//! Classification result shape and the fixed generation policy.
//!
//! The JSON key names and their order are shared with the browser client and
//! primed into the model through the response schema, so they must not change.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const KEY_THINKING_TRACE: &str = "0-privateThinkingTrace";
pub const KEY_SCIENTIFIC_NAME: &str = "1-scientificName";
pub const KEY_COMMON_NAMES: &str = "2-commonNames";
pub const KEY_CONFIDENCE: &str = "3-confidenceProb";
pub const KEY_EXPLANATION: &str = "4-userExplanation";

/// Sampling temperature
pub const TEMPERATURE: f32 = 1.0;
/// Nucleus sampling threshold
pub const TOP_P: f32 = 0.95;
pub const TOP_K: u32 = 64;
/// Upper bound on generated tokens
pub const MAX_OUTPUT_TOKENS: u32 = 8192;
pub const RESPONSE_MIME_TYPE: &str = "application/json";

/// Structured species identification returned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "0-privateThinkingTrace")]
    pub reasoning_trace: String,
    #[serde(rename = "1-scientificName")]
    pub scientific_name: String,
    #[serde(rename = "2-commonNames")]
    pub common_names: Vec<String>,
    #[serde(rename = "3-confidenceProb")]
    pub confidence_probability: f64,
    #[serde(rename = "4-userExplanation")]
    pub explanation: String,
}

impl ClassificationResult {
    /// Parse the raw model output, rejecting results outside the schema
    pub fn from_model_output(text: &str) -> anyhow::Result<Self> {
        let result: ClassificationResult = serde_json::from_str(text.trim())
            .map_err(|e| anyhow::anyhow!("Classifier returned malformed result: {}", e))?;
        result.validate()?;
        Ok(result)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_probability) {
            anyhow::bail!(
                "Classifier confidence {} outside [0, 1]",
                self.confidence_probability
            );
        }
        if self.scientific_name.trim().is_empty() {
            anyhow::bail!("Classifier returned an empty scientific name");
        }
        Ok(())
    }
}

/// Response schema sent with every generation request
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            KEY_THINKING_TRACE: { "type": "string" },
            KEY_SCIENTIFIC_NAME: { "type": "string" },
            KEY_COMMON_NAMES: {
                "type": "array",
                "items": { "type": "string" }
            },
            KEY_CONFIDENCE: { "type": "number" },
            KEY_EXPLANATION: { "type": "string" }
        },
        "required": [
            KEY_THINKING_TRACE,
            KEY_SCIENTIFIC_NAME,
            KEY_COMMON_NAMES,
            KEY_CONFIDENCE,
            KEY_EXPLANATION
        ]
    })
}
