//! Vision classifier client.
//!
//! The `Classifier` trait is the seam the orchestrator depends on; the Gemini
//! implementation uploads the spooled image through the media intake endpoint
//! and then asks the model for a structured identification.

use crate::classification::{
    response_schema, ClassificationResult, MAX_OUTPUT_TOKENS, RESPONSE_MIME_TYPE, TEMPERATURE,
    TOP_K, TOP_P,
};
use crate::config::ClassifierConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Classifies a locally spooled image into a plant identification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_path: &Path, mime_type: &str) -> Result<ClassificationResult>;
}

/// Gemini generative language API classifier
pub struct GeminiClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_instruction: String,
}

impl GeminiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create classifier HTTP client")?;

        info!(model = %config.model, "Classifier client initialized");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Upload the image to the media intake and return its file reference
    #[instrument(skip(self), fields(path = %image_path.display()))]
    async fn upload_media(&self, image_path: &Path, mime_type: &str) -> Result<UploadedFile> {
        let bytes = tokio::fs::read(image_path)
            .await
            .context("Failed to read spooled image")?;

        let display_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let response = self
            .client
            .post(self.upload_url())
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "raw")
            .header(header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .context("Failed to upload image to classifier")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Classifier media upload returned {}: {}", status, body);
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .context("Failed to parse classifier upload response")?;

        info!(
            display_name = %display_name,
            file_uri = %uploaded.file.uri,
            "Uploaded image to classifier"
        );

        Ok(uploaded.file)
    }

    fn generate_request(&self, file: &UploadedFile, mime_type: &str) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: self.system_instruction.clone(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::FileData {
                    file_data: FileData {
                        mime_type: file
                            .mime_type
                            .clone()
                            .unwrap_or_else(|| mime_type.to_string()),
                        file_uri: file.uri.clone(),
                    },
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: RESPONSE_MIME_TYPE.to_string(),
                response_schema: response_schema(),
            },
        }
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn classify(&self, image_path: &Path, mime_type: &str) -> Result<ClassificationResult> {
        let file = self.upload_media(image_path, mime_type).await?;
        let request = self.generate_request(&file, mime_type);

        let response = self
            .client
            .post(self.generate_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context("Failed to call classifier")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Classifier returned {}: {}", status, body);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse classifier response")?;

        let text = generated
            .first_text()
            .context("Classifier response contained no text")?;

        debug!(response = %text, "Classifier response received");

        ClassificationResult::from_model_output(text)
    }
}

/// Media upload response
#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: String,
    mime_type: Option<String>,
}

/// generateContent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: String,
    response_schema: serde_json::Value,
}

/// generateContent response body
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::FileData { .. } => None,
            })
    }
}
