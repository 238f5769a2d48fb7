//! Google driver, for Imagen and Gemini image generation.
//!
//! Both models answer synchronously, with base64-encoded image data inline in
//! the response. We use the REST API directly.

use base64::{Engine as _, prelude::BASE64_STANDARD};

use crate::{config::ApiConfig, prelude::*};

use super::{Driver, GeneratedImage, http_status_error, jobs::HttpReply};

/// Which Google model to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoogleModel {
    /// Imagen 3, via `:predict`.
    Imagen,
    /// Gemini 2.0 Flash image generation, via `:generateContent`.
    Gemini,
}

impl GoogleModel {
    /// The model ID used in API URLs.
    fn model_id(self) -> &'static str {
        match self {
            GoogleModel::Imagen => "imagen-3.0-generate-002",
            GoogleModel::Gemini => "gemini-2.0-flash-preview-image-generation",
        }
    }

    /// The API method to call.
    fn method(self) -> &'static str {
        match self {
            GoogleModel::Imagen => "predict",
            GoogleModel::Gemini => "generateContent",
        }
    }

    /// Build our request body.
    fn request_body(self, prompt: &str) -> Value {
        match self {
            GoogleModel::Imagen => json!({
                "instances": [{ "prompt": prompt }],
                "parameters": {
                    "sampleCount": 1,
                    "includeRaiReason": true,
                    "outputMimeType": "image/jpeg",
                },
            }),
            GoogleModel::Gemini => json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
            }),
        }
    }

    /// Check the status of a reply, then extract our image from its body.
    fn read_reply(self, reply: HttpReply) -> Result<GeneratedImage> {
        if !reply.status.is_success() {
            return Err(http_status_error("Image generation", reply.status, &reply.body));
        }
        self.parse_response(&reply.body)
    }

    /// Extract our image from a response body.
    fn parse_response(self, body: &str) -> Result<GeneratedImage> {
        match self {
            GoogleModel::Imagen => {
                let response = serde_json::from_str::<PredictResponse>(body)
                    .with_context(|| format!("Invalid Imagen response: {body:?}"))?;
                response.into_image()
            }
            GoogleModel::Gemini => {
                let response = serde_json::from_str::<GenerateContentResponse>(body)
                    .with_context(|| format!("Invalid Gemini response: {body:?}"))?;
                response.into_image()
            }
        }
    }
}

/// Response from Imagen's `:predict`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    /// One prediction per generated image. Missing entirely if every image
    /// was filtered.
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

impl PredictResponse {
    fn into_image(self) -> Result<GeneratedImage> {
        let mut filtered = vec![];
        for prediction in self.predictions {
            match prediction {
                Prediction {
                    bytes_base64_encoded: Some(data),
                    mime_type,
                    ..
                } => {
                    return Ok(GeneratedImage::Inline {
                        mime_type: mime_type.unwrap_or_else(|| "image/jpeg".to_owned()),
                        data: decode_base64(&data)?,
                    });
                }
                Prediction {
                    rai_filtered_reason: Some(reason),
                    ..
                } => filtered.push(reason),
                _ => {}
            }
        }
        if filtered.is_empty() {
            Err(anyhow!("Imagen returned no images"))
        } else {
            Err(anyhow!("Imagen filtered the image: {}", filtered.join("; ")))
        }
    }
}

/// Response from Gemini's `:generateContent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    fn into_image(self) -> Result<GeneratedImage> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(match self.prompt_feedback {
                Some(feedback) => anyhow!("Gemini returned no candidates: {feedback}"),
                None => anyhow!("Gemini returned no candidates"),
            });
        };
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        let mut texts = vec![];
        for part in parts {
            if let Some(inline) = part.inline_data {
                return Ok(GeneratedImage::Inline {
                    mime_type: inline.mime_type,
                    data: decode_base64(&inline.data)?,
                });
            }
            if let Some(text) = part.text {
                texts.push(text);
            }
        }
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_owned());
        Err(anyhow!(
            "Gemini returned no image (finish reason {reason}): {}",
            texts.join(" ")
        ))
    }
}

/// Decode standard base64 image data.
fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD
        .decode(data.trim())
        .context("Failed to decode base64 image data")
}

/// Our Google driver.
pub struct GoogleDriver {
    client: reqwest::Client,
    model: GoogleModel,
    api_base: String,
    api_key: String,
}

// Hand-written so that the API key never ends up in logs.
impl std::fmt::Debug for GoogleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriver")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GoogleDriver {
    /// Create a new Google driver.
    pub fn new(model: GoogleModel, config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            model,
            api_base: config.gemini.api_base.clone(),
            api_key: config.gemini.require_api_key("GEMINI_API_KEY")?.to_owned(),
        })
    }

    /// The URL to POST to.
    fn url(&self) -> String {
        format!(
            "{}/models/{}:{}",
            self.api_base,
            self.model.model_id(),
            self.model.method()
        )
    }
}

#[async_trait]
impl Driver for GoogleDriver {
    #[instrument(level = "debug", skip_all, fields(model = self.model.model_id()))]
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        let url = self.url();
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.model.request_body(prompt))
            .send()
            .await
            .with_context(|| format!("Failed to POST {url}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;
        self.model.read_reply(HttpReply { status, body })
    }
}
