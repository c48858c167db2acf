use std::time::Duration;

use anyhow::{bail, Context, Result};
use nbox_contracts::SourceImage;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Image,
    Text,
}

impl Modality {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Image(SourceImage),
    Text(String),
}

/// One `generateContent` call: a single user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    pub model: String,
    pub parts: Vec<Part>,
    pub response_modalities: Vec<Modality>,
}

/// Parts of the first candidate, in response order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentResponse {
    pub parts: Vec<Part>,
}

impl ContentResponse {
    pub fn first_image(&self) -> Option<&SourceImage> {
        self.parts.iter().find_map(|part| match part {
            Part::Image(image) => Some(image),
            Part::Text(_) => None,
        })
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::Image(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagesRequest {
    pub model: String,
    pub prompt: String,
    pub sample_count: u32,
    pub output_mime_type: String,
    pub aspect_ratio: String,
}

/// One prediction from `:predict`. `image` is `None` when the prediction carried no bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub image: Option<SourceImage>,
}

/// The hosted model capability the client consumes.
pub trait GenerativeModel: Send + Sync {
    fn has_credential(&self) -> bool;
    fn generate_content(&self, request: &ContentRequest) -> Result<ContentResponse>;
    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<GeneratedImage>>;
}

/// Blocking HTTP transport for the Gemini `generateContent` and Imagen `predict` endpoints.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    api_base: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn post(&self, provider: &str, endpoint: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let mut request = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .with_context(|| format!("{provider} request failed ({endpoint})"))?;
        response_json_or_error(provider, response)
    }
}

impl GenerativeModel for GeminiBackend {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate_content(&self, request: &ContentRequest) -> Result<ContentResponse> {
        let endpoint = self.endpoint(&request.model, "generateContent");
        let payload = build_content_payload(request);
        tracing::debug!(model = %request.model, parts = request.parts.len(), "gemini generateContent");
        let response_payload = self.post("Gemini", &endpoint, &payload)?;
        Ok(parse_content_response(&response_payload))
    }

    fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<GeneratedImage>> {
        let endpoint = self.endpoint(&request.model, "predict");
        let payload = build_predict_payload(request);
        tracing::debug!(model = %request.model, "imagen predict");
        let response_payload = self.post("Imagen", &endpoint, &payload)?;
        Ok(parse_predictions(&response_payload, &request.output_mime_type))
    }
}

fn build_content_payload(request: &ContentRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|part| match part {
            Part::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.base64,
                }
            }),
            Part::Text(text) => json!({ "text": text }),
        })
        .collect();
    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": parts }]),
    );
    if !request.response_modalities.is_empty() {
        let modalities: Vec<&str> = request
            .response_modalities
            .iter()
            .map(|modality| modality.wire_name())
            .collect();
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": modalities }),
        );
    }
    Value::Object(payload)
}

fn build_predict_payload(request: &ImagesRequest) -> Value {
    json!({
        "instances": [{ "prompt": request.prompt }],
        "parameters": {
            "sampleCount": request.sample_count.max(1),
            "outputMimeType": request.output_mime_type,
            "aspectRatio": request.aspect_ratio,
        },
    })
}

/// Reads the first candidate's parts. Inline data is accepted in both JSON spellings.
fn parse_content_response(payload: &Value) -> ContentResponse {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push(Part::Text(text.to_string()));
            continue;
        }
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        out.push(Part::Image(SourceImage {
            base64: data.to_string(),
            mime_type: mime_type.to_string(),
        }));
    }
    ContentResponse { parts: out }
}

fn parse_predictions(payload: &Value, default_mime: &str) -> Vec<GeneratedImage> {
    payload
        .get("predictions")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let data = row
                        .get("bytesBase64Encoded")
                        .or_else(|| row.get("image").and_then(|image| image.get("imageBytes")))
                        .and_then(Value::as_str)
                        .filter(|data| !data.is_empty());
                    let mime_type = row
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .unwrap_or(default_mime);
                    GeneratedImage {
                        image: data.map(|data| SourceImage {
                            base64: data.to_string(),
                            mime_type: mime_type.to_string(),
                        }),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
