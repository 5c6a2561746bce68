use crate::pipeline::{DispatchError, GenerationResult, ImagePipeline, OutputImage};
use crate::request::GenerationRequest;
use crate::session::GenerationSession;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

const SDAPI_PREFIX: &str = "/sdapi/v1";
const GENERATE_TIMEOUT_SECONDS: u64 = 600;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid API key for the generation backend")]
    InvalidApiKey,
    #[error("{0}")]
    Transport(String),
    #[error("generation request failed with status {status} at {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("failed to decode generation response: {0}")]
    Decode(String),
    #[error("generation interrupted before dispatch")]
    Interrupted,
}

/// Wire payload for an sdapi-style txt2img endpoint.
///
/// Optional fields are omitted entirely when unset so backend defaults
/// apply.
#[derive(Debug, Clone, Serialize)]
pub struct SdApiPayload {
    pub prompt: String,
    pub negative_prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<String>,
    pub batch_size: u32,
    pub n_iter: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    pub seed: i64,
    pub subseed: i64,
    pub enable_hr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoising_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_upscaler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_second_pass_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_resize_x: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_resize_y: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_checkpoint_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_sampler_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_scheduler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub override_settings: Map<String, Value>,
    pub send_images: bool,
    pub save_images: bool,
}

impl SdApiPayload {
    pub fn from_request(request: &GenerationRequest) -> Self {
        let high_res = request.high_res.as_ref();
        Self {
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            styles: request.styles.clone(),
            batch_size: request.batch_size,
            n_iter: request.iteration_count,
            cfg_scale: request.cfg_scale,
            width: request.width,
            height: request.height,
            sampler_name: non_empty(&request.sampler_name),
            scheduler: non_empty(&request.scheduler_name),
            seed: request.seed,
            subseed: request.subseed,
            enable_hr: high_res.is_some(),
            denoising_strength: high_res.map(|_| request.denoising_strength),
            hr_scale: high_res.map(|hr| hr.scale),
            hr_upscaler: high_res.and_then(|hr| non_empty(&hr.upscaler)),
            hr_second_pass_steps: high_res.map(|hr| hr.second_pass_steps),
            hr_resize_x: high_res.map(|hr| hr.resize_x),
            hr_resize_y: high_res.map(|hr| hr.resize_y),
            hr_checkpoint_name: high_res.and_then(|hr| hr.checkpoint_name.as_deref().and_then(non_empty)),
            hr_sampler_name: high_res.and_then(|hr| hr.sampler_name.as_deref().and_then(non_empty)),
            hr_scheduler: high_res.and_then(|hr| hr.scheduler.as_deref().and_then(non_empty)),
            hr_prompt: high_res.and_then(|hr| non_empty(&hr.prompt)),
            hr_negative_prompt: high_res.and_then(|hr| non_empty(&hr.negative_prompt)),
            override_settings: request.override_settings.clone(),
            send_images: true,
            save_images: true,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SdApiResponse {
    #[serde(default)]
    images: Vec<String>,
    info: Option<String>,
}

/// Default pipeline implementation backed by an sdapi-compatible HTTP
/// endpoint.
pub struct SdApiPipeline {
    base_url: String,
    api_key: Option<String>,
}

impl SdApiPipeline {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    fn client(&self) -> Result<reqwest::blocking::Client, BackendError> {
        let mut headers = HeaderMap::new();

        if let Some(key) = &self.api_key {
            let token = key.trim();
            if !token.is_empty() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| BackendError::InvalidApiKey)?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(GENERATE_TIMEOUT_SECONDS))
            .default_headers(headers)
            .build()
            .map_err(|error| BackendError::Transport(error.to_string()))
    }
}

impl ImagePipeline for SdApiPipeline {
    fn process(
        &self,
        request: &GenerationRequest,
        session: &GenerationSession,
    ) -> Result<GenerationResult, DispatchError> {
        if session.interrupted() {
            return Err(BackendError::Interrupted.into());
        }

        let client = self.client()?;
        let endpoint = build_sdapi_endpoint(&self.base_url, "txt2img");
        let payload = SdApiPayload::from_request(request);

        let response = client
            .post(&endpoint)
            .json(&payload)
            .send()
            .map_err(|error| BackendError::Transport(format_transport_error(&endpoint, &error)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                endpoint,
            }
            .into());
        }

        let body: SdApiResponse = response
            .json()
            .map_err(|error| BackendError::Decode(error.to_string()))?;

        let mut images = Vec::with_capacity(body.images.len());
        for encoded in &body.images {
            let bytes = BASE64_STANDARD
                .decode(encoded.trim())
                .map_err(|error| BackendError::Decode(error.to_string()))?;
            let image = image::load_from_memory(&bytes)
                .map_err(|error| BackendError::Decode(error.to_string()))?;
            images.push(OutputImage::new(image));
        }

        let (infotexts, info, comments) =
            parse_info_blob(body.info.as_deref().unwrap_or(""), images.len());

        Ok(GenerationResult {
            images,
            infotexts,
            info,
            comments,
        })
    }
}

/// Recovers `(infotexts, info, comments)` from the endpoint's `info` field.
///
/// The field is usually a JSON blob with an `infotexts` array; plain-text
/// responses are tolerated by treating the whole text as the infotext of
/// every image.
fn parse_info_blob(raw: &str, image_count: usize) -> (Vec<String>, String, String) {
    if let Ok(Value::Object(blob)) = serde_json::from_str::<Value>(raw) {
        let mut infotexts: Vec<String> = blob
            .get("infotexts")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if infotexts.is_empty() {
            infotexts = vec![raw.to_string(); image_count];
        }

        let info = infotexts.first().cloned().unwrap_or_else(|| raw.to_string());
        let comments = blob
            .get("comments")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return (infotexts, info, comments);
    }

    (vec![raw.to_string(); image_count], raw.to_string(), String::new())
}

fn format_transport_error(endpoint: &str, error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return format!(
            "Generation request timed out at {}. Model loading or generation exceeded {} seconds; reduce steps/resolution or try again after the model is warm.",
            endpoint, GENERATE_TIMEOUT_SECONDS
        );
    }

    if error.is_connect() {
        return format!(
            "Connection to the generation backend failed at {}. Verify it is running and accepting API requests.",
            endpoint
        );
    }

    format!("Transport error at {}: {}", endpoint, error)
}

fn build_sdapi_endpoint(base_url: &str, endpoint: &str) -> String {
    let normalized = normalize_base_url(base_url);
    let path = endpoint.trim_start_matches('/');
    format!("{normalized}{SDAPI_PREFIX}/{path}")
}

fn normalize_base_url(base_url: &str) -> String {
    let mut normalized = base_url.trim().trim_end_matches('/').to_string();
    if normalized.is_empty() {
        return normalized;
    }

    loop {
        let stripped = if let Some(value) = normalized.strip_suffix("/docs") {
            Some(value)
        } else if let Some(value) = normalized.strip_suffix(SDAPI_PREFIX) {
            Some(value)
        } else {
            normalized.strip_suffix("/sdapi")
        };

        let Some(value) = stripped else {
            return normalized;
        };

        normalized = value.trim_end_matches('/').to_string();
        if normalized.is_empty() {
            return normalized;
        }
    }
}
