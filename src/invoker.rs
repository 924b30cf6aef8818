//! Analysis service interface
//!
//! The lifecycle only consumes [`AnalysisInvoker`]: a prompt goes in, either an
//! [`AnalysisResult`] or a typed [`InvocationFailure`] comes out. Transport and
//! provider errors never escape as `Err` of the crate error type.
//!
//! [`HttpAnalysisInvoker`] talks to a `generateContent`-style REST endpoint.

use crate::config::InvokerConfig;
use crate::error::{Error, ErrorType, Result};
use crate::types::AnalysisResult;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;

/// A failed analysis call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationFailure {
    /// Human-readable message
    pub message: String,
    /// Failure category
    pub kind: ErrorType,
    /// Raw model text, when the failure happened while interpreting it
    pub raw_output: Option<String>,
}

impl InvocationFailure {
    /// Failure without model output
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            raw_output: None,
        }
    }

    /// Attach the raw model text
    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    /// Whether this failure is likely to clear up on its own
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Trait for AI analysis backends
///
/// Implementations must bound their own call duration and report a timeout as
/// [`ErrorType::Timeout`].
#[async_trait]
pub trait AnalysisInvoker: Send + Sync {
    /// Analyze one prompt
    async fn analyze(&self, prompt: &str) -> std::result::Result<AnalysisResult, InvocationFailure>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// Parse model text into an [`AnalysisResult`]
///
/// Accepts bare JSON or JSON wrapped in a Markdown code fence. Text that is not
/// JSON is [`ErrorType::MalformedOutput`]; JSON lacking required fields is
/// [`ErrorType::Schema`].
pub fn parse_analysis_output(raw: &str) -> std::result::Result<AnalysisResult, InvocationFailure> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok());

    let body = fence
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim();

    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        InvocationFailure::new(
            ErrorType::MalformedOutput,
            format!("model output is not valid JSON: {}", e),
        )
        .with_raw_output(raw)
    })?;

    let analysis: AnalysisResult = serde_json::from_value(value).map_err(|e| {
        InvocationFailure::new(
            ErrorType::Schema,
            format!("model output does not match the analysis schema: {}", e),
        )
        .with_raw_output(raw)
    })?;

    if analysis.committee_name.trim().is_empty() {
        return Err(
            InvocationFailure::new(ErrorType::Schema, "committee_name is empty")
                .with_raw_output(raw),
        );
    }

    Ok(analysis)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

/// [`AnalysisInvoker`] backed by a `generateContent` REST endpoint
pub struct HttpAnalysisInvoker {
    http_client: reqwest::Client,
    config: InvokerConfig,
    api_key: String,
}

impl HttpAnalysisInvoker {
    /// Create an invoker
    ///
    /// The API key comes from config, falling back to `GEMINI_API_KEY`.
    pub fn new(config: InvokerConfig) -> Result<Self> {
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var("GEMINI_API_KEY").map_err(|_| Error::Config {
                message: "no analysis API key configured and GEMINI_API_KEY not set".into(),
                key: Some("invoker.api_key".into()),
            })?,
        };

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            http_client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
            },
            "safetySettings": self.config.safety_settings,
        })
    }
}

fn classify_transport_error(e: &reqwest::Error) -> InvocationFailure {
    if e.is_timeout() {
        InvocationFailure::new(ErrorType::Timeout, format!("analysis call timed out: {}", e))
    } else {
        InvocationFailure::new(ErrorType::Network, format!("analysis call failed: {}", e))
    }
}

fn classify_status(status: u16, body: &str) -> InvocationFailure {
    let kind = match status {
        401 | 403 => ErrorType::Auth,
        429 => ErrorType::Quota,
        _ => ErrorType::Network,
    };
    let snippet: String = body.chars().take(500).collect();
    InvocationFailure::new(kind, format!("analysis service returned HTTP {}: {}", status, snippet))
}

fn extract_text(response: GenerateContentResponse) -> std::result::Result<String, InvocationFailure> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(InvocationFailure::new(
            ErrorType::Safety,
            format!("prompt blocked: {}", reason),
        ));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(InvocationFailure::new(
            ErrorType::MalformedOutput,
            "response contained no candidates",
        ));
    };

    if matches!(
        candidate.finish_reason.as_deref(),
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST")
    ) {
        return Err(InvocationFailure::new(
            ErrorType::Safety,
            format!(
                "candidate blocked: {}",
                candidate.finish_reason.unwrap_or_default()
            ),
        ));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(InvocationFailure::new(
            ErrorType::MalformedOutput,
            "candidate contained no text",
        ));
    }
    Ok(text)
}

#[async_trait]
impl AnalysisInvoker for HttpAnalysisInvoker {
    async fn analyze(&self, prompt: &str) -> std::result::Result<AnalysisResult, InvocationFailure> {
        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), invoker = self.name(), "Analysis service error");
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            InvocationFailure::new(
                ErrorType::MalformedOutput,
                format!("unexpected analysis service response: {}", e),
            )
            .with_raw_output(body.clone())
        })?;

        let text = extract_text(parsed)?;
        parse_analysis_output(&text)
    }

    fn name(&self) -> &str {
        "http-generate-content"
    }
}
