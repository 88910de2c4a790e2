//! LLM arbitration stage - HTTP client for OpenAI-compatible APIs
//!
//! Presents the original name plus the annotated candidates to a chat model
//! and parses a structured JSON decision out of the reply.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::RagConfig;
use super::models::{LlmCandidate, LlmChoice, confidence_label_to_score};
use crate::utils::{BiomapperError, Result};

const SYSTEM_PROMPT: &str = "You are an expert biochemist and cheminformatician. Your task is to \
determine the most accurate compound identifier (CID) for a given biochemical name, based on a \
list of candidates retrieved from a similarity search and their detailed annotations.\n\n\
Evaluate each candidate against the original biochemical name. Consider factors like:\n\
- Direct name matches in title or synonyms\n\
- Chemical nomenclature patterns (e.g., D- vs L- forms, alpha vs beta configurations)\n\
- IUPAC name relevance\n\
- Molecular formula consistency\n\
- Description relevance\n\n\
Respond in JSON format with the following fields:\n\
- \"selected_cid\": The CID you determine to be the best match (integer), or null if no candidate \
is a good match.\n\
- \"confidence\": Your confidence as a decimal between 0.0 and 1.0, or one of \"high\", \
\"medium\", \"low\", \"none\".\n\
- \"rationale\": A brief explanation for your choice, or why no candidate is suitable (string).\n\n\
Example response:\n\
{\"selected_cid\": 5793, \"confidence\": 0.95, \"rationale\": \"Direct title match with common \
synonym 'glucose'\"}";

const DESCRIPTION_TRUNCATE: usize = 200;

/// Arbitration interface over the candidate set
#[async_trait]
pub trait ChatArbiter: Send + Sync {
    async fn select_best_cid(&self, name: &str, candidates: &[LlmCandidate]) -> Result<LlmChoice>;
}

/// OpenAI-compatible chat client for arbitration
pub struct LlmArbiter {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl LlmArbiter {
    pub fn new(config: &RagConfig) -> Result<Self> {
        let api_key = config
            .llm_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BiomapperError::config("LLM API key not configured"))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            http_client,
            api_base: config.llm_api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
        })
    }

    fn build_user_prompt(name: &str, candidates: &[LlmCandidate]) -> String {
        let mut parts = vec![format!("Original Biochemical Name: \"{}\"\n", name)];
        parts.push("Candidate CIDs and their details:".to_string());

        for (i, candidate) in candidates.iter().enumerate() {
            let annotation = &candidate.annotation;
            parts.push(format!("\nCandidate {}:", i + 1));
            parts.push(format!("  CID: {}", candidate.hit.cid));
            parts.push(format!("  Similarity Score: {:.4}", candidate.hit.score));
            parts.push(format!("  Title: {}", annotation.title.as_deref().unwrap_or("N/A")));
            parts.push(format!(
                "  IUPAC Name: {}",
                annotation.iupac_name.as_deref().unwrap_or("N/A")
            ));
            parts.push(format!(
                "  Molecular Formula: {}",
                annotation.molecular_formula.as_deref().unwrap_or("N/A")
            ));

            if annotation.synonyms.is_empty() {
                parts.push("  Synonyms: N/A".to_string());
            } else {
                parts.push(format!(
                    "  Synonyms ({} shown): {}",
                    annotation.synonyms.len(),
                    annotation.synonyms.join(", ")
                ));
            }

            match &annotation.description {
                Some(description) => {
                    let text = if description.chars().count() > DESCRIPTION_TRUNCATE {
                        let truncated: String =
                            description.chars().take(DESCRIPTION_TRUNCATE - 3).collect();
                        format!("{}...", truncated)
                    } else {
                        description.clone()
                    };
                    parts.push(format!("  Description: {}", text));
                },
                None => parts.push("  Description: N/A".to_string()),
            }
        }

        parts.push(
            "\nBased on the information above, please provide your mapping decision in the \
             specified JSON format."
                .to_string(),
        );
        parts.join("\n")
    }
}

#[async_trait]
impl ChatArbiter for LlmArbiter {
    async fn select_best_cid(&self, name: &str, candidates: &[LlmCandidate]) -> Result<LlmChoice> {
        if candidates.is_empty() {
            return Ok(LlmChoice {
                error_message: Some("No candidates provided for arbitration".to_string()),
                ..Default::default()
            });
        }

        let user_prompt = Self::build_user_prompt(name, candidates);
        tracing::info!(
            "Sending arbitration request for '{}' with {} candidates",
            name,
            candidates.len()
        );

        let chat_request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt },
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BiomapperError::Timeout(120_000)
                } else {
                    BiomapperError::adapter("llm", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BiomapperError::adapter(
                "llm",
                format!("API error {}: {}", status, error_text),
            ));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BiomapperError::adapter("llm", e))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| BiomapperError::adapter("llm", "Empty response from model"))?;

        Ok(parse_choice(content))
    }
}

/// Extract the decision JSON from a possibly noisy reply
fn parse_choice(content: &str) -> LlmChoice {
    static JSON_BLOB: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("invalid JSON blob regex"));

    let json_str = JSON_BLOB
        .find(content)
        .map(|m| m.as_str())
        .unwrap_or(content);

    let raw: RawChoice = match serde_json::from_str(json_str) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("Failed to parse arbitration reply as JSON: {}", e);
            return LlmChoice {
                error_message: Some(format!("Failed to parse arbitration reply: {}", e)),
                ..Default::default()
            };
        },
    };

    let confidence = raw.confidence.as_ref().and_then(normalize_confidence);

    LlmChoice {
        selected_cid: raw.selected_cid,
        confidence,
        rationale: raw
            .rationale
            .or_else(|| Some("No rationale provided".to_string())),
        error_message: None,
    }
}

/// Numeric-or-categorical confidence, normalized through the one canonical
/// label table
fn normalize_confidence(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v.clamp(0.0, 1.0)),
        serde_json::Value::String(s) => match confidence_label_to_score(s) {
            Some(score) => Some(score),
            None => {
                tracing::warn!("Could not parse confidence value '{}', defaulting to 0.5", s);
                Some(0.5)
            },
        },
        _ => None,
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    selected_cid: Option<i64>,
    confidence: Option<serde_json::Value>,
    rationale: Option<String>,
}
