//! OpenAI-compatible implementation of the SemanticOracle trait.
//!
//! Works against any `/chat/completions` endpoint that honours
//! `response_format = json_object` (OpenAI, DeepSeek, local gateways).
//!
//! # Example
//!
//! ```rust,ignore
//! use rfp_scout::oracle::{OpenAiOracle, OracleCredentials};
//!
//! let creds = OracleCredentials::new(api_key, "deepseek-chat")
//!     .with_base_url("https://api.deepseek.com");
//! let oracle = OpenAiOracle::new(creds, Duration::from_secs(30))?;
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::credentials::OracleCredentials;
use crate::error::{OracleError, OracleResult, ScoutError};
use crate::traits::oracle::{
    Category, Classification, ExtractedOpportunity, SemanticOracle, SiteProposal, SiteQuery,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Characters of candidate text sent for classification.
const MAX_CLASSIFY_CHARS: usize = 10_000;

/// Characters of page text sent for opportunity extraction.
const MAX_EXTRACT_CHARS: usize = 10_000;

const PROPOSE_SYSTEM: &str = r#"You locate public procurement pages for U.S. government bodies.
Given an entity and a department, list the official web pages where that department posts open bids, RFPs, RFQs or solicitations.
Prefer official .gov, .edu or .us domains. Never invent URLs you are not confident exist.
Return ONLY a JSON object: {"sites": [{"url": "...", "label": "<department name>", "confidence": 0.0-1.0}]}.
Return {"sites": []} when you do not know."#;

const CLASSIFY_SYSTEM: &str = r#"You screen public bid postings for a construction firm.
Decide whether the posting asks for construction, architecture, or engineering work (building, renovation, roofing, paving, HVAC, site work, design services, inspections).
Return ONLY a JSON object: {"category": "construction" | "architecture" | "engineering" | "other", "label": "<short topic>", "confidence": 0.0-1.0}."#;

const EXTRACT_SYSTEM: &str = r#"You read public procurement web pages for a construction firm.
Extract every open construction, architecture or engineering opportunity (bid, RFP, RFQ, solicitation) the text lists.
Return ONLY a JSON object: {"opportunities": [{"title": "...", "deadline": "YYYY-MM-DD" or null, "description": "<one or two sentences>"}]}.
Use null when no deadline is stated. Return {"opportunities": []} when the page lists none."#;

/// Oracle backed by an OpenAI-compatible chat completion API.
#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client,
    credentials: OracleCredentials,
}

impl OpenAiOracle {
    /// Create an oracle whose HTTP calls time out after `timeout`.
    pub fn new(credentials: OracleCredentials, timeout: Duration) -> Result<Self, ScoutError> {
        if credentials.api_key.is_empty() {
            return Err(ScoutError::Config("oracle API key is empty".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScoutError::Config(format!("failed to build oracle client: {}", e)))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn model(&self) -> &str {
        &self.credentials.model
    }

    /// Run one JSON-mode chat completion and return the raw content.
    async fn chat_json(&self, system: &str, user: &str) -> OracleResult<String> {
        let request = ChatRequest {
            model: self.credentials.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.credentials.base_url))
            .bearer_auth(self.credentials.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.credentials.model, "Oracle returned error status");
            return Err(OracleError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::MalformedResponse(e.to_string())
            }
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::MalformedResponse("no choices in response".into()))
    }
}

#[async_trait]
impl SemanticOracle for OpenAiOracle {
    async fn propose(&self, query: &SiteQuery) -> OracleResult<Vec<SiteProposal>> {
        let user = format!(
            "Entity: {}\nKind: {}\nState: {}\nDepartment: {}",
            query.entity_name,
            query.entity_kind,
            query.state.as_deref().unwrap_or("unknown"),
            query.department
        );
        let content = self.chat_json(PROPOSE_SYSTEM, &user).await?;
        let proposals = parse_proposals(&content, &query.department)?;
        debug!(query = %query.describe(), count = proposals.len(), "Oracle proposed sites");
        Ok(proposals)
    }

    async fn extract_opportunities(&self, text: &str) -> OracleResult<Vec<ExtractedOpportunity>> {
        let content = self
            .chat_json(EXTRACT_SYSTEM, &truncate(text, MAX_EXTRACT_CHARS))
            .await?;
        let found = parse_opportunities(&content)?;
        debug!(count = found.len(), "Oracle extracted opportunities");
        Ok(found)
    }

    async fn classify(&self, text: &str) -> OracleResult<Classification> {
        let content = self
            .chat_json(CLASSIFY_SYSTEM, &truncate(text, MAX_CLASSIFY_CHARS))
            .await?;
        parse_classification(&content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Remove a surrounding markdown code fence, if any.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProposalEnvelope {
    Wrapped { sites: Vec<ProposalJson> },
    Bare(Vec<ProposalJson>),
}

#[derive(Deserialize)]
struct ProposalJson {
    url: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

pub(crate) fn parse_proposals(content: &str, department: &str) -> OracleResult<Vec<SiteProposal>> {
    let envelope: ProposalEnvelope = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;
    let items = match envelope {
        ProposalEnvelope::Wrapped { sites } => sites,
        ProposalEnvelope::Bare(sites) => sites,
    };

    let mut proposals: Vec<SiteProposal> = items
        .into_iter()
        .filter(|p| !p.url.trim().is_empty())
        .map(|p| {
            let label = p
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| department.to_string());
            SiteProposal::new(p.url.trim(), label).with_confidence(p.confidence.unwrap_or(0.5))
        })
        .collect();
    proposals.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(proposals)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OpportunityEnvelope {
    Wrapped {
        #[serde(alias = "rfps", alias = "bids")]
        opportunities: Vec<OpportunityJson>,
    },
    Bare(Vec<OpportunityJson>),
    Single(OpportunityJson),
}

#[derive(Deserialize)]
struct OpportunityJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse extracted opportunities, dropping entries without a title.
pub(crate) fn parse_opportunities(content: &str) -> OracleResult<Vec<ExtractedOpportunity>> {
    let envelope: OpportunityEnvelope = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;
    let items = match envelope {
        OpportunityEnvelope::Wrapped { opportunities } => opportunities,
        OpportunityEnvelope::Bare(items) => items,
        OpportunityEnvelope::Single(item) => vec![item],
    };

    let non_blank = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Ok(items
        .into_iter()
        .filter_map(|item| {
            Some(ExtractedOpportunity {
                title: non_blank(item.title)?,
                deadline: non_blank(item.deadline),
                description: non_blank(item.description),
            })
        })
        .collect())
}

#[derive(Deserialize)]
struct ClassificationJson {
    category: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

pub(crate) fn parse_classification(content: &str) -> OracleResult<Classification> {
    let parsed: ClassificationJson = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

    let category = match Category::from_label(&parsed.category) {
        Category::Other(_) => Category::Other(
            parsed
                .label
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| parsed.category.trim().to_lowercase()),
        ),
        category => category,
    };
    let confidence = parsed
        .confidence
        .filter(|c| c.is_finite())
        .ok_or_else(|| OracleError::MalformedResponse("missing confidence".into()))?;

    Ok(Classification::new(category, confidence))
}

// Request/Response types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
