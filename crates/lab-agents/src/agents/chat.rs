//! Chat-completion agent - one request to an OpenAI-compatible endpoint
//!
//! The request path is shared with the adjudication pass.

use async_trait::async_trait;
use consensus::RawBiomarkerRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionAgent, LabDocument};
use crate::config::EndpointConfig;
use crate::error::{AgentError, AgentResult};
use crate::parse::parse_agent_output;

/// System prompt sent with every document
pub const EXTRACTION_PROMPT: &str = "\
You extract laboratory test results from medical lab reports.

Return ONLY a JSON object, with no prose and no markdown, in this shape:

{\"biomarkers\": [{\"test_name\": \"Hemoglobin\", \"value\": 13.5, \"unit\": \"g/dL\", \"reference_range\": \"13.0 - 17.0\"}]}

Rules:
- Include every test result in the report, once each.
- Use standard English test names.
- Report numeric values as JSON numbers using a period as the decimal separator.
- Keep qualifiers such as < or > in the value as a string, e.g. \"<0.5\".
- Report qualitative results (Positive, Negative, Trace) as strings.
- Use null for a unit or reference range that is not printed.";

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn completions_url(endpoint: &EndpointConfig) -> String {
    format!("{}/chat/completions", endpoint.url.trim_end_matches('/'))
}

/// Send one system + user exchange and return the first choice's content.
pub(crate) async fn complete(
    http: &reqwest::Client,
    endpoint: &EndpointConfig,
    system_prompt: &str,
    user_content: String,
) -> AgentResult<String> {
    let request = ChatRequest {
        model: &endpoint.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user_content,
            },
        ],
        max_tokens: endpoint.max_tokens,
        temperature: 0.0,
    };

    let mut builder = http.post(completions_url(endpoint)).json(&request);
    if let Some(key) = endpoint.api_key() {
        builder = builder.bearer_auth(key);
    }
    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(AgentError::Http { status, body });
    }

    let chat: ChatResponse = response.json().await?;
    let content = chat
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AgentError::Malformed("response has no message content".to_string()))?;

    debug!(
        endpoint = %endpoint.id,
        model = %endpoint.model,
        chars = content.len(),
        "Received completion"
    );
    Ok(content)
}

#[derive(Debug, Clone)]
pub struct ChatCompletionAgent {
    endpoint: EndpointConfig,
    http: reqwest::Client,
}

impl ChatCompletionAgent {
    pub fn new(endpoint: EndpointConfig, http: reqwest::Client) -> Self {
        Self { endpoint, http }
    }
}

#[async_trait]
impl ExtractionAgent for ChatCompletionAgent {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    async fn extract(&self, document: &LabDocument) -> AgentResult<Vec<RawBiomarkerRecord>> {
        let content =
            complete(&self.http, &self.endpoint, EXTRACTION_PROMPT, document.text.clone()).await?;
        parse_agent_output(&self.endpoint.id, &content)
    }
}
