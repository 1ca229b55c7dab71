use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{UmgError, UmgResult};
use crate::types::{EntityId, EntityType};

/// One candidate entity surfaced by entity extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub title: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub summary: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, Value>,
}

/// One candidate edge surfaced by the semantic-LLM relationship strategy
///. Entities are referenced by title, resolved to ids by
/// the caller after extraction/resolution has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticEdgeSuggestion {
    pub from_title: String,
    pub to_title: String,
    pub kind: String,
    pub confidence: f32,
    pub description: String,
}

/// One generated insight. `driver_entity_ids` are
/// threaded into the prompt as the ids of the assembled context's entities,
/// so the model references real ids rather than titles; the caller
/// (`mentor::DigestGenerator`) validates every id actually exists before
/// persisting the `Insight` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedInsight {
    pub title: String,
    pub body: String,
    pub insight_type: String,
    #[serde(default)]
    pub driver_entity_ids: Vec<EntityId>,
}

/// Abstraction over the LLM provider, so the Archivist's extraction stage,
/// the semantic relationship strategy, and digest generation stay testable
/// without a live API key. Each method corresponds to one structured call
/// site named by the component design; callers are responsible for
/// constructing the prompt text (kept out of this trait so prompts can
/// evolve independently of the transport).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Entity extraction. Must be deterministic-modulo-prompt:
    /// identical `text` + `reference_hint` at temperature 0 yields
    /// structurally identical output on retry.
    async fn extract_entities(
        &self,
        text: &str,
        reference_hint: &str,
    ) -> UmgResult<Vec<ExtractedEntity>>;

    /// Semantic edge proposal: given the text of an event
    /// and the entities attributable to it, ask the model to propose
    /// relationships a keyword pattern would miss.
    async fn propose_semantic_edges(
        &self,
        text: &str,
        entity_titles: &[String],
    ) -> UmgResult<Vec<SemanticEdgeSuggestion>>;

    /// Digest insight generation: given a ranked context bundle
    /// already assembled by the Mentor Context Assembler, produce
    /// Delta Watch / Connection / Prompt insights.
    async fn generate_digest_insights(
        &self,
        context_summary: &str,
    ) -> UmgResult<Vec<GeneratedInsight>>;

    /// Conversational reply for `POST /mentor/chat`, grounded in the
    /// assembled context. Not part of the graph-consolidation core proper —
    /// default implementation is a deterministic echo so test doubles don't
    /// need to override it; `OpenAiLlmClient` provides the real behavior.
    async fn respond_to_message(&self, _context_summary: &str, message: &str) -> UmgResult<String> {
        Ok(format!("Noted: {message}"))
    }
}

/// Configuration for the OpenAI-compatible HTTP client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> UmgResult<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| UmgError::Config("LLM_API_KEY is required".into()))?;
        let api_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self {
            api_url,
            api_key,
            model,
            timeout: Duration::from_secs(30),
        })
    }
}

/// OpenAI-compatible chat-completions client. Every call asks for
/// `temperature=0` JSON output and parses the first choice's content as
/// a JSON array matching the expected shape.
pub struct OpenAiLlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiLlmClient {
    pub fn new(config: LlmConfig) -> UmgResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UmgError::Llm(anyhow::anyhow!(e)))?;
        Ok(Self { config, http })
    }

    async fn chat_json(&self, system: &str, user: &str) -> UmgResult<Value> {
        let payload = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| UmgError::Llm(anyhow::anyhow!(e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UmgError::Llm(anyhow::anyhow!("llm provider error: {body}")));
        }

        let data: Value = response.json().await.map_err(|e| UmgError::Llm(anyhow::anyhow!(e)))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| UmgError::Llm(anyhow::anyhow!("missing message content")))?;

        serde_json::from_str(content).map_err(UmgError::from)
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn extract_entities(
        &self,
        text: &str,
        reference_hint: &str,
    ) -> UmgResult<Vec<ExtractedEntity>> {
        let system = "Extract entities (title, type, summary, aliases, dates) from the user's \
            text as a JSON object {\"entities\": [...]}. `type` must be one of the closed set \
            of entity types. Be deterministic: identical input must produce identical output.";
        let user = format!("reference_hint: {reference_hint}\n\ntext:\n{text}");
        let value = self.chat_json(system, &user).await?;
        let entities = value
            .get("entities")
            .cloned()
            .ok_or_else(|| UmgError::Llm(anyhow::anyhow!("missing 'entities' field")))?;
        serde_json::from_value(entities).map_err(UmgError::from)
    }

    async fn propose_semantic_edges(
        &self,
        text: &str,
        entity_titles: &[String],
    ) -> UmgResult<Vec<SemanticEdgeSuggestion>> {
        let system = "Propose relationships between the listed entities implied by the text, \
            as a JSON object {\"edges\": [...]}, each with from_title, to_title, kind \
            (snake_case), confidence in [0,1], and a one-sentence description.";
        let user = format!("entities: {}\n\ntext:\n{text}", entity_titles.join(", "));
        let value = self.chat_json(system, &user).await?;
        let edges = value
            .get("edges")
            .cloned()
            .ok_or_else(|| UmgError::Llm(anyhow::anyhow!("missing 'edges' field")))?;
        serde_json::from_value(edges).map_err(UmgError::from)
    }

    async fn generate_digest_insights(&self, context_summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
        let system = "Given the assembled graph context, produce a JSON object \
            {\"insights\": [...]}, each with title, body, insight_type \
            (one of delta_watch, connection, prompt), and driver_entity_ids \
            (a subset of the entity ids given in the context). Do not repeat \
            any pattern listed under 'previously dismissed'.";
        let value = self.chat_json(system, context_summary).await?;
        let insights = value
            .get("insights")
            .cloned()
            .ok_or_else(|| UmgError::Llm(anyhow::anyhow!("missing 'insights' field")))?;
        serde_json::from_value(insights).map_err(UmgError::from)
    }

    async fn respond_to_message(&self, context_summary: &str, message: &str) -> UmgResult<String> {
        let payload = json!({
            "model": self.config.model,
            "temperature": 0.7,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a proactive mentor grounded in the user's personal \
                        knowledge graph. Use the supplied context to answer naturally; never \
                        invent facts the context does not support.",
                },
                { "role": "system", "content": context_summary },
                { "role": "user", "content": message },
            ],
        });

        let response = self
            .http
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| UmgError::Llm(anyhow::anyhow!(e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UmgError::Llm(anyhow::anyhow!("llm provider error: {body}")));
        }

        let data: Value = response.json().await.map_err(|e| UmgError::Llm(anyhow::anyhow!(e)))?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| UmgError::Llm(anyhow::anyhow!("missing message content")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_entity_deserializes_from_llm_json_shape() {
        let json = r#"{
            "title": "Executive Director at Youth Empowerment Through Arts and Humanities",
            "type": "role",
            "summary": "",
            "aliases": []
        }"#;
        let entity: ExtractedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.entity_type, EntityType::Role);
    }

    struct DefaultOnlyClient;

    #[async_trait]
    impl LlmClient for DefaultOnlyClient {
        async fn extract_entities(&self, _text: &str, _hint: &str) -> UmgResult<Vec<ExtractedEntity>> {
            Ok(vec![])
        }
        async fn propose_semantic_edges(
            &self,
            _text: &str,
            _titles: &[String],
        ) -> UmgResult<Vec<SemanticEdgeSuggestion>> {
            Ok(vec![])
        }
        async fn generate_digest_insights(&self, _context_summary: &str) -> UmgResult<Vec<GeneratedInsight>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn respond_to_message_default_echoes_the_message() {
        let client = DefaultOnlyClient;
        let reply = client.respond_to_message("", "What's next for the Feed?").await.unwrap();
        assert!(reply.contains("What's next for the Feed?"));
    }
}
