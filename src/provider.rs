//! Completion providers and the name-keyed provider registry.
//!
//! A [`CompletionProvider`] turns a retrieval-grounded request into the
//! assistant's reply. Sessions carry only a provider *name*; the registry
//! maps names to constructors so the chat layer never branches on provider
//! identity. Built-ins: `"extractive"` (no model, answers directly from the
//! retrieved context) and `"openai"` (chat completions API with retry and
//! exponential backoff).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::models::ChatMessage;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MAX_RETRIES: u32 = 3;
const OPENAI_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Everything a provider gets to see for one completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The user's latest message.
    pub message: String,
    /// Formatted, relevance-annotated context block, when retrieval
    /// produced any hits.
    pub context_block: Option<String>,
    /// Whether the context block came from actual retrieval hits.
    pub grounded: bool,
    /// Trailing conversation history, oldest first.
    pub history: Vec<ChatMessage>,
    /// Display titles of the session's attached documents.
    pub document_titles: Vec<String>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError>;
}

type ProviderCtor =
    Box<dyn Fn(&ChatConfig) -> Result<Box<dyn CompletionProvider>, ChatError> + Send + Sync>;

/// Name-keyed constructor map for completion providers.
pub struct ProviderRegistry {
    ctors: HashMap<String, ProviderCtor>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in providers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("extractive", |_| Ok(Box::new(ExtractiveProvider)));
        registry.register("openai", |config| {
            Ok(Box::new(OpenAiProvider::from_config(config)?))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&ChatConfig) -> Result<Box<dyn CompletionProvider>, ChatError>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(name.to_string(), Box::new(ctor));
    }

    /// Construct the provider registered under `name`.
    pub fn create(
        &self,
        name: &str,
        config: &ChatConfig,
    ) -> Result<Box<dyn CompletionProvider>, ChatError> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| ChatError::UnknownProvider(name.to_string()))?;
        ctor(config)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Modelless provider: answers directly from the retrieved context.
pub struct ExtractiveProvider;

#[async_trait]
impl CompletionProvider for ExtractiveProvider {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        if request.document_titles.is_empty() {
            return Ok(
                "No documents are attached to this chat. Attach a document to ask questions about its contents."
                    .to_string(),
            );
        }

        match (&request.context_block, request.grounded) {
            (Some(context), true) => Ok(format!(
                "Based on your documents, here is the most relevant information:\n\n{}",
                context
            )),
            _ => Ok(format!(
                "I couldn't find anything relevant to your question in the attached documents ({}).",
                request.document_titles.join(", ")
            )),
        }
    }
}

/// Chat-completions provider backed by the OpenAI API.
///
/// Transient failures (HTTP 429, 5xx, network errors) are retried with
/// exponential backoff (1s, 2s, 4s, capped); other client errors fail
/// immediately.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChatError::Completion("OPENAI_API_KEY not set".to_string()))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        Ok(Self { api_key, model })
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<serde_json::Value> {
        let system = match &request.context_block {
            Some(context) if request.grounded => format!(
                "You are a document assistant. Answer using only the context below. \
                 Cite the source annotations when you draw on a passage.\n\n{}",
                context
            ),
            _ => "You are a document assistant. No relevant document context was found \
                  for this question; say so rather than inventing an answer."
                .to_string(),
        };

        let mut messages = vec![serde_json::json!({"role": "system", "content": system})];
        for msg in &request.history {
            messages.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.text,
            }));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.message}));
        messages
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(OPENAI_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChatError::Completion(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": self.build_messages(request),
        });

        let mut last_err = None;

        for attempt in 0..=OPENAI_MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(OPENAI_CHAT_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| ChatError::Completion(e.to_string()))?;
                        return parse_completion(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(ChatError::Completion(format!(
                            "OpenAI API error {}: {}",
                            status, text
                        )));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(ChatError::Completion(format!(
                        "OpenAI API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(ChatError::Completion(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ChatError::Completion("completion failed after retries".to_string())))
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String, ChatError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ChatError::Completion("invalid completion response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(context: Option<&str>, grounded: bool, titles: &[&str]) -> CompletionRequest {
        CompletionRequest {
            message: "what is this about?".to_string(),
            context_block: context.map(str::to_string),
            grounded,
            history: Vec::new(),
            document_titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn extractive_answers_from_context() {
        let reply = ExtractiveProvider
            .complete(&request(Some("chunk text"), true, &["report.pdf"]))
            .await
            .unwrap();
        assert!(reply.contains("chunk text"));
        assert!(reply.starts_with("Based on your documents"));
    }

    #[tokio::test]
    async fn extractive_without_documents_prompts_attachment() {
        let reply = ExtractiveProvider
            .complete(&request(None, false, &[]))
            .await
            .unwrap();
        assert!(reply.contains("No documents are attached"));
    }

    #[tokio::test]
    async fn extractive_without_hits_names_the_documents() {
        let reply = ExtractiveProvider
            .complete(&request(None, false, &["a.pdf", "b.txt"]))
            .await
            .unwrap();
        assert!(reply.contains("a.pdf, b.txt"));
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let registry = ProviderRegistry::with_builtins();
        let err = match registry.create("nonexistent", &ChatConfig::default()) {
            Err(err) => err,
            Ok(_) => panic!("expected error for unknown provider"),
        };
        assert!(matches!(err, ChatError::UnknownProvider(_)));
    }

    #[test]
    fn registry_lists_builtins() {
        let registry = ProviderRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["extractive", "openai"]);
    }

    #[test]
    fn custom_provider_can_be_registered() {
        struct Fixed;
        #[async_trait]
        impl CompletionProvider for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn complete(&self, _request: &CompletionRequest) -> Result<String, ChatError> {
                Ok("fixed reply".to_string())
            }
        }

        let mut registry = ProviderRegistry::empty();
        registry.register("fixed", |_| Ok(Box::new(Fixed)));
        let provider = registry.create("fixed", &ChatConfig::default()).unwrap();
        assert_eq!(provider.name(), "fixed");
    }

    #[test]
    fn completion_parsing_extracts_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "hello");
        assert!(parse_completion(&serde_json::json!({})).is_err());
    }
}
