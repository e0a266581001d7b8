//! Support chat with a prioritized provider fallback chain.

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ChatConfig;

pub const GREETING: &str =
    "Hello! I'm the PortraCV Assistant. How can I help you with your printing automation today?";
pub const APOLOGY: &str = "My brain is having a quick hiccup. Please try again in a moment.";
pub const NOT_CONFIGURED: &str =
    "The assistant is not configured yet: no API key is available. Please contact the shop.";

pub const SYSTEM_PROMPT: &str = "You are the assistant for PortraCV, a printing shop tool that \
lays out ID photos (2x2 inch, 1x1 inch and passport size) on A4 sheets, removes photo \
backgrounds and prints them. You are not a human. Be helpful, professional and concise: \
answer in at most three sentences and only about PortraCV and photo printing.";

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Message is longer than {MAX_MESSAGE_CHARS} characters")]
    MessageTooLong,
    #[error("The assistant is still answering the previous message")]
    Busy,
    #[error("The conversation was reset before the reply arrived")]
    Reset,
    #[error("{provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} answered {status}")]
    Status { provider: String, status: u16 },
    #[error("{provider} returned no text")]
    EmptyReply { provider: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: u64,
    pub text: String,
    pub sender: Sender,
    pub is_error: bool,
}

/// Result of running the fallback chain once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Success { text: String, provider: String },
    Exhausted { attempts: usize },
    NotConfigured,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, system_prompt: &str, user_text: &str) -> Result<String, ChatError>;
}

/// Generative-language provider, one instance per model.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    name: String,
}

impl GeminiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            name: format!("gemini/{}", model),
            model,
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system_prompt: &str, user_text: &str) -> Result<String, ChatError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": user_text }] }]
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|source| ChatError::Transport {
                provider: self.name.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ChatError::Status {
                provider: self.name.clone(),
                status: response.status().as_u16(),
            });
        }

        let parsed: GeminiResponse =
            response.json().await.map_err(|source| ChatError::Transport {
                provider: self.name.clone(),
                source,
            })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        non_empty(text, &self.name)
    }
}

/// Plain chat-completion endpoint used as the last resort.
pub struct CompletionProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    name: String,
}

impl CompletionProvider {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            name: format!("backup/{}", model),
            model,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for CompletionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system_prompt: &str, user_text: &str) -> Result<String, ChatError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_text }
            ]
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| ChatError::Transport {
                provider: self.name.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ChatError::Status {
                provider: self.name.clone(),
                status: response.status().as_u16(),
            });
        }

        let parsed: CompletionResponse =
            response.json().await.map_err(|source| ChatError::Transport {
                provider: self.name.clone(),
                source,
            })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        non_empty(text, &self.name)
    }
}

fn non_empty(text: String, provider: &str) -> Result<String, ChatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(ChatError::EmptyReply {
            provider: provider.to_string(),
        })
    } else {
        Ok(trimmed.to_string())
    }
}

/// Ordered providers tried one after another with a per-attempt timeout and
/// a fixed pause after each failure.
#[derive(Clone)]
pub struct FallbackChain {
    providers: Vec<Arc<dyn ChatProvider>>,
    attempt_timeout: Duration,
    backoff: Duration,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self {
            providers,
            attempt_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Gemini models in priority order, then the backup endpoint when both
    /// its URL and key are configured.
    pub fn from_config(client: &reqwest::Client, config: &ChatConfig) -> Self {
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();

        if let Some(key) = &config.gemini_api_key {
            for model in &config.models {
                providers.push(Arc::new(GeminiProvider::new(
                    client.clone(),
                    config.gemini_base_url.clone(),
                    key.clone(),
                    model.clone(),
                )));
            }
        }

        if let (Some(url), Some(key)) = (&config.backup_url, &config.backup_api_key) {
            providers.push(Arc::new(CompletionProvider::new(
                client.clone(),
                url.clone(),
                key.clone(),
                config.backup_model.clone(),
            )));
        }

        Self::new(providers)
            .with_timeout(config.attempt_timeout)
            .with_backoff(config.backoff)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn generate(&self, system_prompt: &str, user_text: &str) -> ChatOutcome {
        if self.providers.is_empty() {
            return ChatOutcome::NotConfigured;
        }

        for (idx, provider) in self.providers.iter().enumerate() {
            let attempt = tokio::time::timeout(
                self.attempt_timeout,
                provider.generate(system_prompt, user_text),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ChatError::Timeout {
                    provider: provider.name().to_string(),
                    timeout: self.attempt_timeout,
                })
            });

            match attempt {
                Ok(text) => {
                    info!("Chat answered by {}", provider.name());
                    return ChatOutcome::Success {
                        text,
                        provider: provider.name().to_string(),
                    };
                }
                Err(e) => {
                    warn!("Chat provider {} failed: {}", provider.name(), e);
                    if idx + 1 < self.providers.len() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        ChatOutcome::Exhausted {
            attempts: self.providers.len(),
        }
    }
}

#[derive(Debug)]
struct Transcript {
    messages: Vec<ChatMessage>,
    next_id: u64,
    awaiting_response: bool,
    /// Bumped by every reset. Replies for an older generation are dropped.
    generation: u64,
}

impl Transcript {
    fn new(generation: u64) -> Self {
        let mut transcript = Self {
            messages: Vec::new(),
            next_id: 1,
            awaiting_response: false,
            generation,
        };
        transcript.push(GREETING.to_string(), Sender::Bot, false);
        transcript
    }

    fn push(&mut self, text: String, sender: Sender, is_error: bool) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_id,
            text,
            sender,
            is_error,
        };
        self.next_id += 1;
        self.messages.push(message.clone());
        message
    }
}

/// Per-session assistant: transcript plus the single-flight state machine
/// `Idle -> AwaitingResponse -> Idle`.
pub struct ChatAssistant {
    chain: FallbackChain,
    transcript: Arc<Mutex<Transcript>>,
}

/// Returns the assistant to idle even if the submitting future is dropped.
struct AwaitingGuard {
    transcript: Arc<Mutex<Transcript>>,
}

impl Drop for AwaitingGuard {
    fn drop(&mut self) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.awaiting_response = false;
        }
    }
}

impl ChatAssistant {
    pub fn new(chain: FallbackChain) -> Self {
        Self {
            chain,
            transcript: Arc::new(Mutex::new(Transcript::new(0))),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.transcript
            .lock()
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.transcript
            .lock()
            .map(|t| t.awaiting_response)
            .unwrap_or(false)
    }

    /// Appends the user's message, runs the fallback chain and appends
    /// exactly one bot reply. Returns both messages in transcript order.
    pub async fn submit(&self, text: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong);
        }

        let (user_message, generation) = {
            let mut transcript = self.transcript.lock().map_err(|_| ChatError::Busy)?;
            if transcript.awaiting_response {
                return Err(ChatError::Busy);
            }
            transcript.awaiting_response = true;
            let message = transcript.push(text.to_string(), Sender::User, false);
            (message, transcript.generation)
        };
        let _guard = AwaitingGuard {
            transcript: self.transcript.clone(),
        };

        let (reply, is_error) = match self.chain.generate(SYSTEM_PROMPT, text).await {
            ChatOutcome::Success { text, .. } => (text, false),
            ChatOutcome::Exhausted { attempts } => {
                error!("All {} chat providers failed", attempts);
                (APOLOGY.to_string(), true)
            }
            ChatOutcome::NotConfigured => {
                error!("Chat requested but no provider credentials are configured");
                (NOT_CONFIGURED.to_string(), true)
            }
        };

        let bot_message = {
            let mut transcript = self.transcript.lock().map_err(|_| ChatError::Busy)?;
            if transcript.generation != generation {
                info!("Dropping chat reply for a conversation that was reset");
                return Err(ChatError::Reset);
            }
            transcript.push(reply, Sender::Bot, is_error)
        };

        Ok(vec![user_message, bot_message])
    }

    /// Drops the transcript back to the greeting.
    pub fn reset(&self) {
        if let Ok(mut transcript) = self.transcript.lock() {
            let awaiting = transcript.awaiting_response;
            let generation = transcript.generation + 1;
            *transcript = Transcript::new(generation);
            transcript.awaiting_response = awaiting;
        }
    }
}
