#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

pub mod conversation;
pub mod error;
pub mod knowledge;
pub mod preamble;

pub use conversation::ConversationSession;
pub use error::{FailureKind, LoadError, ProviderError};
pub use knowledge::{CommitteeInfo, parse_committees};
pub use preamble::{Preamble, PreambleDocuments};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Sampling parameters applied to every conversation a backend opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "GenerationConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "GenerationConfig::default_top_p")]
    pub top_p: f32,
    #[serde(default = "GenerationConfig::default_top_k")]
    pub top_k: u32,
    #[serde(default = "GenerationConfig::default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl GenerationConfig {
    const fn default_temperature() -> f32 {
        0.7
    }

    const fn default_top_p() -> f32 {
        0.8
    }

    const fn default_top_k() -> u32 {
        40
    }

    const fn default_max_output_tokens() -> u32 {
        500
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Self::default_temperature(),
            top_p: Self::default_top_p(),
            top_k: Self::default_top_k(),
            max_output_tokens: Self::default_max_output_tokens(),
        }
    }
}

/// Incremental reply: finite, not restartable. Concatenate the fragments
/// to rebuild the full answer.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'static>>;

/// Drain a reply stream into a single string.
pub async fn collect_reply(mut stream: ReplyStream) -> Result<String, ProviderError> {
    let mut reply = String::new();
    while let Some(fragment) = stream.next().await {
        reply.push_str(&fragment?);
    }
    Ok(reply)
}

/// Loads the fixed system preamble (persona, knowledge, optional updates).
#[async_trait]
pub trait PreambleSource: Send + Sync {
    async fn load(&self) -> Result<Preamble, LoadError>;
}

/// One credential's view of the hosted model.
///
/// A backend is bound to a single API key; it opens stateful conversation
/// contexts that carry the preamble and sampling parameters.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(
        &self,
        preamble: Arc<Preamble>,
        config: &GenerationConfig,
    ) -> Result<Arc<dyn ChatSession>, ProviderError>;
}

/// A stateful conversation context.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Open a streamed send. Errors returned here happen before any fragment
    /// is produced; errors after that point travel inside the stream.
    async fn send_stream(&self, message: &str) -> Result<ReplyStream, ProviderError>;

    /// Send and wait for the whole reply.
    async fn send(&self, message: &str) -> Result<String, ProviderError> {
        let stream = self.send_stream(message).await?;
        collect_reply(stream).await
    }
}

#[async_trait]
impl<T: PreambleSource + ?Sized> PreambleSource for Arc<T> {
    async fn load(&self) -> Result<Preamble, LoadError> {
        (**self).load().await
    }
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn open_session(
        &self,
        preamble: Arc<Preamble>,
        config: &GenerationConfig,
    ) -> Result<Arc<dyn ChatSession>, ProviderError> {
        (**self).open_session(preamble, config).await
    }
}
