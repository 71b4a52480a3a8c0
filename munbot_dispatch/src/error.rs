use std::fmt::Display;

use munbot_core::ProviderError;
use thiserror::Error;

/// Text shown to the end user in place of a reply that could not be produced.
#[must_use]
pub fn apology(detail: &dyn Display) -> String {
    format!("I'm sorry, I've encountered an issue. {detail}")
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No valid API keys configured. Please replace placeholder keys with actual API keys.")]
    NoCredentials,

    #[error("Failed to communicate with AI after {attempts} attempts. {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: ProviderError,
    },

    #[error("No API key slot with index {0}")]
    UnknownSlot(usize),
}

impl DispatchError {
    /// Text shown to the end user in place of a reply.
    #[must_use]
    pub fn user_message(&self) -> String {
        apology(self)
    }
}
