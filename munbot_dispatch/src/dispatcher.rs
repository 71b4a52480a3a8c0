//! Multi-key dispatcher: rotates credentials, retries failed sends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use munbot_core::{
    ChatBackend, FailureKind, GenerationConfig, PreambleSource, ProviderError, ReplyStream,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{SessionCache, build_session};
use crate::error::DispatchError;
use crate::pool::KeyPool;
use crate::stats::{DispatcherStats, HealthReport, KeyStats};

/// Retry and health-tracking knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Attempts per `send` before giving up
    #[serde(default = "DispatchConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// Errors after which a key is taken out of rotation
    #[serde(default = "DispatchConfig::default_error_threshold")]
    pub error_threshold: u32,
    /// Network-error backoff unit; attempt N waits N times this
    #[serde(default = "DispatchConfig::default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "DispatchConfig::default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "DispatchConfig::default_health_probe_message")]
    pub health_probe_message: String,
}

impl DispatchConfig {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_error_threshold() -> u32 {
        5
    }

    const fn default_backoff_ms() -> u64 {
        1000
    }

    const fn default_health_check_interval_secs() -> u64 {
        300
    }

    fn default_health_probe_message() -> String {
        "Test".to_string()
    }

    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            error_threshold: Self::default_error_threshold(),
            backoff_ms: Self::default_backoff_ms(),
            health_check_interval_secs: Self::default_health_check_interval_secs(),
            health_probe_message: Self::default_health_probe_message(),
        }
    }
}

/// Sends user messages through a pool of credentials.
///
/// Each credential has its own backend and at most one cached conversation
/// context. A failed attempt is charged to the slot that made it, the slot's
/// context is discarded, and the next attempt goes to the next slot in the
/// rotation. Only an exhausted retry budget reaches the caller.
pub struct Dispatcher<B = Arc<dyn ChatBackend>, S = Arc<dyn PreambleSource>>
where
    B: ChatBackend,
    S: PreambleSource,
{
    backends: Vec<B>,
    preamble_source: S,
    generation: GenerationConfig,
    config: DispatchConfig,
    pool: Mutex<KeyPool>,
    sessions: SessionCache,
}

impl<B, S> Dispatcher<B, S>
where
    B: ChatBackend,
    S: PreambleSource,
{
    /// Fails with [`DispatchError::NoCredentials`] if `backends` is empty.
    pub fn new(
        backends: Vec<B>,
        preamble_source: S,
        generation: GenerationConfig,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        let pool =
            KeyPool::new(backends.len(), config.error_threshold).ok_or(DispatchError::NoCredentials)?;
        let sessions = SessionCache::new(backends.len());

        info!(
            "Initialized {} AI instances with round-robin load balancing",
            backends.len()
        );

        Ok(Self {
            backends,
            preamble_source,
            generation,
            config,
            pool: Mutex::new(pool),
            sessions,
        })
    }

    fn pool(&self) -> MutexGuard<'_, KeyPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.backends.len()
    }

    fn check_slot(&self, slot: usize) -> Result<(), DispatchError> {
        if slot < self.backends.len() {
            Ok(())
        } else {
            Err(DispatchError::UnknownSlot(slot))
        }
    }

    /// Send a user message and return the reply as a stream of fragments.
    pub async fn send(&self, message: &str) -> Result<ReplyStream, DispatchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = ProviderError::Other("Unknown error occurred.".to_string());

        for attempt in 1..=max_attempts {
            let slot = self.pool().pick_slot();
            self.pool().touch(slot);
            debug!(
                "Using chat session {} of {} (attempt {attempt}/{max_attempts})",
                slot + 1,
                self.backends.len()
            );

            let err = match self.try_send(slot, message).await {
                Ok(stream) => {
                    self.pool().mark_success(slot);
                    info!("Message sent successfully using API key {}", slot + 1);
                    return Ok(stream);
                }
                Err(err) => err,
            };

            warn!("Attempt {attempt} failed on API key {}: {err}", slot + 1);
            self.pool().mark_failure(slot, &err.to_string());
            self.sessions.evict(slot);

            match err.kind() {
                FailureKind::Auth => {
                    error!("API key issue detected for key {}", slot + 1);
                }
                FailureKind::RateLimit => {
                    warn!("Rate limit hit for key {}, trying next key", slot + 1);
                }
                FailureKind::Network if attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    info!("Network error, retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                FailureKind::Network | FailureKind::Unknown => {}
            }

            last_error = err;
        }

        error!("All {max_attempts} attempts failed: {last_error}");
        Err(DispatchError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn try_send(&self, slot: usize, message: &str) -> Result<ReplyStream, ProviderError> {
        let cached = self
            .sessions
            .get_or_create(
                slot,
                &self.backends[slot],
                &self.preamble_source,
                &self.generation,
            )
            .await?;
        cached.session.send_stream(message).await
    }

    /// Start fresh: drop every context, rewind the rotation and forgive one
    /// error per key.
    pub fn reset_all(&self) {
        self.sessions.evict_all();
        let mut pool = self.pool();
        pool.reset_cursor();
        pool.decay_errors();
    }

    /// Drop one key's context so its next use rebuilds it.
    pub fn reset_session(&self, slot: usize) -> Result<(), DispatchError> {
        self.check_slot(slot)?;
        self.sessions.evict(slot);
        Ok(())
    }

    /// Re-fetch the preamble documents for every key.
    pub async fn reload_preambles(&self) -> usize {
        info!("Forcing reload of system instructions for all keys");
        self.sessions.evict_all();
        self.preload().await
    }

    /// Build contexts for every healthy key that has none yet. Returns the
    /// number of active contexts afterwards.
    pub async fn preload(&self) -> usize {
        for slot in 0..self.backends.len() {
            let healthy = self.pool().slot(slot).is_some_and(|s| s.healthy);
            if !healthy || self.sessions.is_cached(slot) {
                continue;
            }

            let result = self
                .sessions
                .get_or_create(
                    slot,
                    &self.backends[slot],
                    &self.preamble_source,
                    &self.generation,
                )
                .await;
            if let Err(e) = result {
                warn!("Failed to preload chat session {}: {e}", slot + 1);
                self.pool()
                    .mark_failure(slot, &format!("Chat creation failed: {e}"));
            }
        }

        let active = self.sessions.active_count();
        info!(
            "Preloaded {active}/{} chat sessions with system instructions",
            self.backends.len()
        );
        active
    }

    /// Probe every key with a throwaway context and a short message.
    ///
    /// A key that answers is put back into rotation; a key that fails is
    /// charged one error. Cached contexts are left alone.
    pub async fn health_check(&self) -> HealthReport {
        info!("Performing API key health check");
        let mut report = HealthReport::default();

        for (slot, backend) in self.backends.iter().enumerate() {
            let probe = async {
                let fresh = build_session(backend, &self.preamble_source, &self.generation).await?;
                fresh.session.send(&self.config.health_probe_message).await
            };

            match probe.await {
                Ok(_) => {
                    self.pool().restore(slot);
                    info!("API key {} is healthy", slot + 1);
                    report.healthy.push(slot);
                }
                Err(e) => {
                    let message = format!("Health check failed: {e}");
                    self.pool().mark_failure(slot, &message);
                    warn!("API key {} failed health check: {e}", slot + 1);
                    report.failed.push((slot, message));
                }
            }
        }

        report
    }

    /// Operator override for a key taken out of rotation.
    pub fn mark_healthy(&self, slot: usize) -> Result<(), DispatchError> {
        self.check_slot(slot)?;
        self.pool().mark_healthy(slot);
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let pool = self.pool();
        let key_statuses: Vec<KeyStats> = pool
            .slots()
            .iter()
            .map(|s| KeyStats {
                index: s.index + 1,
                healthy: s.healthy,
                error_count: s.error_count,
                last_used: s.last_used,
                last_error: s.last_error.clone(),
                preamble_loaded: self.sessions.is_cached(s.index),
            })
            .collect();

        let healthy_keys = pool.healthy_count();
        DispatcherStats {
            total_keys: pool.len(),
            healthy_keys,
            unhealthy_keys: pool.len() - healthy_keys,
            current_key_index: pool.cursor(),
            preambles_loaded: key_statuses.iter().filter(|k| k.preamble_loaded).count(),
            active_chat_sessions: self.sessions.active_count(),
            total_errors: pool.slots().iter().map(|s| u64::from(s.error_count)).sum(),
            key_statuses,
        }
    }
}
