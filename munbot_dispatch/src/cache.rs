//! One lazily-built conversation context per credential slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use munbot_core::{ChatBackend, ChatSession, GenerationConfig, Preamble, PreambleSource, ProviderError};
use tracing::{debug, info};

/// A conversation context together with the preamble it was opened with.
#[derive(Clone)]
pub struct CachedSession {
    pub session: Arc<dyn ChatSession>,
    pub preamble: Arc<Preamble>,
}

impl std::fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSession")
            .field("session", &"<chat session>")
            .field("preamble_chars", &self.preamble.system_instruction().len())
            .finish()
    }
}

/// Load the preamble and open a fresh context, bypassing any cache.
pub async fn build_session<B, S>(
    backend: &B,
    source: &S,
    config: &GenerationConfig,
) -> Result<CachedSession, ProviderError>
where
    B: ChatBackend + ?Sized,
    S: PreambleSource + ?Sized,
{
    let preamble = Arc::new(source.load().await?);
    let session = backend.open_session(Arc::clone(&preamble), config).await?;
    Ok(CachedSession { session, preamble })
}

/// Per-slot session memo.
///
/// The lock is only held for lookups and inserts, never while a session is
/// being built. Two concurrent builders for the same slot both succeed and
/// the later insert replaces the earlier one.
#[derive(Debug)]
pub struct SessionCache {
    slots: Mutex<Vec<Option<CachedSession>>>,
}

impl SessionCache {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; len]),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<CachedSession>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<CachedSession> {
        self.slots().get(slot).cloned().flatten()
    }

    /// Return the cached context for `slot`, building it on first use.
    pub async fn get_or_create<B, S>(
        &self,
        slot: usize,
        backend: &B,
        source: &S,
        config: &GenerationConfig,
    ) -> Result<CachedSession, ProviderError>
    where
        B: ChatBackend + ?Sized,
        S: PreambleSource + ?Sized,
    {
        if let Some(cached) = self.get(slot) {
            debug!("Reusing chat session for API key {}", slot + 1);
            return Ok(cached);
        }

        let cached = build_session(backend, source, config).await?;
        info!(
            "Created new {} chat session for API key {}",
            backend.name(),
            slot + 1
        );
        self.insert(slot, cached.clone());
        Ok(cached)
    }

    fn insert(&self, slot: usize, cached: CachedSession) {
        if let Some(entry) = self.slots().get_mut(slot) {
            *entry = Some(cached);
        }
    }

    /// Drop the cached context. Returns `true` if one was present.
    pub fn evict(&self, slot: usize) -> bool {
        let evicted = self
            .slots()
            .get_mut(slot)
            .and_then(Option::take)
            .is_some();
        if evicted {
            info!("Chat session {} has been reset", slot + 1);
        }
        evicted
    }

    pub fn evict_all(&self) {
        self.slots().iter_mut().for_each(|entry| *entry = None);
        info!("All chat sessions have been reset");
    }

    #[must_use]
    pub fn is_cached(&self, slot: usize) -> bool {
        self.slots().get(slot).is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots().iter().filter(|entry| entry.is_some()).count()
    }
}
