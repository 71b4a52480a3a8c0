//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy type with its own input, dispatched
//! statically from `main`.

use std::sync::Arc;

use munbot_config::{Config, PreambleLocation};
use munbot_core::{ChatBackend, PreambleSource};
use munbot_dispatch::{Dispatcher, DispatcherStats};
use munbot_providers::{FilePreambleSource, GeminiProvider, HttpPreambleSource};
use tracing::info;

mod chat;
mod committees;
mod health;
mod info;
mod init;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use committees::{CommitteesInput, CommitteesStrategy};
pub use health::HealthStrategy;
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use version::VersionStrategy;

/// Contract for all command strategies.
///
/// Each strategy defines its own input type; calls are monomorphized, no
/// trait objects involved.
pub trait CommandStrategy: Send + Sync + 'static {
    type Input;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Document source named by the `preamble` config section.
fn build_preamble_source(config: &Config) -> anyhow::Result<Arc<dyn PreambleSource>> {
    let documents = config.preamble.documents.clone();
    let source: Arc<dyn PreambleSource> = match config.preamble.location()? {
        PreambleLocation::Http(base_url) => {
            info!("Loading assistant instructions from {base_url}");
            Arc::new(HttpPreambleSource::new(base_url, documents))
        }
        PreambleLocation::Dir(dir) => {
            info!("Loading assistant instructions from {}", dir.display());
            Arc::new(FilePreambleSource::new(dir, documents))
        }
    };
    Ok(source)
}

/// One Gemini backend per valid key, behind a dispatcher.
fn build_dispatcher(config: &Config, model: Option<String>) -> anyhow::Result<Dispatcher> {
    let keys = config.valid_api_keys();
    if keys.is_empty() {
        anyhow::bail!(
            "No valid Gemini API keys found. Add them to 'providers.gemini.api_keys' or set MUNBOT_API_KEY_1, MUNBOT_API_KEY_2, ..."
        );
    }

    let model = model.unwrap_or_else(|| config.providers.gemini.model.clone());
    info!("Found {} API keys, using model {model}", keys.len());

    let backends: Vec<Arc<dyn ChatBackend>> = keys
        .into_iter()
        .map(|key| {
            let mut provider = GeminiProvider::new(key).with_model(model.clone());
            if let Some(base_url) = &config.providers.gemini.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider) as Arc<dyn ChatBackend>
        })
        .collect();

    let dispatcher = Dispatcher::new(
        backends,
        build_preamble_source(config)?,
        config.generation.clone(),
        config.dispatch.clone(),
    )?;
    Ok(dispatcher)
}

fn print_stats(stats: &DispatcherStats) {
    println!(
        "Keys: {} total, {} healthy, {} unhealthy (next: {})",
        stats.total_keys,
        stats.healthy_keys,
        stats.unhealthy_keys,
        stats.current_key_index + 1
    );
    println!(
        "Sessions: {} active, {} with instructions loaded, {} errors recorded",
        stats.active_chat_sessions, stats.preambles_loaded, stats.total_errors
    );

    for key in &stats.key_statuses {
        let state = if key.healthy { "healthy" } else { "unhealthy" };
        let last_used = key
            .last_used
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        println!(
            "  [{}] {state}, errors: {}, last used: {last_used}, session: {}",
            key.index,
            key.error_count,
            if key.preamble_loaded { "yes" } else { "no" }
        );
        if let Some(ref error) = key.last_error {
            println!("      last error: {error}");
        }
    }
}
