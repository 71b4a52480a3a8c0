use munbot_config::{Config, PreambleLocation, mask_key};

/// Strategy for displaying configuration information.
///
/// API keys are masked; keys that are empty or still the template
/// placeholder are reported as skipped.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== munbot Configuration ===\n");

        let valid = config.valid_api_keys();
        println!(
            "API Keys ({} usable of {} configured):",
            valid.len(),
            config.providers.gemini.api_keys.len()
        );
        for (i, key) in valid.iter().enumerate() {
            println!("  [{}] {}", i + 1, mask_key(key));
        }
        println!();

        println!("Gemini:");
        println!("  Model: {}", config.providers.gemini.model);
        if let Some(ref base_url) = config.providers.gemini.base_url {
            println!("  Base URL: {base_url}");
        }
        println!("  Temperature: {}", config.generation.temperature);
        println!("  Top P: {}", config.generation.top_p);
        println!("  Top K: {}", config.generation.top_k);
        println!("  Max Output Tokens: {}", config.generation.max_output_tokens);
        println!();

        println!("Dispatch:");
        println!("  Max Attempts: {}", config.dispatch.max_attempts);
        println!("  Error Threshold: {}", config.dispatch.error_threshold);
        println!("  Backoff: {}ms per attempt", config.dispatch.backoff_ms);
        println!(
            "  Health Check Interval: {}s",
            config.dispatch.health_check_interval_secs
        );
        println!();

        println!("Preamble:");
        match config.preamble.location() {
            Ok(PreambleLocation::Http(url)) => println!("  Source: {url}"),
            Ok(PreambleLocation::Dir(dir)) => println!("  Source: {}", dir.display()),
            Err(_) => println!("  Source: (not set)"),
        }
        let documents = &config.preamble.documents;
        println!("  Persona: {}", documents.persona);
        println!("  Knowledge: {}", documents.knowledge);
        println!(
            "  Updates: {}",
            documents.updates.as_deref().unwrap_or("(none)")
        );

        Ok(())
    }
}
