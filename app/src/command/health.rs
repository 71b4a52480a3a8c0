use munbot_config::Config;

use super::{build_dispatcher, print_stats};

/// Strategy for a one-off probe of every configured key.
#[derive(Debug, Clone, Copy)]
pub struct HealthStrategy;

impl super::CommandStrategy for HealthStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let dispatcher = build_dispatcher(&config, None)?;

        let report = dispatcher.health_check().await;

        println!("=== API Key Health ===\n");
        for slot in &report.healthy {
            println!("  Key {}: OK", slot + 1);
        }
        for (slot, error) in &report.failed {
            println!("  Key {}: {error}", slot + 1);
        }
        println!();
        print_stats(&dispatcher.stats());

        if report.healthy.is_empty() {
            anyhow::bail!("No API key passed the health check");
        }
        Ok(())
    }
}
