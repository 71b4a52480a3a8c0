use munbot_config::Config;
use munbot_core::parse_committees;

use super::build_preamble_source;

#[derive(Debug, Clone, Copy)]
pub struct CommitteesInput {
    pub json: bool,
}

/// Strategy for listing the committees described in the knowledge document.
#[derive(Debug, Clone, Copy)]
pub struct CommitteesStrategy;

impl super::CommandStrategy for CommitteesStrategy {
    type Input = CommitteesInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let preamble = build_preamble_source(&config)?.load().await?;
        let committees = parse_committees(&preamble.knowledge);

        if input.json {
            println!("{}", serde_json::to_string_pretty(&committees)?);
            return Ok(());
        }

        if committees.is_empty() {
            println!("No committees found in the knowledge document.");
            return Ok(());
        }

        println!("=== Committees ({}) ===\n", committees.len());
        for committee in &committees {
            println!("{} - {}", committee.name, committee.tagline);
            println!("  Topic: {}", committee.topic);
            for (key, value) in &committee.details {
                println!("  {key}: {value}");
            }
            println!();
        }
        Ok(())
    }
}
