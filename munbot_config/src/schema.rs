use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use munbot_core::{GenerationConfig, PreambleDocuments};
use munbot_dispatch::DispatchConfig;

const API_KEY_ENV_PREFIX: &str = "MUNBOT_API_KEY_";
const MODEL_ENV: &str = "MUNBOT_MODEL";
const PLACEHOLDER_MARKER: &str = "your-api-key";

const CONFIG_TEMPLATE: &str = r#"{
  "providers": {
    "gemini": {
      "api_keys": [
        "your-api-key-1",
        "your-api-key-2"
      ],
      "model": "gemini-2.0-flash"
    }
  },
  "generation": {
    "temperature": 0.7,
    "top_p": 0.8,
    "top_k": 40,
    "max_output_tokens": 500
  },
  "dispatch": {
    "max_attempts": 3,
    "error_threshold": 5,
    "backoff_ms": 1000,
    "health_check_interval_secs": 300,
    "health_probe_message": "Test"
  },
  "preamble": {
    "base_url": "https://example.org",
    "persona": "personality.txt",
    "knowledge": "knowledge.txt"
  }
}"#;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub preamble: PreambleConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "GeminiConfig::default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl GeminiConfig {
    fn default_model() -> String {
        "gemini-2.0-flash".to_string()
    }
}

/// Where the persona and knowledge documents live.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PreambleConfig {
    /// Site root the documents are fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Local directory, used when no base url is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(flatten)]
    pub documents: PreambleDocuments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreambleLocation {
    Http(String),
    Dir(PathBuf),
}

impl PreambleConfig {
    pub fn location(&self) -> anyhow::Result<PreambleLocation> {
        match (&self.base_url, &self.dir) {
            (Some(url), _) if !url.trim().is_empty() => Ok(PreambleLocation::Http(url.clone())),
            (_, Some(dir)) => Ok(PreambleLocation::Dir(dir.clone())),
            _ => anyhow::bail!(
                "No preamble source configured. Set 'preamble.base_url' or 'preamble.dir' in the config file."
            ),
        }
    }
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("munbot"))
    }

    /// Load `~/munbot/config.json` and apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'munbot init' to create config.",
                config_path.display()
            );
        }

        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        Ok(config)
    }

    /// `MUNBOT_API_KEY_<n>` adds keys in numeric order after the configured
    /// ones; `MUNBOT_MODEL` replaces the model.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut numbered: Vec<(u32, String)> = Vec::new();

        for (name, value) in vars {
            if name == MODEL_ENV {
                if !value.trim().is_empty() {
                    self.providers.gemini.model = value.trim().to_string();
                }
                continue;
            }
            let Some(suffix) = name.strip_prefix(API_KEY_ENV_PREFIX) else {
                continue;
            };
            match suffix.parse::<u32>() {
                Ok(n) => numbered.push((n, value)),
                Err(_) => warn!("Ignoring {name}: expected a numeric suffix"),
            }
        }

        numbered.sort_by_key(|(n, _)| *n);
        for (_, key) in numbered {
            let key = key.trim().to_string();
            if !self.providers.gemini.api_keys.contains(&key) {
                self.providers.gemini.api_keys.push(key);
            }
        }
    }

    /// Configured keys minus empty entries and template placeholders.
    #[must_use]
    pub fn valid_api_keys(&self) -> Vec<String> {
        self.providers
            .gemini
            .api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && !k.contains(PLACEHOLDER_MARKER))
            .map(str::to_string)
            .collect()
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your Gemini API keys");
        println!("   2. Point 'preamble.base_url' at the site serving personality.txt and knowledge.txt");
        println!("   3. Run 'munbot chat' to start a conversation");
        println!();
        println!("🔧 Configuration options:");
        println!("   - api_keys: one entry per key, rotated round-robin");
        println!("   - MUNBOT_API_KEY_1, MUNBOT_API_KEY_2, ...: extra keys from the environment");
        println!("   - dispatch.error_threshold: errors before a key leaves the rotation");
        println!("   - preamble.dir: read the documents from a local directory instead");
        println!();
        Ok(())
    }
}

/// `abcd...wxyz` for display; short keys are fully hidden.
#[must_use]
pub fn mask_key(key: &str) -> String {
    if key.len() > 8 && key.is_char_boundary(4) && key.is_char_boundary(key.len() - 4) {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "****".to_string()
    }
}
