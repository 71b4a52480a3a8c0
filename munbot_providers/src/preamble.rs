use std::path::PathBuf;

use async_trait::async_trait;
use munbot_core::preamble::ensure_plain_text;
use munbot_core::{LoadError, Preamble, PreambleDocuments, PreambleSource};
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use tracing::{info, warn};

/// Fetches the preamble documents from static HTTP hosting.
pub struct HttpPreambleSource {
    client: Client,
    base_url: String,
    documents: PreambleDocuments,
}

impl HttpPreambleSource {
    pub fn new(base_url: String, documents: PreambleDocuments) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            documents,
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.trim_start_matches('/'))
    }

    /// Uncached GET of one plain-text document.
    async fn fetch(&self, name: &str) -> Result<String, LoadError> {
        let url = self.url(name);
        let fetch_error = |e: reqwest::Error| LoadError::Fetch {
            resource: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                resource: url.clone(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(fetch_error)?;
        ensure_plain_text(&url, text)
    }
}

#[async_trait]
impl PreambleSource for HttpPreambleSource {
    async fn load(&self) -> Result<Preamble, LoadError> {
        info!("Loading assistant instructions from {}", self.base_url);

        let (persona, knowledge) = tokio::try_join!(
            self.fetch(&self.documents.persona),
            self.fetch(&self.documents.knowledge)
        )?;
        let mut preamble = Preamble::new(persona, knowledge);

        if let Some(updates) = &self.documents.updates {
            match self.fetch(updates).await {
                Ok(text) => preamble = preamble.with_updates(text),
                Err(e) => warn!("Skipping recent updates digest: {e}"),
            }
        }

        Ok(preamble)
    }
}

/// Reads the preamble documents from a local directory.
pub struct FilePreambleSource {
    dir: PathBuf,
    documents: PreambleDocuments,
}

impl FilePreambleSource {
    pub const fn new(dir: PathBuf, documents: PreambleDocuments) -> Self {
        Self { dir, documents }
    }

    async fn read(&self, name: &str) -> Result<String, LoadError> {
        let path = self.dir.join(name);
        let resource = path.display().to_string();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LoadError::Io {
                resource: resource.clone(),
                message: e.to_string(),
            })?;
        ensure_plain_text(&resource, text)
    }
}

#[async_trait]
impl PreambleSource for FilePreambleSource {
    async fn load(&self) -> Result<Preamble, LoadError> {
        info!("Loading assistant instructions from {}", self.dir.display());

        let persona = self.read(&self.documents.persona).await?;
        let knowledge = self.read(&self.documents.knowledge).await?;
        let mut preamble = Preamble::new(persona, knowledge);

        if let Some(updates) = &self.documents.updates {
            match self.read(updates).await {
                Ok(text) => preamble = preamble.with_updates(text),
                Err(e) => warn!("Skipping recent updates digest: {e}"),
            }
        }

        Ok(preamble)
    }
}
