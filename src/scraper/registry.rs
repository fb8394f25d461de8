use crate::config::Config;
use crate::scraper::fetcher::build_http_client;
use crate::scraper::{HtmlScraper, Scraper};
use std::sync::Arc;

/// A scraper together with the source identity it was registered under
#[derive(Clone)]
pub struct RegisteredSource {
    pub name: String,
    pub base_url: String,
    pub scraper: Arc<dyn Scraper>,
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Ordered source name → scraper mapping
///
/// Built once at startup; the orchestrator only reads it. Registering a
/// name twice replaces the earlier scraper but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        scraper: Arc<dyn Scraper>,
    ) -> Self {
        let entry = RegisteredSource {
            name: name.into(),
            base_url: base_url.into(),
            scraper,
        };

        match self.sources.iter_mut().find(|s| s.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.sources.push(entry),
        }
        self
    }

    /// Builds one `HtmlScraper` per configured source, all sharing one client
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let client = build_http_client(&config.crawler)
            .map_err(|e| crate::ConfigError::Validation(format!("HTTP client: {}", e)))?;

        let mut registry = Self::new();
        for entry in &config.sources {
            let scraper = HtmlScraper::from_entry(entry, &config.crawler, client.clone())?;
            registry = registry.register(&entry.name, &entry.base_url, Arc::new(scraper));
        }

        tracing::debug!("Registered {} sources", registry.len());
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
