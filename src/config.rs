//! Client configuration
//!
//! `ClientConfig` is passed explicitly to [`Client::with_config`]. A
//! process-wide default can be installed once at startup with
//! [`ClientConfig::install_default`]; clients built without an explicit
//! config read it through [`ClientConfig::global`].
//!
//! [`Client::with_config`]: crate::client::Client::with_config

use crate::error::{EventStoreError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::types::TIMESTAMP_PRECISION;

/// Source of commit timestamps
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Computes metadata merged into every published event
pub type MetadataPolicy =
    Arc<dyn Fn() -> serde_json::Map<String, serde_json::Value> + Send + Sync>;

static DEFAULT_CONFIG: OnceLock<ClientConfig> = OnceLock::new();

fn default_page_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_clock() -> Clock {
    Arc::new(|| Utc::now().trunc_subsecs(TIMESTAMP_PRECISION))
}

/// Client configuration
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Entries added to every event's metadata unless already present
    #[serde(default)]
    pub default_metadata: serde_json::Map<String, serde_json::Value>,

    /// Batch size for streaming reads
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Assign a `correlation_id` to events that have none
    #[serde(default = "default_true")]
    pub assign_correlation_id: bool,

    #[serde(skip, default = "default_clock")]
    clock: Clock,

    #[serde(skip)]
    metadata_policy: Option<MetadataPolicy>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_metadata: serde_json::Map::new(),
            page_size: default_page_size(),
            assign_correlation_id: true,
            clock: default_clock(),
            metadata_policy: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("default_metadata", &self.default_metadata)
            .field("page_size", &self.page_size)
            .field("assign_correlation_id", &self.assign_correlation_id)
            .field("metadata_policy", &self.metadata_policy.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Replace the clock
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Compute extra metadata for every published event
    pub fn with_metadata_policy(
        mut self,
        policy: impl Fn() -> serde_json::Map<String, serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.metadata_policy = Some(Arc::new(policy));
        self
    }

    /// Add a static default metadata entry
    pub fn with_default_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.default_metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Current time according to the configured clock
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Static defaults overlaid with the metadata policy's output
    pub fn process_metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut metadata = self.default_metadata.clone();
        if let Some(policy) = &self.metadata_policy {
            metadata.extend(policy());
        }
        metadata
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(EventStoreError::Config(
                "pageSize must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Install the process-wide default; only the first call succeeds
    pub fn install_default(config: ClientConfig) -> Result<()> {
        config.validate()?;
        DEFAULT_CONFIG.set(config).map_err(|_| {
            EventStoreError::Config("Default client config is already installed".to_string())
        })?;
        tracing::debug!("Default client config installed");
        Ok(())
    }

    /// The installed process-wide default, or `ClientConfig::default()`
    pub fn global() -> ClientConfig {
        DEFAULT_CONFIG.get().cloned().unwrap_or_default()
    }
}
