use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{error::IngestionError, field_map::FieldMap, models::IngestionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Mongodb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    pub download: DownloadConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    pub retailers: Vec<RetailerProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_products_collection")]
    pub products_collection: String,
    #[serde(default = "default_observations_collection")]
    pub observations_collection: String,
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub mode: IngestionMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            products_collection: default_products_collection(),
            observations_collection: default_observations_collection(),
            backend: StoreBackend::default(),
            mode: IngestionMode::default(),
        }
    }
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_database() -> String {
    "supersmart".to_string()
}
fn default_products_collection() -> String {
    "items".to_string()
}
fn default_observations_collection() -> String {
    "price_observations".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    pub root: PathBuf,
    #[serde(default = "std::env::temp_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_completed_suffixes")]
    pub completed_suffixes: Vec<String>,
    #[serde(default = "default_in_progress_suffixes")]
    pub in_progress_suffixes: Vec<String>,
}

fn default_completed_suffixes() -> Vec<String> {
    vec![".gz".to_string(), ".zip".to_string()]
}
fn default_in_progress_suffixes() -> Vec<String> {
    vec![
        ".crdownload".to_string(),
        ".tmp".to_string(),
        ".part".to_string(),
    ]
}

impl DownloadConfig {
    /// Each retailer downloads into its own subdirectory of `root`.
    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.root.join(format!("downloads_{}", site))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StabilityConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_required_stable_polls")]
    pub required_stable_polls: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            required_stable_polls: default_required_stable_polls(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_required_stable_polls() -> u32 {
    3
}

impl StabilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetailerProfile {
    pub site: String,
    pub store_id: String,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Store identifier to display name.
#[derive(Debug, Clone, Default)]
pub struct StoreDirectory {
    names: HashMap<String, String>,
}

impl StoreDirectory {
    pub fn from_retailers(retailers: &[RetailerProfile]) -> Self {
        let names = retailers
            .iter()
            .filter_map(|r| r.store_name.as_ref().map(|n| (r.store_id.clone(), n.clone())))
            .collect();
        Self { names }
    }

    pub fn display_name<'a>(&'a self, store_id: &'a str) -> &'a str {
        self.names.get(store_id).map(String::as_str).unwrap_or(store_id)
    }
}

impl AppConfig {
    /// Config file path: first CLI argument, then `PRICE_INGEST_CONFIG`, then `config.yaml`.
    pub fn locate() -> PathBuf {
        std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("PRICE_INGEST_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    }

    pub fn load(path: &Path) -> Result<Self, IngestionError> {
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestionError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        info!(
            "Loaded configuration: {} retailer(s), backend {:?}, mode {:?}",
            config.retailers.len(),
            config.store.backend,
            config.store.mode
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, IngestionError> {
        serde_yaml::from_str(content).map_err(|e| IngestionError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            info!("Using MONGODB_URI from environment");
            self.store.uri = uri;
        }
        if let Ok(database) = std::env::var("MONGODB_DATABASE") {
            self.store.database = database;
        }
        match std::env::var("DATABASE_TYPE").as_deref() {
            Ok("memory") => self.store.backend = StoreBackend::Memory,
            Ok("mongodb") => self.store.backend = StoreBackend::Mongodb,
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), IngestionError> {
        let bail = |msg: String| Err(IngestionError::Config(msg));

        if self.stability.required_stable_polls == 0 {
            return bail("stability.required_stable_polls must be >= 1".to_string());
        }
        if self.stability.timeout_secs == 0 {
            return bail("stability.timeout_secs must be > 0".to_string());
        }
        if self.download.completed_suffixes.is_empty() {
            return bail("download.completed_suffixes must not be empty".to_string());
        }
        if self.retailers.is_empty() {
            return bail("at least one retailer must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for retailer in &self.retailers {
            if retailer.site.trim().is_empty() {
                return bail("retailer site must not be empty".to_string());
            }
            if retailer.store_id.trim().is_empty() {
                return bail(format!("retailer '{}' has an empty store_id", retailer.site));
            }
            if !seen.insert(retailer.site.as_str()) {
                return bail(format!("duplicate retailer site '{}'", retailer.site));
            }
            if retailer.fields.barcode.is_empty() || retailer.fields.price.is_empty() {
                return bail(format!(
                    "retailer '{}' must name its barcode and price fields",
                    retailer.site
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field_map::PriceSelection;

    const SAMPLE: &str = r#"
store:
  database: supersmart
  mode: seed
download:
  root: /var/lib/prices
stability:
  poll_interval_ms: 250
retailers:
  - site: mega
    store_id: 65a4e1e1e1e1e1e1e1e1e1e3
    store_name: Mega
  - site: hezi_hinam
    store_id: 65a4e1e1e1e1e1e1e1e1e1e1
    fields:
      barcode: BarKod
      name: Name
      category: CategoryName
      image: Img
      price: Price_Regular
      promo_price: Price_Sale
      price_selection: promotional
"#;

    #[test]
    fn parses_with_defaults() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.store.mode, IngestionMode::Seed);
        assert_eq!(config.store.products_collection, "items");
        assert_eq!(config.stability.required_stable_polls, 3);
        assert_eq!(config.stability.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.download.completed_suffixes, [".gz", ".zip"]);
        assert_eq!(config.download.site_dir("mega"), PathBuf::from("/var/lib/prices/downloads_mega"));

        let mega = &config.retailers[0];
        assert_eq!(mega.fields.barcode, "ItemCode");
        let hezi = &config.retailers[1];
        assert_eq!(hezi.fields.barcode, "BarKod");
        assert_eq!(hezi.fields.price_selection, PriceSelection::Promotional);
        assert_eq!(hezi.fields.item_lists, ["Items", "Products"]);
    }

    #[test]
    fn store_directory_falls_back_to_id() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        let stores = StoreDirectory::from_retailers(&config.retailers);
        assert_eq!(stores.display_name("65a4e1e1e1e1e1e1e1e1e1e3"), "Mega");
        assert_eq!(stores.display_name("65a4e1e1e1e1e1e1e1e1e1e1"), "65a4e1e1e1e1e1e1e1e1e1e1");
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.stability.required_stable_polls = 0;
        assert!(matches!(config.validate(), Err(IngestionError::Config(_))));

        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.retailers[1].site = "mega".to_string();
        assert!(matches!(config.validate(), Err(IngestionError::Config(_))));

        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.retailers[0].store_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_download_section_is_a_config_error() {
        let err = AppConfig::from_yaml("retailers: []").unwrap_err();
        assert!(matches!(err, IngestionError::Config(_)));
    }
}
