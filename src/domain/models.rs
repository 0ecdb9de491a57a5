use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Schema-agnostic tree produced by the document normalizer.
///
/// Object keys keep document order (`serde_json` is built with
/// `preserve_order`). A repeated child element becomes an array, a single
/// one stays a scalar entry, so callers must coerce before iterating.
pub type NormalizedDocument = serde_json::Value;

/// A raw file deposited by a site connector.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub site_id: String,
    pub discovered_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, site_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            site_id: site_id.into(),
            discovered_at: Utc::now(),
        }
    }
}

/// Archive format, decided from leading bytes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    Unknown,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Gzip => write!(f, "gzip"),
            ArchiveFormat::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePrices {
    pub store_id: String,
    pub prices: Vec<PriceObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub barcode: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub store_prices: Vec<StorePrices>,
}

impl ProductRecord {
    /// Every ingestion key carried by this record, in history order.
    pub fn ingestion_keys(&self) -> impl Iterator<Item = (IngestionKey, &PriceObservation)> + '_ {
        self.store_prices.iter().flat_map(move |group| {
            group.prices.iter().map(move |obs| {
                (
                    IngestionKey {
                        barcode: self.barcode.clone(),
                        store_id: group.store_id.clone(),
                        date: obs.date,
                    },
                    obs,
                )
            })
        })
    }

    /// Whether an observation for `store_id` on `date` is already in the history.
    pub fn has_observation(&self, store_id: &str, date: NaiveDate) -> bool {
        self.store_prices
            .iter()
            .filter(|group| group.store_id == store_id)
            .any(|group| group.prices.iter().any(|obs| obs.date == date))
    }
}

/// Uniqueness boundary of a persisted price observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngestionKey {
    pub barcode: String,
    pub store_id: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownProduct,
    DuplicateObservation,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownProduct => write!(f, "unknown_product"),
            SkipReason::DuplicateObservation => write!(f, "duplicate_observation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
    Skipped(SkipReason),
}

/// Why a raw item never became a `ProductRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSkip {
    MissingBarcode,
    MissingPrice,
    InvalidPrice,
}

/// How records reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMode {
    /// Only augment products already present in the master catalog.
    #[default]
    Augment,
    /// Catalog seeding: create products that are missing.
    Seed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProductRecord {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        ProductRecord {
            barcode: "7290000000001".into(),
            name: Some("Milk 3%".into()),
            category: None,
            image: None,
            store_prices: vec![StorePrices {
                store_id: "mega".into(),
                prices: vec![PriceObservation { date, price: 6.9, promotion: None }],
            }],
        }
    }

    #[test]
    fn has_observation_matches_store_and_day() {
        let r = record();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(r.has_observation("mega", day));
        assert!(!r.has_observation("rami_levi", day));
        assert!(!r.has_observation("mega", day.succ_opt().unwrap()));
    }

    #[test]
    fn serializes_in_store_schema() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["storePrices"][0]["storeId"], "mega");
        assert_eq!(value["storePrices"][0]["prices"][0]["date"], "2024-03-01");
        assert!(value["storePrices"][0]["prices"][0].get("promotion").is_none());
    }
}
