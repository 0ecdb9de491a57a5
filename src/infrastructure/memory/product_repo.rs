//! In-memory [`IngestionStore`] for tests and dry runs.
//!
//! Products and claimed ingestion keys sit behind one mutex, so the
//! check-then-append on an ingestion key is atomic across concurrent runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    error::StoreError,
    models::{IngestionKey, ProductRecord, SkipReason, StorePrices, UpsertOutcome},
    ports::IngestionStore,
};

#[derive(Default)]
struct Catalog {
    products: HashMap<String, ProductRecord>,
    claimed: HashSet<IngestionKey>,
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    catalog: Mutex<Catalog>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with products, as a master catalog would be.
    pub fn with_products(products: impl IntoIterator<Item = ProductRecord>) -> Self {
        let repo = Self::new();
        {
            let mut catalog = repo.catalog.lock().unwrap_or_else(|e| e.into_inner());
            for product in products {
                for (key, _) in product.ingestion_keys() {
                    catalog.claimed.insert(key);
                }
                catalog.products.insert(product.barcode.clone(), product);
            }
        }
        repo
    }

    fn lock(&self) -> Result<MutexGuard<'_, Catalog>, StoreError> {
        self.catalog
            .lock()
            .map_err(|_| StoreError::Backend("in-memory catalog lock poisoned".to_string()))
    }

    /// Appends every unclaimed observation of `record` to `existing`.
    fn merge(claimed: &mut HashSet<IngestionKey>, existing: &mut ProductRecord, record: &ProductRecord) -> UpsertOutcome {
        let mut appended = 0usize;
        for (key, obs) in record.ingestion_keys() {
            if !claimed.insert(key.clone()) {
                debug!("Observation {:?} already present", key);
                continue;
            }
            match existing
                .store_prices
                .iter_mut()
                .find(|group| group.store_id == key.store_id)
            {
                Some(group) => group.prices.push(obs.clone()),
                None => existing.store_prices.push(StorePrices {
                    store_id: key.store_id.clone(),
                    prices: vec![obs.clone()],
                }),
            }
            appended += 1;
        }
        if appended == 0 {
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
        } else {
            UpsertOutcome::Merged
        }
    }
}

#[async_trait]
impl IngestionStore for InMemoryProductRepository {
    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>, StoreError> {
        Ok(self.lock()?.products.get(barcode).cloned())
    }

    async fn upsert(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError> {
        let mut guard = self.lock()?;
        let catalog = &mut *guard;
        match catalog.products.get_mut(&record.barcode) {
            Some(existing) => Ok(Self::merge(&mut catalog.claimed, existing, record)),
            None => Ok(UpsertOutcome::Skipped(SkipReason::UnknownProduct)),
        }
    }

    async fn upsert_or_create(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError> {
        let mut guard = self.lock()?;
        let catalog = &mut *guard;
        if let Some(existing) = catalog.products.get_mut(&record.barcode) {
            return Ok(Self::merge(&mut catalog.claimed, existing, record));
        }
        let mut created = ProductRecord {
            store_prices: Vec::new(),
            ..record.clone()
        };
        Self::merge(&mut catalog.claimed, &mut created, record);
        catalog.products.insert(created.barcode.clone(), created);
        Ok(UpsertOutcome::Inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.products.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PriceObservation;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn record(barcode: &str, store: &str, date: NaiveDate, price: f64) -> ProductRecord {
        ProductRecord {
            barcode: barcode.into(),
            name: Some("Cottage 5%".into()),
            category: None,
            image: None,
            store_prices: vec![StorePrices {
                store_id: store.into(),
                prices: vec![PriceObservation { date, price, promotion: None }],
            }],
        }
    }

    fn catalog_entry(barcode: &str) -> ProductRecord {
        ProductRecord { store_prices: Vec::new(), ..record(barcode, "", day(1), 0.0) }
    }

    fn observations(product: &ProductRecord) -> usize {
        product.store_prices.iter().map(|g| g.prices.len()).sum()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_day() {
        let repo = InMemoryProductRepository::with_products([catalog_entry("1")]);
        let r = record("1", "mega", day(3), 5.9);

        assert_eq!(repo.upsert(&r).await.unwrap(), UpsertOutcome::Merged);
        assert_eq!(
            repo.upsert(&r).await.unwrap(),
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
        );
        let stored = repo.find_by_barcode("1").await.unwrap().unwrap();
        assert_eq!(observations(&stored), 1);
    }

    #[tokio::test]
    async fn new_day_and_new_store_both_append() {
        let repo = InMemoryProductRepository::with_products([catalog_entry("1")]);
        repo.upsert(&record("1", "mega", day(3), 5.9)).await.unwrap();
        repo.upsert(&record("1", "mega", day(4), 6.1)).await.unwrap();
        repo.upsert(&record("1", "rami_levi", day(4), 5.5)).await.unwrap();

        let stored = repo.find_by_barcode("1").await.unwrap().unwrap();
        assert_eq!(stored.store_prices.len(), 2);
        assert_eq!(stored.store_prices[0].prices.len(), 2);
        assert_eq!(observations(&stored), 3);
    }

    #[tokio::test]
    async fn augmentation_skips_unknown_products() {
        let repo = InMemoryProductRepository::new();
        let outcome = repo.upsert(&record("9", "mega", day(3), 1.0)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped(SkipReason::UnknownProduct));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn seeding_creates_then_merges() {
        let repo = InMemoryProductRepository::new();
        let r = record("9", "mega", day(3), 1.0);
        assert_eq!(repo.upsert_or_create(&r).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            repo.upsert_or_create(&r).await.unwrap(),
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
        );
        assert_eq!(repo.count().await.unwrap(), 1);
        let stored = repo.find_by_barcode("9").await.unwrap().unwrap();
        assert_eq!(observations(&stored), 1);
    }

    #[tokio::test]
    async fn duplicate_barcodes_in_one_batch_collapse() {
        let repo = InMemoryProductRepository::with_products([catalog_entry("1")]);
        let first = record("1", "mega", day(3), 5.9);
        let second = record("1", "mega", day(3), 6.9);
        assert_eq!(repo.upsert(&first).await.unwrap(), UpsertOutcome::Merged);
        assert_eq!(
            repo.upsert(&second).await.unwrap(),
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
        );
        let stored = repo.find_by_barcode("1").await.unwrap().unwrap();
        assert_eq!(stored.store_prices[0].prices[0].price, 5.9);
    }
}
