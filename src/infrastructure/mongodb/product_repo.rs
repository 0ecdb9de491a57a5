use async_trait::async_trait;
use chrono::{DateTime as UtcDateTime, NaiveDate, NaiveTime};
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, DateTime, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::domain::{
    error::StoreError,
    models::{IngestionKey, PriceObservation, ProductRecord, SkipReason, StorePrices, UpsertOutcome},
    ports::IngestionStore,
};

const DUPLICATE_KEY: i32 = 11000;

/// Product catalog in MongoDB.
///
/// Products live in one collection keyed by a unique `barcode` index. Every
/// appended price observation is first claimed in a ledger collection under a
/// unique `{barcode, storeId, date}` index, so a repeated run for the same day
/// can never append twice, even when two runs race.
///
/// The catalog is shared with the retailer scripts that seeded it, so
/// documents are read and written in their layout: `storeId` is an ObjectId
/// whenever the configured id parses as one, and observation dates are BSON
/// datetimes (UTC midnight when written here).
pub struct MongoProductRepository {
    products: Collection<Document>,
    observations: Collection<Document>,
}

impl MongoProductRepository {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        info!("MongoDB database: {}", config.database);
        debug!("Connecting to MongoDB");
        let client = Client::with_uri_str(&config.uri).await.map_err(|e| {
            error!("Failed to connect to MongoDB: {}", e);
            classify(e)
        })?;
        let repo = Self::new(&client, config);
        repo.ensure_indexes().await?;
        debug!("MongoDB product repository initialized");
        Ok(repo)
    }

    pub fn new(client: &Client, config: &StoreConfig) -> Self {
        let db = client.database(&config.database);
        Self {
            products: db.collection(&config.products_collection),
            observations: db.collection(&config.observations_collection),
        }
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.products
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "barcode": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .map_err(classify)?;
        self.observations
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "barcode": 1, "storeId": 1, "date": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await
            .map_err(classify)?;
        debug!("Indexes in place");
        Ok(())
    }

    async fn append(&self, record: &ProductRecord, create: bool) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .products
            .find_one(doc! { "barcode": record.barcode.as_str() }, None)
            .await
            .map_err(classify)?
            .map(|doc| product_from_document(&doc))
            .transpose()?;

        let mut inserted = false;
        if existing.is_none() {
            if !create {
                return Ok(UpsertOutcome::Skipped(SkipReason::UnknownProduct));
            }
            match self.products.insert_one(product_document(record), None).await {
                Ok(_) => {
                    debug!("Created product {}", record.barcode);
                    inserted = true;
                }
                // Another run created it first; fall through to merging.
                Err(e) if is_duplicate_key(&e) => {}
                Err(e) => return Err(classify(e)),
            }
        }

        let mut appended = 0usize;
        for (key, obs) in record.ingestion_keys() {
            let already_present = existing
                .as_ref()
                .is_some_and(|p| p.has_observation(&canonical_store_id(&key.store_id), key.date));
            if already_present || !self.claim(&key).await? {
                debug!("Observation {:?} already present", key);
                continue;
            }
            if let Err(e) = self.push_observation(&key, obs).await {
                self.release(&key).await;
                return Err(e);
            }
            appended += 1;
        }

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else if appended > 0 {
            UpsertOutcome::Merged
        } else {
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
        })
    }

    /// `false` when the key was already claimed.
    async fn claim(&self, key: &IngestionKey) -> Result<bool, StoreError> {
        match self.observations.insert_one(ledger_entry(key), None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(classify(e)),
        }
    }

    async fn release(&self, key: &IngestionKey) {
        if let Err(e) = self.observations.delete_one(ledger_entry(key), None).await {
            warn!("Failed to release claim {:?}: {}", key, e);
        }
    }

    async fn push_observation(&self, key: &IngestionKey, obs: &PriceObservation) -> Result<(), StoreError> {
        let obs = Bson::Document(observation_document(obs));
        let store = store_key(&key.store_id);

        if self.push_into_group(key, &store, &obs).await? > 0 {
            return Ok(());
        }
        let opened = self
            .products
            .update_one(
                doc! { "barcode": key.barcode.as_str(), "storePrices.storeId": { "$ne": store.clone() } },
                doc! { "$push": { "storePrices": { "storeId": store.clone(), "prices": [obs.clone()] } } },
                None,
            )
            .await
            .map_err(classify)?
            .matched_count;
        if opened > 0 {
            return Ok(());
        }
        // The group appeared between the two updates.
        if self.push_into_group(key, &store, &obs).await? > 0 {
            return Ok(());
        }
        Err(StoreError::Backend(format!("product {} disappeared while appending", key.barcode)))
    }

    /// Matched count of a positional push into the store's existing group.
    async fn push_into_group(&self, key: &IngestionKey, store: &Bson, obs: &Bson) -> Result<u64, StoreError> {
        self.products
            .update_one(
                doc! { "barcode": key.barcode.as_str(), "storePrices.storeId": store.clone() },
                doc! { "$push": { "storePrices.$.prices": obs.clone() } },
                None,
            )
            .await
            .map(|r| r.matched_count)
            .map_err(classify)
    }
}

#[async_trait]
impl IngestionStore for MongoProductRepository {
    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>, StoreError> {
        self.products
            .find_one(doc! { "barcode": barcode }, None)
            .await
            .map_err(classify)?
            .map(|doc| product_from_document(&doc))
            .transpose()
    }

    async fn upsert(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError> {
        self.append(record, false).await
    }

    async fn upsert_or_create(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError> {
        self.append(record, true).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.products.count_documents(doc! {}, None).await.map_err(classify)
    }
}

/// Store ids that look like ObjectIds are stored as ObjectIds.
fn store_key(store_id: &str) -> Bson {
    match ObjectId::parse_str(store_id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(store_id.to_string()),
    }
}

fn canonical_store_id(store_id: &str) -> String {
    match store_key(store_id) {
        Bson::ObjectId(oid) => oid.to_hex(),
        _ => store_id.to_string(),
    }
}

fn day_start(date: NaiveDate) -> DateTime {
    DateTime::from_millis(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

fn ledger_entry(key: &IngestionKey) -> Document {
    doc! {
        "barcode": key.barcode.as_str(),
        "storeId": store_key(&key.store_id),
        "date": day_start(key.date),
    }
}

fn observation_document(obs: &PriceObservation) -> Document {
    let mut doc = doc! { "date": day_start(obs.date), "price": obs.price };
    if let Some(promotion) = &obs.promotion {
        doc.insert("promotion", promotion.as_str());
    }
    doc
}

/// New catalog entry; observations are pushed separately.
fn product_document(record: &ProductRecord) -> Document {
    doc! {
        "barcode": record.barcode.as_str(),
        "name": record.name.clone(),
        "category": record.category.clone(),
        "image": record.image.clone(),
        "storePrices": [],
    }
}

/// Reads a catalog document whatever wrote it. Observations without a
/// readable date or price are left out.
fn product_from_document(doc: &Document) -> Result<ProductRecord, StoreError> {
    let barcode = match doc.get("barcode") {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::Int64(n)) => n.to_string(),
        Some(Bson::Int32(n)) => n.to_string(),
        _ => return Err(StoreError::Serialization("product document without barcode".to_string())),
    };
    let text = |key: &str| match doc.get(key) {
        Some(Bson::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    let mut store_prices = Vec::new();
    for group in doc.get_array("storePrices").map(|a| a.as_slice()).unwrap_or_default() {
        let Some(group) = group.as_document() else { continue };
        let store_id = match group.get("storeId") {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            Some(Bson::String(s)) => canonical_store_id(s),
            _ => continue,
        };
        let prices = group
            .get_array("prices")
            .map(|a| a.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(Bson::as_document)
            .filter_map(observation_from_document)
            .collect();
        store_prices.push(StorePrices { store_id, prices });
    }

    Ok(ProductRecord {
        barcode,
        name: text("name"),
        category: text("category"),
        image: text("image"),
        store_prices,
    })
}

fn observation_from_document(doc: &Document) -> Option<PriceObservation> {
    let date = match doc.get("date")? {
        Bson::DateTime(dt) => UtcDateTime::from_timestamp_millis(dt.timestamp_millis())?.date_naive(),
        Bson::String(s) => NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()?,
        _ => return None,
    };
    let price = match doc.get("price")? {
        Bson::Double(p) => *p,
        Bson::Int32(p) => f64::from(*p),
        Bson::Int64(p) => *p as f64,
        Bson::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(PriceObservation {
        date,
        price,
        promotion: doc.get_str("promotion").ok().map(str::to_string),
    })
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

/// Connectivity failures end the run; anything else is per-record.
fn classify(e: MongoError) -> StoreError {
    match e.kind.as_ref() {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Unavailable(e.to_string())
        }
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StoreError::Serialization(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEGA: &str = "65a4e1e1e1e1e1e1e1e1e1e3";

    fn june(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn ledger_entry_matches_catalog_types() {
        let key = IngestionKey {
            barcode: "7290000000001".into(),
            store_id: MEGA.into(),
            date: june(3),
        };
        let entry = ledger_entry(&key);
        assert_eq!(entry.get_str("barcode").unwrap(), "7290000000001");
        assert_eq!(entry.get_object_id("storeId").unwrap().to_hex(), MEGA);
        assert_eq!(
            entry.get_datetime("date").unwrap().timestamp_millis(),
            june(3).and_time(NaiveTime::MIN).and_utc().timestamp_millis()
        );
    }

    #[test]
    fn non_object_id_stores_stay_strings() {
        assert_eq!(store_key("rami_levi"), Bson::String("rami_levi".into()));
        assert_eq!(canonical_store_id("65A4E1E1E1E1E1E1E1E1E1E3"), MEGA);
    }

    #[test]
    fn observation_documents_carry_datetimes() {
        let obs = PriceObservation { date: june(3), price: 12.9, promotion: None };
        let doc = observation_document(&obs);
        assert!(doc.get_datetime("date").is_ok());
        assert_eq!(doc.get_f64("price").unwrap(), 12.9);
        assert!(!doc.contains_key("promotion"));
    }

    #[test]
    fn reads_documents_written_by_the_retailer_scripts() {
        // Layout of the original seeding scripts: ObjectId store, datetime with a time of day.
        let afternoon = june(3).and_hms_opt(14, 30, 0).unwrap().and_utc().timestamp_millis();
        let legacy = doc! {
            "barcode": "7290000000001",
            "name": "Milk 3%",
            "category": "Dairy",
            "image": "",
            "code": "",
            "storePrices": [{
                "storeId": ObjectId::parse_str(MEGA).unwrap(),
                "prices": [
                    { "date": DateTime::from_millis(afternoon), "price": 6.9 },
                    { "date": DateTime::from_millis(afternoon), "price": Bson::Null },
                ],
            }],
        };

        let product = product_from_document(&legacy).unwrap();
        assert_eq!(product.category.as_deref(), Some("Dairy"));
        assert_eq!(product.image, None);
        assert_eq!(product.store_prices[0].store_id, MEGA);
        assert_eq!(product.store_prices[0].prices.len(), 1);
        assert_eq!(product.store_prices[0].prices[0].price, 6.9);
        assert!(product.has_observation(&canonical_store_id(MEGA), june(3)));
        assert!(!product.has_observation(&canonical_store_id(MEGA), june(4)));
    }

    #[test]
    fn reads_back_what_it_writes() {
        let obs = PriceObservation { date: june(5), price: 4.5, promotion: Some("2 for 8".into()) };
        let mut written = product_document(&ProductRecord {
            barcode: "1".into(),
            name: None,
            category: None,
            image: None,
            store_prices: Vec::new(),
        });
        written.insert(
            "storePrices",
            vec![Bson::Document(doc! { "storeId": store_key("rami_levi"), "prices": [observation_document(&obs)] })],
        );

        let product = product_from_document(&written).unwrap();
        assert_eq!(product.store_prices[0].store_id, "rami_levi");
        assert_eq!(product.store_prices[0].prices, vec![obs]);
    }

    #[test]
    fn document_without_barcode_is_a_serialization_error() {
        let err = product_from_document(&doc! { "name": "x" }).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
