//! Runs against a live server: `MONGODB_URI` or `mongodb://localhost:27017`.
//! `cargo test -- --ignored` to include them.

use chrono::{NaiveDate, Utc};
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::Client;
use uuid::Uuid;

use price_ingest::config::StoreConfig;
use price_ingest::domain::models::{PriceObservation, ProductRecord, SkipReason, StorePrices, UpsertOutcome};
use price_ingest::domain::ports::IngestionStore;
use price_ingest::infrastructure::mongodb::product_repo::MongoProductRepository;

const MEGA: &str = "65a4e1e1e1e1e1e1e1e1e1e3";

struct Scratch {
    client: Client,
    config: StoreConfig,
}

impl Scratch {
    async fn new() -> Self {
        let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let config = StoreConfig {
            uri: uri.clone(),
            database: format!("price_ingest_test_{}", Uuid::new_v4().simple()),
            ..StoreConfig::default()
        };
        let client = Client::with_uri_str(&uri).await.unwrap();
        Self { client, config }
    }

    async fn repo(&self) -> MongoProductRepository {
        MongoProductRepository::connect(&self.config).await.unwrap()
    }

    fn products(&self) -> mongodb::Collection<Document> {
        self.client
            .database(&self.config.database)
            .collection(&self.config.products_collection)
    }

    async fn cleanup(self) {
        self.client.database(&self.config.database).drop(None).await.unwrap();
    }
}

fn record(store: &str, date: NaiveDate, price: f64) -> ProductRecord {
    ProductRecord {
        barcode: "7290000000001".into(),
        name: Some("Milk 3%".into()),
        category: None,
        image: None,
        store_prices: vec![StorePrices {
            store_id: store.into(),
            prices: vec![PriceObservation { date, price, promotion: None }],
        }],
    }
}

fn observations(product: &ProductRecord) -> usize {
    product.store_prices.iter().map(|g| g.prices.len()).sum()
}

#[tokio::test]
#[ignore]
async fn merges_into_history_written_by_the_retailer_scripts() {
    let scratch = Scratch::new().await;
    let repo = scratch.repo().await;
    let today = Utc::now();
    scratch
        .products()
        .insert_one(
            doc! {
                "barcode": "7290000000001",
                "name": "Milk 3%",
                "storePrices": [{
                    "storeId": ObjectId::parse_str(MEGA).unwrap(),
                    "prices": [{ "date": DateTime::from_millis(today.timestamp_millis()), "price": 6.9 }],
                }],
            },
            None,
        )
        .await
        .unwrap();

    let same_day = record(MEGA, today.date_naive(), 7.1);
    assert_eq!(
        repo.upsert(&same_day).await.unwrap(),
        UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
    );

    let next_day = record(MEGA, today.date_naive().succ_opt().unwrap(), 7.1);
    assert_eq!(repo.upsert(&next_day).await.unwrap(), UpsertOutcome::Merged);
    assert_eq!(
        repo.upsert(&next_day).await.unwrap(),
        UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
    );

    let stored = repo.find_by_barcode("7290000000001").await.unwrap().unwrap();
    assert_eq!(stored.store_prices.len(), 1);
    assert_eq!(observations(&stored), 2);
    scratch.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn augmenting_never_creates_and_seeding_does() {
    let scratch = Scratch::new().await;
    let repo = scratch.repo().await;
    let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();

    assert_eq!(
        repo.upsert(&record(MEGA, day, 6.9)).await.unwrap(),
        UpsertOutcome::Skipped(SkipReason::UnknownProduct)
    );
    assert_eq!(repo.count().await.unwrap(), 0);

    assert_eq!(repo.upsert_or_create(&record(MEGA, day, 6.9)).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(
        repo.upsert_or_create(&record(MEGA, day, 6.9)).await.unwrap(),
        UpsertOutcome::Skipped(SkipReason::DuplicateObservation)
    );
    assert_eq!(repo.count().await.unwrap(), 1);
    scratch.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn racing_seeders_create_one_product() {
    let scratch = Scratch::new().await;
    let first = scratch.repo().await;
    let second = scratch.repo().await;
    let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    let mega = record(MEGA, day, 6.9);
    let rami = record("rami_levi", day, 6.5);

    let (a, b) = tokio::join!(first.upsert_or_create(&mega), second.upsert_or_create(&rami));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, UpsertOutcome::Merged));
    assert_eq!(outcomes, [UpsertOutcome::Inserted, UpsertOutcome::Merged]);

    assert_eq!(first.count().await.unwrap(), 1);
    let stored = first.find_by_barcode("7290000000001").await.unwrap().unwrap();
    assert_eq!(stored.store_prices.len(), 2);
    assert_eq!(observations(&stored), 2);
    scratch.cleanup().await;
}
