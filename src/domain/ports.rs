use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::{
    error::{IngestionError, StoreError},
    models::{Artifact, ProductRecord, UpsertOutcome},
};

/// Drives a retailer portal and yields one artifact per triggered download.
///
/// Artifacts are pulled one at a time; the next download is only triggered
/// once the previous artifact has been fully processed.
pub trait SiteConnector: Send + Sync {
    fn site_identifier(&self) -> &str;

    fn enumerate_and_trigger_downloads<'a>(
        &'a self,
        download_directory: &'a Path,
    ) -> BoxStream<'a, Result<Artifact, IngestionError>>;
}

#[async_trait]
pub trait IngestionStore: Send + Sync {
    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>, StoreError>;

    /// Catalog augmentation: never creates products.
    async fn upsert(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError>;

    /// Catalog seeding: creates the product when the barcode is absent.
    async fn upsert_or_create(&self, record: &ProductRecord) -> Result<UpsertOutcome, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Lists the files of a directory with their current sizes.
pub trait DirectoryProbe: Send + Sync {
    fn list(&self, dir: &Path) -> std::io::Result<Vec<ProbedFile>>;
}
