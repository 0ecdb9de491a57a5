use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    application::{pipeline::PipelineOrchestrator, report::RunSummary},
    config::{AppConfig, StoreBackend, StoreDirectory},
    domain::{error::IngestionError, ports::IngestionStore},
    infrastructure::{
        connectors::drop_directory::DropDirectoryConnector,
        fs::stability::{CandidateFilter, FsProbe, StabilityMonitor},
        memory::product_repo::InMemoryProductRepository,
        mongodb::product_repo::MongoProductRepository,
    },
};

/// One pass over every configured retailer's download directory.
pub struct BatchService {
    config: AppConfig,
    orchestrator: PipelineOrchestrator,
    stores: StoreDirectory,
}

impl BatchService {
    pub async fn from_config(config: AppConfig) -> Result<Self, IngestionError> {
        debug!("Initializing batch service");

        let store: Arc<dyn IngestionStore> = match config.store.backend {
            StoreBackend::Memory => {
                warn!("Using the in-memory store; nothing will be persisted");
                Arc::new(InMemoryProductRepository::new())
            }
            StoreBackend::Mongodb => {
                info!("Using MongoDB store at {}", config.store.uri);
                let repo = MongoProductRepository::connect(&config.store)
                    .await
                    .map_err(|e| {
                        error!("Failed to initialize MongoDB store: {}", e);
                        IngestionError::StoreUnavailable(e.to_string())
                    })?;
                Arc::new(repo)
            }
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn IngestionStore>) -> Self {
        let monitor = StabilityMonitor::new(
            config.stability.timeout(),
            config.stability.poll_interval(),
            config.stability.required_stable_polls,
        );
        let candidates = CandidateFilter::new(
            &config.download.completed_suffixes,
            &config.download.in_progress_suffixes,
        );
        let orchestrator = PipelineOrchestrator::new(
            store,
            Arc::new(FsProbe),
            monitor,
            candidates,
            config.download.work_dir.clone(),
            config.store.mode,
        );
        let stores = StoreDirectory::from_retailers(&config.retailers);
        debug!("Batch service initialization complete");
        Self {
            config,
            orchestrator,
            stores,
        }
    }

    /// Stops at the first retailer whose store became unreachable.
    pub async fn run(&self) -> Result<Vec<RunSummary>, IngestionError> {
        info!("Processing {} retailer(s)", self.config.retailers.len());
        let mut summaries = Vec::with_capacity(self.config.retailers.len());

        for retailer in &self.config.retailers {
            let dir = self.config.download.site_dir(&retailer.site);
            std::fs::create_dir_all(&dir)?;
            info!(
                "Retailer {} ({}) from {}",
                retailer.site,
                self.stores.display_name(&retailer.store_id),
                dir.display()
            );

            let connector = DropDirectoryConnector::new(&retailer.site, &self.config.download.completed_suffixes);
            let summary = self
                .orchestrator
                .run_site(&connector, retailer, &dir)
                .await
                .map_err(|e| {
                    error!("Run for {} aborted: {}", retailer.site, e);
                    e
                })?;
            summaries.push(summary);
        }

        let failed: u64 = summaries.iter().map(|s| s.artifacts_failed + s.artifacts_timed_out).sum();
        if failed > 0 {
            warn!("{} artifact(s) left in place for inspection", failed);
        }
        Ok(summaries)
    }
}
