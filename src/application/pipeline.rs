use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::{
    record_transformer::RecordTransformer,
    report::{ArtifactReport, ArtifactState, RunSummary, Stage},
};
use crate::config::RetailerProfile;
use crate::domain::{
    error::{IngestionError, StoreError},
    models::{IngestionMode, ProductRecord, UpsertOutcome},
    ports::{DirectoryProbe, IngestionStore, SiteConnector},
};
use crate::infrastructure::{
    archive::{extractor, sniffer},
    fs::stability::{CandidateFilter, StabilityMonitor},
    parsers,
};

/// Sequences stabilization, extraction, normalization, transformation and
/// persistence for every artifact a connector yields.
///
/// Artifacts are processed strictly one after another. Only
/// [`IngestionError::StoreUnavailable`] ends a run early; every other failure
/// is recorded against its artifact and the run moves on.
pub struct PipelineOrchestrator {
    store: Arc<dyn IngestionStore>,
    probe: Arc<dyn DirectoryProbe>,
    monitor: StabilityMonitor,
    candidates: CandidateFilter,
    work_dir: PathBuf,
    mode: IngestionMode,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn IngestionStore>,
        probe: Arc<dyn DirectoryProbe>,
        monitor: StabilityMonitor,
        candidates: CandidateFilter,
        work_dir: PathBuf,
        mode: IngestionMode,
    ) -> Self {
        Self {
            store,
            probe,
            monitor,
            candidates,
            work_dir,
            mode,
        }
    }

    pub async fn run_site(
        &self,
        connector: &dyn SiteConnector,
        retailer: &RetailerProfile,
        download_dir: &Path,
    ) -> Result<RunSummary, IngestionError> {
        let store_name = retailer.store_name.as_deref().unwrap_or(&retailer.store_id);
        let summary = RunSummary::new(connector.site_identifier(), store_name);
        let span = info_span!("run", run_id = %summary.run_id, site = %summary.site);
        self.drive(connector, retailer, download_dir, summary)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        connector: &dyn SiteConnector,
        retailer: &RetailerProfile,
        download_dir: &Path,
        mut summary: RunSummary,
    ) -> Result<RunSummary, IngestionError> {
        info!("Starting run over {}", download_dir.display());
        let mut quarantined: HashSet<PathBuf> = HashSet::new();
        let mut artifacts = connector.enumerate_and_trigger_downloads(download_dir);

        while let Some(next) = artifacts.next().await {
            let artifact = match next {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("Connector failed to deliver an artifact: {}", e);
                    let mut report = ArtifactReport::new(download_dir.to_path_buf());
                    report.state = ArtifactState::failed(Stage::Discovered, e);
                    summary.absorb(report);
                    continue;
                }
            };
            debug!("Stage {}: {}", Stage::Discovered, artifact.path.display());

            let (watch_dir, filter) = if artifact.path.is_dir() {
                (artifact.path.clone(), self.candidates.clone().excluding(&quarantined))
            } else {
                let parent = artifact.path.parent().unwrap_or(download_dir).to_path_buf();
                let filter = self
                    .candidates
                    .clone()
                    .excluding(&quarantined)
                    .only(&artifact.path);
                (parent, filter)
            };

            debug!("Stage {}: watching {}", Stage::Stabilizing, watch_dir.display());
            let stable = match self
                .monitor
                .await_stable(self.probe.as_ref(), &watch_dir, &filter)
                .await
            {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("Skipping {}: {}", artifact.path.display(), e);
                    let mut report = ArtifactReport::new(artifact.path.clone());
                    report.state = ArtifactState::failed(Stage::Stabilizing, e);
                    summary.absorb(report);
                    continue;
                }
            };

            for path in stable {
                let report = match self.process_stable(&path, &artifact.site_id, retailer).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("Run aborted: {}", e);
                        error!("{}", summary);
                        return Err(e);
                    }
                };
                if !report.state.is_done() {
                    quarantined.insert(path);
                }
                summary.absorb(report);
            }
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Runs one stabilized file through the remaining stages. The scratch
    /// directory is removed on every path out of here, including a fatal
    /// store error; the source file is removed only once it reached `Done`.
    pub async fn process_stable(
        &self,
        path: &Path,
        site_id: &str,
        retailer: &RetailerProfile,
    ) -> Result<ArtifactReport, IngestionError> {
        let mut report = ArtifactReport::new(path.to_path_buf());

        debug!("Stage {}: {}", Stage::Extracting, path.display());
        let scratch = match std::fs::create_dir_all(&self.work_dir).and_then(|_| {
            tempfile::Builder::new()
                .prefix(&format!("{}-", site_id))
                .tempdir_in(&self.work_dir)
        }) {
            Ok(dir) => dir,
            Err(e) => {
                report.state = ArtifactState::failed(Stage::Extracting, format!("cannot create scratch directory: {}", e));
                return Ok(report);
            }
        };
        report.scratch_dir = Some(scratch.path().to_path_buf());

        let outcome = self.run_stages(path, scratch.path(), retailer, &mut report).await;
        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory: {}", e);
        }
        report.state = outcome?;

        match &report.state {
            ArtifactState::Done => {
                debug!("Stage {}: {}", Stage::Done, path.display());
                match std::fs::remove_file(path) {
                    Ok(()) => info!("Processed and removed {}", path.display()),
                    Err(e) => warn!("Processed {} but could not remove it: {}", path.display(), e),
                }
            }
            ArtifactState::Failed { stage, reason } => {
                warn!(
                    "Failed at {} ({}); leaving {} in place for inspection",
                    stage,
                    reason,
                    path.display()
                );
            }
        }
        Ok(report)
    }

    async fn run_stages(
        &self,
        path: &Path,
        scratch: &Path,
        retailer: &RetailerProfile,
        report: &mut ArtifactReport,
    ) -> Result<ArtifactState, IngestionError> {
        let format = match sniffer::classify(path) {
            Ok(format) => format,
            Err(e) => return Ok(ArtifactState::failed(Stage::Extracting, e)),
        };
        let members = match extractor::extract(path, format, scratch) {
            Ok(members) => members,
            Err(e) => return Ok(ArtifactState::failed(Stage::Extracting, e)),
        };
        if members.is_empty() {
            return Ok(ArtifactState::failed(Stage::Extracting, "archive contained no members"));
        }

        let transformer = RecordTransformer::new(retailer.fields.clone(), retailer.store_id.clone());
        let mut first_failure: Option<ArtifactState> = None;
        let mut transformed_any = false;
        let mut unpersisted = 0u64;

        for member in &members {
            debug!("Stage {}: {}", Stage::Normalizing, member.display());
            let parsed = std::fs::read(member)
                .map_err(|e| e.to_string())
                .and_then(|bytes| parsers::normalize_document(&bytes).map_err(|e| e.to_string()));
            let doc = match parsed {
                Ok(doc) => {
                    report.members_parsed += 1;
                    doc
                }
                Err(reason) => {
                    warn!("Skipping member {}: {}", member.display(), reason);
                    report.members_failed += 1;
                    if first_failure.is_none() {
                        first_failure = Some(ArtifactState::failed(Stage::Normalizing, reason));
                    }
                    continue;
                }
            };

            debug!("Stage {}: {}", Stage::Transforming, member.display());
            let transformed = match transformer.transform(&doc) {
                Ok(transformed) => transformed,
                Err(e) => {
                    warn!("No records from {}: {}", member.display(), e);
                    if first_failure.is_none() {
                        first_failure = Some(ArtifactState::failed(Stage::Transforming, e));
                    }
                    continue;
                }
            };
            transformed_any = true;
            report.items.absorb(&transformed.tally);

            debug!("Stage {}: {} records", Stage::Persisting, transformed.records.len());
            unpersisted += self.persist(&transformed.records, report).await?;
        }

        Ok(if unpersisted > 0 {
            ArtifactState::failed(Stage::Persisting, format!("{} record(s) failed to persist", unpersisted))
        } else if transformed_any {
            ArtifactState::Done
        } else {
            first_failure.unwrap_or_else(|| ArtifactState::failed(Stage::Transforming, "no member produced records"))
        })
    }

    /// Number of records the store failed to take.
    async fn persist(&self, records: &[ProductRecord], report: &mut ArtifactReport) -> Result<u64, IngestionError> {
        let mut failed = 0u64;
        for record in records {
            let outcome = match self.mode {
                IngestionMode::Augment => self.store.upsert(record).await,
                IngestionMode::Seed => self.store.upsert_or_create(record).await,
            };
            match outcome {
                Ok(outcome) => {
                    if let UpsertOutcome::Skipped(reason) = outcome {
                        debug!("Skipped {}: {}", record.barcode, reason);
                    }
                    report.items.record_outcome(outcome);
                }
                Err(StoreError::Unavailable(reason)) => {
                    error!("Store unavailable while persisting {}: {}", record.barcode, reason);
                    return Err(IngestionError::StoreUnavailable(reason));
                }
                Err(e) => {
                    warn!("Failed to persist {}: {}", record.barcode, e);
                    report.items.store_failures += 1;
                    failed += 1;
                }
            }
        }
        Ok(failed)
    }
}
