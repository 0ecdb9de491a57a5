use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

use crate::domain::models::{ItemSkip, SkipReason, UpsertOutcome};

/// Per-artifact pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovered,
    Stabilizing,
    Extracting,
    Normalizing,
    Transforming,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovered => "discovered",
            Stage::Stabilizing => "stabilizing",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Transforming => "transforming",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    Done,
    Failed { stage: Stage, reason: String },
}

impl ArtifactState {
    pub fn failed(stage: Stage, reason: impl fmt::Display) -> Self {
        ArtifactState::Failed {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ArtifactState::Done)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ItemTally {
    pub emitted: u64,
    pub missing_barcode: u64,
    pub missing_price: u64,
    pub invalid_price: u64,
    pub inserted: u64,
    pub merged: u64,
    pub unknown_product: u64,
    pub duplicate_observation: u64,
    pub store_failures: u64,
}

impl ItemTally {
    pub fn record_skip(&mut self, skip: ItemSkip) {
        match skip {
            ItemSkip::MissingBarcode => self.missing_barcode += 1,
            ItemSkip::MissingPrice => self.missing_price += 1,
            ItemSkip::InvalidPrice => self.invalid_price += 1,
        }
    }

    pub fn record_outcome(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Merged => self.merged += 1,
            UpsertOutcome::Skipped(SkipReason::UnknownProduct) => self.unknown_product += 1,
            UpsertOutcome::Skipped(SkipReason::DuplicateObservation) => self.duplicate_observation += 1,
        }
    }

    pub fn absorb(&mut self, other: &ItemTally) {
        self.emitted += other.emitted;
        self.missing_barcode += other.missing_barcode;
        self.missing_price += other.missing_price;
        self.invalid_price += other.invalid_price;
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.unknown_product += other.unknown_product;
        self.duplicate_observation += other.duplicate_observation;
        self.store_failures += other.store_failures;
    }

    pub fn skipped(&self) -> u64 {
        self.missing_barcode + self.missing_price + self.invalid_price
    }
}

/// Outcome of one stabilized artifact.
#[derive(Debug, Clone)]
pub struct ArtifactReport {
    pub path: PathBuf,
    pub state: ArtifactState,
    /// Per-artifact extraction directory; gone by the time the report exists.
    pub scratch_dir: Option<PathBuf>,
    pub members_parsed: u64,
    pub members_failed: u64,
    pub items: ItemTally,
}

impl ArtifactReport {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: ArtifactState::Done,
            scratch_dir: None,
            members_parsed: 0,
            members_failed: 0,
            items: ItemTally::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub site: String,
    pub store_name: String,
    pub artifacts_processed: u64,
    pub artifacts_failed: u64,
    pub artifacts_timed_out: u64,
    pub members_parsed: u64,
    pub members_failed: u64,
    pub items: ItemTally,
    pub reports: Vec<ArtifactReport>,
}

impl RunSummary {
    pub fn new(site: &str, store_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            site: site.to_string(),
            store_name: store_name.to_string(),
            artifacts_processed: 0,
            artifacts_failed: 0,
            artifacts_timed_out: 0,
            members_parsed: 0,
            members_failed: 0,
            items: ItemTally::default(),
            reports: Vec::new(),
        }
    }

    pub fn absorb(&mut self, report: ArtifactReport) {
        match &report.state {
            ArtifactState::Done => self.artifacts_processed += 1,
            ArtifactState::Failed { stage: Stage::Stabilizing, .. } => self.artifacts_timed_out += 1,
            ArtifactState::Failed { .. } => self.artifacts_failed += 1,
        }
        self.members_parsed += report.members_parsed;
        self.members_failed += report.members_failed;
        self.items.absorb(&report.items);
        self.reports.push(report);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} for {} ({})", self.run_id, self.site, self.store_name)?;
        writeln!(
            f,
            "  artifacts: {} processed, {} failed, {} timed out",
            self.artifacts_processed, self.artifacts_failed, self.artifacts_timed_out
        )?;
        writeln!(f, "  members: {} parsed, {} failed", self.members_parsed, self.members_failed)?;
        writeln!(
            f,
            "  items: {} emitted, {} skipped (missing barcode {}, missing price {}, invalid price {})",
            self.items.emitted,
            self.items.skipped(),
            self.items.missing_barcode,
            self.items.missing_price,
            self.items.invalid_price
        )?;
        write!(
            f,
            "  store: {} inserted, {} merged, {} unknown product, {} duplicate observation, {} failed",
            self.items.inserted,
            self.items.merged,
            self.items.unknown_product,
            self.items.duplicate_observation,
            self.items.store_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_buckets_timeouts_apart_from_failures() {
        let mut summary = RunSummary::new("mega", "Mega");
        let mut done = ArtifactReport::new("a.gz".into());
        done.items.record_outcome(UpsertOutcome::Merged);
        done.items.record_skip(ItemSkip::MissingBarcode);
        summary.absorb(done);

        let mut timed_out = ArtifactReport::new("b.gz".into());
        timed_out.state = ArtifactState::failed(Stage::Stabilizing, "timed out");
        summary.absorb(timed_out);

        let mut broken = ArtifactReport::new("c.gz".into());
        broken.state = ArtifactState::failed(Stage::Extracting, "corrupt archive");
        summary.absorb(broken);

        assert_eq!(summary.artifacts_processed, 1);
        assert_eq!(summary.artifacts_timed_out, 1);
        assert_eq!(summary.artifacts_failed, 1);
        assert_eq!(summary.items.merged, 1);
        assert_eq!(summary.items.skipped(), 1);
        assert!(summary.to_string().contains("1 merged"));
    }
}
