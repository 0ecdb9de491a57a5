use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    error::MonitorError,
    ports::{DirectoryProbe, ProbedFile},
};

/// Reads sizes straight from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl DirectoryProbe for FsProbe {
    fn list(&self, dir: &Path) -> std::io::Result<Vec<ProbedFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(m) => m,
                // Renamed away between read_dir and stat; the browser does this on completion.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if metadata.is_file() {
                files.push(ProbedFile {
                    path: entry.path(),
                    size: metadata.len(),
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

/// Decides which files count as finished downloads and which mark a download
/// still in flight. Suffixes are compared case-insensitively.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    completed_suffixes: Vec<String>,
    in_progress_suffixes: Vec<String>,
    only: Option<PathBuf>,
    excluded: HashSet<PathBuf>,
}

impl CandidateFilter {
    pub fn new(completed_suffixes: &[String], in_progress_suffixes: &[String]) -> Self {
        Self {
            completed_suffixes: completed_suffixes.iter().map(|s| s.to_lowercase()).collect(),
            in_progress_suffixes: in_progress_suffixes.iter().map(|s| s.to_lowercase()).collect(),
            only: None,
            excluded: HashSet::new(),
        }
    }

    /// Restrict candidates to a single known file, whatever its suffix.
    pub fn only(mut self, path: &Path) -> Self {
        self.only = Some(path.to_path_buf());
        self
    }

    pub fn excluding<'a>(mut self, paths: impl IntoIterator<Item = &'a PathBuf>) -> Self {
        self.excluded.extend(paths.into_iter().cloned());
        self
    }

    pub fn is_in_progress(&self, path: &Path) -> bool {
        let name = lowercase_name(path);
        self.in_progress_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    pub fn is_candidate(&self, path: &Path) -> bool {
        if self.is_in_progress(path) || self.excluded.contains(path) {
            return false;
        }
        if let Some(only) = &self.only {
            return only == path;
        }
        let name = lowercase_name(path);
        self.completed_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

fn lowercase_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Bounded polling loop that waits for downloads to stop growing.
#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    timeout: Duration,
    poll_interval: Duration,
    required_stable_polls: u32,
}

impl StabilityMonitor {
    pub fn new(timeout: Duration, poll_interval: Duration, required_stable_polls: u32) -> Self {
        Self {
            timeout,
            poll_interval,
            required_stable_polls: required_stable_polls.max(1),
        }
    }

    /// Polls `dir` until the candidate set is non-empty, no in-progress file
    /// exists, and every candidate size has been unchanged for
    /// `required_stable_polls` consecutive polls.
    ///
    /// A change of the candidate set itself (a file replaced, added or
    /// removed) resets both the stable count and the deadline.
    pub async fn await_stable(
        &self,
        probe: &dyn DirectoryProbe,
        dir: &Path,
        filter: &CandidateFilter,
    ) -> Result<Vec<PathBuf>, MonitorError> {
        let started = Instant::now();
        let mut deadline = started + self.timeout;
        let mut previous: Option<BTreeMap<PathBuf, u64>> = None;
        let mut stable_polls = 0u32;
        let mut polls = 0u64;

        loop {
            let listing = probe.list(dir).map_err(|source| MonitorError::Io {
                dir: dir.to_path_buf(),
                source,
            })?;
            polls += 1;

            let in_progress = listing.iter().any(|f| filter.is_in_progress(&f.path));
            let candidates: BTreeMap<PathBuf, u64> = listing
                .into_iter()
                .filter(|f| filter.is_candidate(&f.path))
                .map(|f| (f.path, f.size))
                .collect();

            let set_changed = previous
                .as_ref()
                .is_some_and(|prev| !prev.is_empty() && !prev.keys().eq(candidates.keys()));

            if set_changed {
                debug!("Candidate set changed in {}, restarting stability window", dir.display());
                stable_polls = 0;
                deadline = Instant::now() + self.timeout;
            } else if in_progress || candidates.is_empty() {
                stable_polls = 0;
            } else if previous.as_ref() == Some(&candidates) {
                stable_polls += 1;
            } else {
                stable_polls = 0;
            }

            debug!(
                "Poll {} of {}: {} candidates, in_progress={}, stable_polls={}/{}",
                polls,
                dir.display(),
                candidates.len(),
                in_progress,
                stable_polls,
                self.required_stable_polls
            );

            if stable_polls >= self.required_stable_polls {
                info!("{} artifact(s) stable in {} after {} polls", candidates.len(), dir.display(), polls);
                return Ok(candidates.into_keys().collect());
            }
            previous = Some(candidates);

            if Instant::now() >= deadline {
                warn!("Timed out waiting for a stable artifact in {}", dir.display());
                return Err(MonitorError::TimedOut {
                    dir: dir.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
