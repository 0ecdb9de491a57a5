use std::path::{Path, PathBuf};

use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::domain::{error::IngestionError, models::Artifact, ports::SiteConnector};

/// Connector over a directory that something else fills.
///
/// Triggers nothing: every completed file already sitting in the download
/// directory becomes one artifact, so manual drops and artifacts left behind
/// by an earlier failed run are picked up again.
pub struct DropDirectoryConnector {
    site: String,
    completed_suffixes: Vec<String>,
}

impl DropDirectoryConnector {
    pub fn new(site: impl Into<String>, completed_suffixes: &[String]) -> Self {
        Self {
            site: site.into(),
            completed_suffixes: completed_suffixes.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn is_completed(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };
        self.completed_suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            IngestionError::Connector(format!("cannot read {}: {}", dir.display(), e))
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && self.is_completed(&path) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

impl SiteConnector for DropDirectoryConnector {
    fn site_identifier(&self) -> &str {
        &self.site
    }

    fn enumerate_and_trigger_downloads<'a>(
        &'a self,
        download_directory: &'a Path,
    ) -> BoxStream<'a, Result<Artifact, IngestionError>> {
        match self.scan(download_directory) {
            Ok(paths) => {
                info!("Found {} artifact(s) in {}", paths.len(), download_directory.display());
                stream::iter(paths.into_iter().map(move |path| {
                    debug!("Yielding {}", path.display());
                    Ok(Artifact::new(path, self.site.clone()))
                }))
                .boxed()
            }
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}
