use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::domain::{error::ExtractError, models::ArchiveFormat};

/// Maximum decompressed bytes written for a single member (zip-bomb protection).
pub const MAX_MEMBER_BYTES: u64 = 256 * 1024 * 1024;

/// Expands `archive` into `destination` and returns the member paths in
/// archive order. The source archive is left untouched.
pub fn extract(
    archive: &Path,
    format: ArchiveFormat,
    destination: &Path,
) -> Result<Vec<PathBuf>, ExtractError> {
    debug!("Extracting {} ({}) into {}", archive.display(), format, destination.display());
    fs::create_dir_all(destination)?;
    let members = match format {
        ArchiveFormat::Zip => extract_zip(archive, destination)?,
        ArchiveFormat::Gzip => vec![extract_gzip(archive, destination)?],
        ArchiveFormat::Unknown => return Err(ExtractError::UnrecognizedFormat),
    };
    info!("Extracted {} member(s) from {}", members.len(), archive.display());
    Ok(members)
}

fn extract_zip(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    let mut members = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let target = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let name = entry.name().to_string();
        write_bounded(&mut entry, &target, &name)?;
        members.push(target);
    }
    Ok(members)
}

fn extract_gzip(archive: &Path, destination: &Path) -> Result<PathBuf, ExtractError> {
    let target = destination.join(gzip_member_name(archive));
    let decoder = GzDecoder::new(File::open(archive)?);
    let name = target.display().to_string();
    write_bounded(decoder, &target, &name).map_err(|e| match e {
        // flate2 reports bad headers and truncated streams as I/O errors.
        ExtractError::Io(io_err)
            if matches!(io_err.kind(), io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof) =>
        {
            ExtractError::Corrupt(io_err.to_string())
        }
        other => other,
    })?;
    Ok(target)
}

fn write_bounded<R: Read>(reader: R, target: &Path, name: &str) -> Result<(), ExtractError> {
    let mut out = File::create(target)?;
    let copied = io::copy(&mut reader.take(MAX_MEMBER_BYTES + 1), &mut out)?;
    if copied > MAX_MEMBER_BYTES {
        return Err(ExtractError::EntryTooLarge {
            name: name.to_string(),
            limit: MAX_MEMBER_BYTES,
        });
    }
    out.flush()?;
    Ok(())
}

/// `PriceFull7290.gz` -> `PriceFull7290`; mislabelled names fall back to the stem.
fn gzip_member_name(archive: &Path) -> String {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let lower = file_name.to_lowercase();
    let stripped = [".gzip", ".gz"]
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| file_name[..file_name.len() - suffix.len()].to_string())
        .unwrap_or_else(|| {
            archive
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });
    if stripped.is_empty() {
        "member".to_string()
    } else {
        stripped
    }
}
