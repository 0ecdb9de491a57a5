use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::domain::models::ArchiveFormat;

const ZIP_MAGIC: [u8; 2] = *b"PK";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const HEADER_LEN: usize = 4;

/// Classifies a header by its leading bytes. File names are never consulted.
pub fn classify_bytes(header: &[u8]) -> ArchiveFormat {
    match header.get(..2) {
        Some(magic) if magic == ZIP_MAGIC => ArchiveFormat::Zip,
        Some(magic) if magic == GZIP_MAGIC => ArchiveFormat::Gzip,
        _ => ArchiveFormat::Unknown,
    }
}

pub fn classify(path: &Path) -> std::io::Result<ArchiveFormat> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    let format = classify_bytes(&header);
    debug!("Sniffed {} as {} from header {:02x?}", path.display(), format, header);
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_magic_only() {
        assert_eq!(classify_bytes(b"PK\x03\x04"), ArchiveFormat::Zip);
        assert_eq!(classify_bytes(&[0x1f, 0x8b, 0x08]), ArchiveFormat::Gzip);
        assert_eq!(classify_bytes(b"<?xml"), ArchiveFormat::Unknown);
        assert_eq!(classify_bytes(b"P"), ArchiveFormat::Unknown);
        assert_eq!(classify_bytes(b""), ArchiveFormat::Unknown);
        assert_eq!(classify_bytes(&[0x8b, 0x1f]), ArchiveFormat::Unknown);
    }

    #[test]
    fn ignores_misleading_extensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let zip_named_gz = dir.path().join("Price7290.gz");
        std::fs::write(&zip_named_gz, b"PK\x03\x04rest").unwrap();
        let gz_named_xml = dir.path().join("Promo.xml");
        std::fs::write(&gz_named_xml, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        let empty = dir.path().join("empty.zip");
        std::fs::write(&empty, b"").unwrap();

        assert_eq!(classify(&zip_named_gz).unwrap(), ArchiveFormat::Zip);
        assert_eq!(classify(&gz_named_xml).unwrap(), ArchiveFormat::Gzip);
        assert_eq!(classify(&empty).unwrap(), ArchiveFormat::Unknown);
    }
}
