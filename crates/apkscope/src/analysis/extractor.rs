//! Archive extraction for queued packages.
//!
//! Stands in for full decompilation: the archive is unpacked so the
//! manifest and resource tree can be inspected on disk.

use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::error::AnalysisError;

/// Extracts the zip archive at `archive_path` into `dest`.
///
/// Entries whose names escape the destination directory (absolute paths,
/// `..` traversal) are skipped rather than written.
pub fn extract_package(archive_path: &Path, dest: &Path) -> Result<(), AnalysisError> {
    let file = File::open(archive_path).map_err(|e| AnalysisError::ReadPackage {
        path: archive_path.to_path_buf(),
        source: e,
    })?;

    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| AnalysisError::OpenArchive(e.to_string()))?;

    std::fs::create_dir_all(dest).map_err(|e| AnalysisError::Extract(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AnalysisError::Extract(e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            debug!("Skipping unsafe archive entry: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| AnalysisError::Extract(e.to_string()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AnalysisError::Extract(e.to_string()))?;
        }

        let mut out =
            File::create(&out_path).map_err(|e| AnalysisError::Extract(e.to_string()))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| AnalysisError::Extract(e.to_string()))?;
    }

    Ok(())
}
