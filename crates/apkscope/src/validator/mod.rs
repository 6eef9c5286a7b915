//! Structural validation of uploaded Android packages.
//!
//! Confirms the upload is a well-formed zip container and that a root
//! `AndroidManifest.xml` entry exists, without inspecting entry contents.
//! Read-only: the caller is responsible for deleting rejected uploads.

use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::error::ValidationFailure;

/// Entry that must be present at the archive root for a structurally
/// valid package.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates the package at `path`.
    ///
    /// Returns `Ok(())` only if the archive opens cleanly and the manifest
    /// entry is found during a full entry scan. File handles are scoped to
    /// this call and released on every exit path.
    pub fn validate(&self, path: &Path) -> Result<(), ValidationFailure> {
        if !path.is_file() {
            return Err(ValidationFailure::FileNotFound);
        }

        let file = File::open(path).map_err(|e| {
            debug!("Failed to open upload {}: {}", path.display(), e);
            ValidationFailure::FileNotFound
        })?;

        let archive = zip::ZipArchive::new(file).map_err(|e| {
            debug!("Failed to parse archive {}: {}", path.display(), e);
            ValidationFailure::InvalidZipStructure
        })?;

        // Entry names come from the central directory; no decompression
        // happens here.
        let has_manifest = archive.file_names().any(|name| name == MANIFEST_ENTRY);

        if has_manifest {
            Ok(())
        } else {
            Err(ValidationFailure::MissingManifest)
        }
    }
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::new()
    }
}
