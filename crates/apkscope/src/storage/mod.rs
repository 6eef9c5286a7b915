//! On-disk storage for uploaded packages.
//!
//! Uploads land in a single flat directory under a generated name that
//! keeps the original basename for operator readability while making
//! collisions practically impossible. The generated name doubles as the
//! upload's file id on the wire.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::StorageError;

pub struct UploadStore {
    upload_dir: PathBuf,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>>(upload_dir: P) -> Self {
        Self {
            upload_dir: upload_dir.as_ref().to_path_buf(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Writes the uploaded bytes to disk under a generated name and
    /// returns the stored path. The filename is the upload's file id.
    pub fn save(&self, original_name: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_dir()?;

        let filename = generate_filename(original_name);
        let path = self.upload_dir.join(&filename);

        // create_new so a (vanishingly unlikely) name collision fails
        // loudly instead of overwriting another upload.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        debug!("Stored upload at {}", path.display());
        Ok(path)
    }

    /// Removes a stored upload. Missing files are treated as already
    /// deleted.
    pub fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Upload {} already removed", path.display());
                Ok(())
            }
            Err(e) => Err(StorageError::DeleteFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Best-effort delete for cleanup paths where the original error
    /// must not be masked.
    pub fn delete_logged(&self, path: &Path) {
        if let Err(e) = self.delete(path) {
            warn!("Failed to clean up upload: {}", e);
        }
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.upload_dir.exists() {
            std::fs::create_dir_all(&self.upload_dir).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.upload_dir.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }
}

/// `{epoch_millis}-{random}-{sanitized basename}`; the random segment
/// disambiguates uploads landing in the same millisecond.
fn generate_filename(original_name: &str) -> String {
    let basename = Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.apk");
    let sanitized: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..9],
        sanitized
    )
}
