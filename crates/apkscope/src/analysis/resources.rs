//! Resource directory inventory.
//!
//! Walks `res/<type>/` directories of an extracted package and records a
//! sampled listing per resource type. The listing is a sample, not an
//! exhaustive index.

use std::path::Path;

use walkdir::WalkDir;

use super::{AssetGroup, ResourceData};
use crate::error::AnalysisError;

/// Maximum number of item names recorded per resource type.
pub const SAMPLE_LIMIT: usize = 10;

/// Inventories the `res/` directory under `extracted_dir`.
///
/// A package without a `res/` directory yields an empty inventory.
pub fn inventory_resources(extracted_dir: &Path) -> Result<ResourceData, AnalysisError> {
    let res_dir = extracted_dir.join("res");
    if !res_dir.is_dir() {
        return Ok(ResourceData::default());
    }

    let mut assets = Vec::new();

    let mut type_dirs: Vec<_> = std::fs::read_dir(&res_dir)
        .map_err(|e| AnalysisError::ResourceScan(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .collect();
    // Directory order is platform-dependent; sort for a stable inventory.
    type_dirs.sort_by_key(|entry| entry.file_name());

    for type_dir in type_dirs {
        let kind = type_dir.file_name().to_string_lossy().to_string();

        let mut items: Vec<String> = WalkDir::new(type_dir.path())
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        items.sort();

        let count = items.len();
        items.truncate(SAMPLE_LIMIT);

        assets.push(AssetGroup { kind, count, items });
    }

    Ok(ResourceData { assets })
}
