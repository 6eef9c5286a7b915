//! Package analysis: extraction, manifest parsing, resource inventory,
//! and risk scoring.

pub mod extractor;
pub mod manifest;
pub mod resources;
pub mod risk;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::error::AnalysisError;
use crate::validator::MANIFEST_ENTRY;

/// Full analysis payload written to the record on successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub timestamp: DateTime<Utc>,
    pub manifest_data: ManifestData,
    pub resource_data: ResourceData,
    pub risk_assessment: RiskAssessment,
    pub analysis_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestData {
    pub package_info: PackageInfo,
    pub permissions: Vec<String>,
    pub components: Components,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub package_name: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub activities: Vec<ComponentInfo>,
    pub services: Vec<ComponentInfo>,
    pub receivers: Vec<ComponentInfo>,
    pub providers: Vec<ComponentInfo>,
}

/// An application-declared component. `exported` without a `permission`
/// guard makes the component reachable by other applications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub name: String,
    pub exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    pub assets: Vec<AssetGroup>,
}

/// Sampled inventory of one resource type directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroup {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
    /// First [`resources::SAMPLE_LIMIT`] entries, not an exhaustive listing.
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_score: u32,
    pub risk_factors: Vec<RiskFactor>,
}

/// A contributing risk factor, recorded individually for explainability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum RiskFactor {
    DangerousPermissions(Vec<String>),
    ExposedComponents(Vec<ExposedComponent>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposedComponent {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Activity,
    Service,
    Receiver,
    Provider,
}

/// Drives the full analysis of one uploaded package: extract the archive,
/// parse the manifest, inventory resources, and score risk.
pub struct ApkAnalyzer {
    output_dir: PathBuf,
}

impl ApkAnalyzer {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Analyzes the package at `archive_path`, extracting into
    /// `{output_dir}/{analysis_id}/`. Returns the report and the
    /// extraction directory.
    pub fn analyze(
        &self,
        analysis_id: &str,
        archive_path: &Path,
    ) -> Result<(AnalysisReport, PathBuf), AnalysisError> {
        let dest = self.output_dir.join(analysis_id);

        {
            let _span = info_span!("extract", analysis_id = %analysis_id).entered();
            extractor::extract_package(archive_path, &dest)?;
        }

        let manifest_path = dest.join(MANIFEST_ENTRY);
        if !manifest_path.is_file() {
            return Err(AnalysisError::ManifestMissing);
        }
        let manifest_xml =
            std::fs::read_to_string(&manifest_path).map_err(|e| AnalysisError::ReadPackage {
                path: manifest_path.clone(),
                source: e,
            })?;

        let manifest_data = {
            let _span = info_span!("parse_manifest", analysis_id = %analysis_id).entered();
            manifest::parse_manifest(&manifest_xml)?
        };

        let resource_data = resources::inventory_resources(&dest)?;

        let risk_assessment = risk::assess(&manifest_data);

        let report = AnalysisReport {
            timestamp: Utc::now(),
            manifest_data,
            resource_data,
            risk_assessment,
            analysis_complete: true,
        };

        Ok((report, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.demo" android:versionCode="7" android:versionName="1.2.3">
    <uses-permission android:name="android.permission.CAMERA"/>
    <uses-permission android:name="android.permission.INTERNET"/>
    <application>
        <activity android:name=".MainActivity" android:exported="true"/>
        <service android:name=".SyncService" android:exported="false"/>
    </application>
</manifest>"#;

    fn build_apk(dir: &Path) -> PathBuf {
        let path = dir.join("demo.apk");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let opts = SimpleFileOptions::default();
        writer.start_file("AndroidManifest.xml", opts).unwrap();
        writer.write_all(MANIFEST.as_bytes()).unwrap();
        writer.start_file("res/drawable/icon.png", opts).unwrap();
        writer.write_all(b"png").unwrap();
        writer.start_file("res/layout/main.xml", opts).unwrap();
        writer.write_all(b"<layout/>").unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_analyze_full_package() {
        let tmp = TempDir::new().unwrap();
        let apk = build_apk(tmp.path());
        let analyzer = ApkAnalyzer::new(tmp.path().join("out"));

        let (report, dest) = analyzer.analyze("analysis-1", &apk).unwrap();

        assert!(report.analysis_complete);
        assert_eq!(
            report.manifest_data.package_info.package_name.as_deref(),
            Some("com.example.demo")
        );
        assert_eq!(report.manifest_data.permissions.len(), 2);
        assert_eq!(report.manifest_data.components.activities.len(), 1);
        // CAMERA (10) + one unguarded exported activity (5).
        assert_eq!(report.risk_assessment.risk_score, 15);
        assert!(dest.ends_with("analysis-1"));
        assert!(dest.join("AndroidManifest.xml").is_file());
    }

    #[test]
    fn test_analyze_missing_manifest_entry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bare.apk");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("classes.dex", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"dex").unwrap();
        writer.finish().unwrap();

        let analyzer = ApkAnalyzer::new(tmp.path().join("out"));
        let err = analyzer.analyze("analysis-2", &path).unwrap_err();
        assert!(matches!(err, AnalysisError::ManifestMissing));
    }

    #[test]
    fn test_report_serializes_with_wire_field_names() {
        let report = AnalysisReport {
            timestamp: Utc::now(),
            manifest_data: ManifestData::default(),
            resource_data: ResourceData::default(),
            risk_assessment: RiskAssessment {
                risk_score: 25,
                risk_factors: vec![RiskFactor::DangerousPermissions(vec![
                    "android.permission.CAMERA".to_string(),
                ])],
            },
            analysis_complete: true,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["analysisComplete"], true);
        assert_eq!(json["riskAssessment"]["riskScore"], 25);
        assert_eq!(
            json["riskAssessment"]["riskFactors"][0]["type"],
            "dangerous_permissions"
        );
    }
}
