//! AndroidManifest.xml parsing.
//!
//! Pulls package metadata, `uses-permission` grants, and application
//! components (activities, services, receivers, providers) with their
//! export/permission attributes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{ComponentInfo, Components, ManifestData, PackageInfo};
use crate::error::AnalysisError;

/// Parses a decoded AndroidManifest.xml document.
pub fn parse_manifest(xml: &str) -> Result<ManifestData, AnalysisError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut package_info = PackageInfo::default();
    let mut permissions = Vec::new();
    let mut components = Components::default();

    let mut saw_manifest = false;
    let mut in_application = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"application" {
                    in_application = true;
                } else {
                    handle_element(
                        e,
                        in_application,
                        &mut saw_manifest,
                        &mut package_info,
                        &mut permissions,
                        &mut components,
                    );
                }
            }
            // Components and permission grants are typically self-closing.
            Ok(Event::Empty(ref e)) => {
                handle_element(
                    e,
                    in_application,
                    &mut saw_manifest,
                    &mut package_info,
                    &mut permissions,
                    &mut components,
                );
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"application" {
                    in_application = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AnalysisError::ManifestParse(e.to_string())),
            _ => {}
        }
    }

    if !saw_manifest {
        return Err(AnalysisError::ManifestParse(
            "no <manifest> root element".to_string(),
        ));
    }

    Ok(ManifestData {
        package_info,
        permissions,
        components,
    })
}

fn handle_element(
    e: &BytesStart<'_>,
    in_application: bool,
    saw_manifest: &mut bool,
    package_info: &mut PackageInfo,
    permissions: &mut Vec<String>,
    components: &mut Components,
) {
    match e.local_name().as_ref() {
        b"manifest" => {
            *saw_manifest = true;
            package_info.package_name = attr_value(e, b"package");
            package_info.version_code = attr_value(e, b"android:versionCode");
            package_info.version_name = attr_value(e, b"android:versionName");
        }
        b"uses-permission" => {
            if let Some(name) = attr_value(e, b"android:name") {
                permissions.push(name);
            }
        }
        b"activity" if in_application => push_component(e, &mut components.activities),
        b"service" if in_application => push_component(e, &mut components.services),
        b"receiver" if in_application => push_component(e, &mut components.receivers),
        b"provider" if in_application => push_component(e, &mut components.providers),
        _ => {}
    }
}

/// Unnamed components are dropped, matching the record schema which
/// requires a component name.
fn push_component(e: &BytesStart<'_>, out: &mut Vec<ComponentInfo>) {
    let Some(name) = attr_value(e, b"android:name") else {
        return;
    };
    out.push(ComponentInfo {
        name,
        exported: attr_value(e, b"android:exported").as_deref() == Some("true"),
        permission: attr_value(e, b"android:permission"),
    });
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.app" android:versionCode="42" android:versionName="3.1.4">
    <uses-permission android:name="android.permission.CAMERA"/>
    <uses-permission android:name="android.permission.READ_SMS"/>
    <uses-permission android:name="android.permission.INTERNET"/>
    <application android:label="Example">
        <activity android:name=".MainActivity" android:exported="true"/>
        <activity android:name=".SettingsActivity"/>
        <service android:name=".PushService" android:exported="true"
            android:permission="com.example.app.PUSH"/>
        <receiver android:name=".BootReceiver" android:exported="false"/>
        <provider android:name=".DataProvider" android:exported="true"/>
    </application>
</manifest>"#;

    #[test]
    fn test_package_info() {
        let data = parse_manifest(FULL_MANIFEST).unwrap();
        assert_eq!(
            data.package_info.package_name.as_deref(),
            Some("com.example.app")
        );
        assert_eq!(data.package_info.version_code.as_deref(), Some("42"));
        assert_eq!(data.package_info.version_name.as_deref(), Some("3.1.4"));
    }

    #[test]
    fn test_permissions_extracted_in_order() {
        let data = parse_manifest(FULL_MANIFEST).unwrap();
        assert_eq!(
            data.permissions,
            vec![
                "android.permission.CAMERA",
                "android.permission.READ_SMS",
                "android.permission.INTERNET"
            ]
        );
    }

    #[test]
    fn test_components_by_type() {
        let data = parse_manifest(FULL_MANIFEST).unwrap();
        assert_eq!(data.components.activities.len(), 2);
        assert_eq!(data.components.services.len(), 1);
        assert_eq!(data.components.receivers.len(), 1);
        assert_eq!(data.components.providers.len(), 1);

        let main = &data.components.activities[0];
        assert_eq!(main.name, ".MainActivity");
        assert!(main.exported);
        assert!(main.permission.is_none());

        // Missing android:exported defaults to not exported.
        let settings = &data.components.activities[1];
        assert!(!settings.exported);

        let push = &data.components.services[0];
        assert!(push.exported);
        assert_eq!(push.permission.as_deref(), Some("com.example.app.PUSH"));
    }

    #[test]
    fn test_components_outside_application_ignored() {
        let xml = r#"<manifest package="p">
            <activity android:name=".Orphan" android:exported="true"/>
            <application>
                <activity android:name=".Real"/>
            </application>
        </manifest>"#;
        let data = parse_manifest(xml).unwrap();
        assert_eq!(data.components.activities.len(), 1);
        assert_eq!(data.components.activities[0].name, ".Real");
    }

    #[test]
    fn test_unnamed_component_dropped() {
        let xml = r#"<manifest package="p">
            <application>
                <activity android:exported="true"/>
            </application>
        </manifest>"#;
        let data = parse_manifest(xml).unwrap();
        assert!(data.components.activities.is_empty());
    }

    #[test]
    fn test_missing_manifest_root_rejected() {
        let err = parse_manifest("<resources/>").unwrap_err();
        assert!(matches!(err, AnalysisError::ManifestParse(_)));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let err = parse_manifest("<manifest package=\"p\"><a></b></manifest>").unwrap_err();
        assert!(matches!(err, AnalysisError::ManifestParse(_)));
    }
}
