//! Risk scoring over parsed manifest data.
//!
//! Two factors contribute: dangerous permission grants and exported
//! components lacking a permission guard. Each factor group is recorded
//! individually so the score can be explained.

use super::{ComponentInfo, ComponentKind, ExposedComponent, ManifestData, RiskAssessment, RiskFactor};

/// Permission grants treated as elevating risk.
pub const DANGEROUS_PERMISSIONS: &[&str] = &[
    "android.permission.READ_CONTACTS",
    "android.permission.WRITE_CONTACTS",
    "android.permission.ACCESS_FINE_LOCATION",
    "android.permission.RECORD_AUDIO",
    "android.permission.CAMERA",
    "android.permission.READ_SMS",
    "android.permission.SEND_SMS",
];

/// Score contribution per dangerous permission match.
const PERMISSION_WEIGHT: u32 = 10;
/// Score contribution per unguarded exported component.
const EXPOSURE_WEIGHT: u32 = 5;
/// Score ceiling.
const MAX_SCORE: u32 = 100;

/// Computes the risk assessment for a parsed manifest.
pub fn assess(manifest: &ManifestData) -> RiskAssessment {
    let mut risk_factors = Vec::new();
    let mut score = 0u32;

    let dangerous: Vec<String> = manifest
        .permissions
        .iter()
        .filter(|p| DANGEROUS_PERMISSIONS.contains(&p.as_str()))
        .cloned()
        .collect();

    if !dangerous.is_empty() {
        score += dangerous.len() as u32 * PERMISSION_WEIGHT;
        risk_factors.push(RiskFactor::DangerousPermissions(dangerous));
    }

    let exposed: Vec<ExposedComponent> = [
        (ComponentKind::Activity, &manifest.components.activities),
        (ComponentKind::Service, &manifest.components.services),
        (ComponentKind::Receiver, &manifest.components.receivers),
        (ComponentKind::Provider, &manifest.components.providers),
    ]
    .into_iter()
    .flat_map(|(kind, components)| {
        components
            .iter()
            .filter(|c| is_unguarded_export(c))
            .map(move |c| ExposedComponent {
                kind,
                name: c.name.clone(),
            })
    })
    .collect();

    if !exposed.is_empty() {
        score += exposed.len() as u32 * EXPOSURE_WEIGHT;
        risk_factors.push(RiskFactor::ExposedComponents(exposed));
    }

    RiskAssessment {
        risk_score: score.min(MAX_SCORE),
        risk_factors,
    }
}

fn is_unguarded_export(component: &ComponentInfo) -> bool {
    component.exported && component.permission.is_none()
}
