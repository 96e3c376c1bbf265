//! Drift detection: compare written templates against lock hashes.

use crate::core::graph::ResourceKind;
use crate::core::types::{ResourceStatus, StackLock};
use crate::tripwire::hasher;
use std::path::Path;

/// Sentinel hash for a template file that no longer exists.
pub const MISSING: &str = "MISSING";

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub stack: String,
    /// Logical id, or the template path for template-level findings
    pub resource_id: String,
    pub kind: Option<ResourceKind>,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

fn detail_str<'a>(details: &'a std::collections::HashMap<String, serde_yaml_ng::Value>, key: &str) -> Option<&'a str> {
    match details.get(key) {
        Some(serde_yaml_ng::Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Check one stack's deployed template for drift.
///
/// A template whose file hash still matches the lock has no drift. Otherwise
/// each converged resource is re-hashed from the file and compared with the
/// hash recorded at deploy; when no single resource accounts for the change a
/// template-level finding is reported.
pub fn detect_drift(lock: &StackLock) -> Vec<DriftFinding> {
    let (path, expected) = match (&lock.template_path, &lock.template_hash) {
        (Some(p), Some(h)) => (p.as_str(), h.as_str()),
        _ => return Vec::new(),
    };
    let template_finding = |actual: String, detail: String| DriftFinding {
        stack: lock.stack.clone(),
        resource_id: path.to_string(),
        kind: None,
        expected_hash: expected.to_string(),
        actual_hash: actual,
        detail,
    };

    let file = Path::new(path);
    if !file.exists() {
        return vec![template_finding(
            MISSING.to_string(),
            format!("{} does not exist", path),
        )];
    }
    let actual = hasher::hash_file(file).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual == expected {
        return Vec::new();
    }

    let doc: Option<serde_json::Value> = std::fs::read_to_string(file)
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok());
    let mut findings = Vec::new();
    if let Some(doc) = doc {
        for (id, rl) in &lock.resources {
            if rl.status != ResourceStatus::Converged {
                continue;
            }
            let Some(expected_resource) = detail_str(&rl.details, "resolved_hash") else {
                continue;
            };
            let (actual_resource, detail) = match doc["Resources"].get(id) {
                Some(body) => (hasher::hash_json(body), format!("{} properties changed", id)),
                None => (MISSING.to_string(), format!("{} removed from template", id)),
            };
            if actual_resource != expected_resource {
                findings.push(DriftFinding {
                    stack: lock.stack.clone(),
                    resource_id: id.clone(),
                    kind: Some(rl.kind),
                    expected_hash: expected_resource.to_string(),
                    actual_hash: actual_resource,
                    detail,
                });
            }
        }
    }

    if findings.is_empty() {
        findings.push(template_finding(actual, format!("{} content changed", path)));
    }
    findings
}
