// metrics.rs — Best-effort numeric extraction from results files.
//
// Scans each results resource's root for a top-level JSON document with
// numeric fields (a `metrics` object inside counts too) and records the
// numbers into the snapshot's history entry. Extraction never fails a
// snapshot: anything unreadable is just skipped.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::workspace::Workspace;

/// The file looked at first; other root-level `.json` files are fallbacks.
const PREFERRED_FILE: &str = "results.json";

pub fn extract_metrics(ws: &Workspace) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for name in ws.resource_order() {
        let Ok(adaptor) = ws.adaptor_ref(&name) else {
            continue;
        };
        if !adaptor.role().is_results() {
            continue;
        }
        let Some(root) = adaptor.local_path() else {
            continue;
        };
        if let Some(found) = scan_resource_root(root) {
            metrics.extend(found);
        }
    }
    metrics
}

fn scan_resource_root(root: &Path) -> Option<BTreeMap<String, f64>> {
    let mut candidates = vec![root.join(PREFERRED_FILE)];
    if let Ok(entries) = std::fs::read_dir(root) {
        let mut rest: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().and_then(|e| e.to_str()) == Some("json")
                    && p.file_name().and_then(|n| n.to_str()) != Some(PREFERRED_FILE)
            })
            .collect();
        rest.sort();
        candidates.extend(rest);
    }
    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match read_numeric_fields(&path) {
            Some(found) if !found.is_empty() => return Some(found),
            _ => {}
        }
    }
    None
}

fn read_numeric_fields(path: &Path) -> Option<BTreeMap<String, f64>> {
    let bytes = std::fs::read(path).ok()?;
    let doc: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(err) => {
            debug!(path = %path.display(), %err, "skipping unparseable results file");
            return None;
        }
    };
    let object = doc.as_object()?;
    let mut found = BTreeMap::new();
    for (key, value) in object {
        if let Some(n) = value.as_f64() {
            found.insert(key.clone(), n);
        } else if key == "metrics" {
            if let Some(nested) = value.as_object() {
                for (nested_key, nested_value) in nested {
                    if let Some(n) = nested_value.as_f64() {
                        found.insert(nested_key.clone(), n);
                    }
                }
            }
        }
    }
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_top_level_and_metrics_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("results.json"),
            r#"{"accuracy": 0.93, "notes": "ok", "metrics": {"loss": 0.12}}"#,
        )
        .unwrap();
        let found = scan_resource_root(dir.path()).unwrap();
        assert_eq!(found.get("accuracy"), Some(&0.93));
        assert_eq!(found.get("loss"), Some(&0.12));
        assert!(!found.contains_key("notes"));
    }

    #[test]
    fn malformed_json_is_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("results.json"), "{ not json").unwrap();
        assert!(scan_resource_root(dir.path()).is_none());
    }
}
