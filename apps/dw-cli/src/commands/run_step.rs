// run_step.rs — `dw run <cmd…>`: execute a pipeline step with lineage.
//
// Inputs and outputs are inferred from the argv: every argument that
// resolves to a path under a known resource becomes a lineage reference.
// Paths that exist before the command runs are inputs; paths that exist
// afterwards with new or changed content are outputs. The executable
// itself becomes the code reference when it lives under a resource.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::debug;

use dw_engine::{EngineError, Workspace};
use dw_hashtree::hash_file;
use dw_lineage::LineageRef;

pub fn run(
    ws: &mut Workspace,
    argv: &[String],
    step_name: Option<String>,
) -> Result<i32, EngineError> {
    let program = &argv[0];
    let step_name = step_name.unwrap_or_else(|| {
        Path::new(program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| program.clone())
    });

    // Resolve argv tokens against resource paths.
    let code = ws.map_path_to_ref(Path::new(program));
    let mut inputs: Vec<LineageRef> = Vec::new();
    let mut candidates: Vec<(PathBuf, LineageRef, Option<String>)> = Vec::new();
    for token in &argv[1..] {
        let path = PathBuf::from(token);
        let Some(reference) = ws.map_path_to_ref(&path) else {
            continue;
        };
        let pre_hash = if path.is_file() {
            hash_file(&path).ok()
        } else {
            None
        };
        if path.exists() {
            inputs.push(reference.clone());
        }
        candidates.push((path, reference, pre_hash));
    }
    debug!(step = %step_name, inputs = inputs.len(), "inferred step inputs");

    // Source-data versions are captured before the step runs.
    let mut versions: BTreeMap<LineageRef, String> = BTreeMap::new();
    for reference in &inputs {
        let version = ws.resource_version(reference)?;
        versions.insert(reference.clone(), version);
    }
    let mut parameters = BTreeMap::new();
    parameters.insert("argv".to_string(), serde_json::json!(argv));

    let started_at = Utc::now();
    let token = ws
        .lineage()
        .begin_step(&step_name, started_at, parameters, &inputs, code, |r| {
            versions
                .get(r)
                .cloned()
                .ok_or_else(|| "resource version not captured before the step".to_string())
        })
        .map_err(EngineError::from)?;

    let status = Command::new(program).args(&argv[1..]).status();
    let code = match status {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            ws.lineage().abort_step(token);
            return Err(EngineError::System {
                message: format!("cannot run {}: {}", program, e),
            });
        }
    };
    if code != 0 {
        ws.lineage().abort_step(token);
        eprintln!("step '{}' exited with {}; lineage not recorded", step_name, code);
        return Ok(code);
    }

    // Outputs: resource paths whose content is new or changed.
    let mut outputs = Vec::new();
    for (path, reference, pre_hash) in candidates {
        if !path.exists() {
            continue;
        }
        let changed = if path.is_file() {
            match (pre_hash, hash_file(&path).ok()) {
                (Some(before), Some(after)) => before != after,
                (None, _) => true, // did not exist before
                (_, None) => false,
            }
        } else {
            // Directories: treat as outputs only when they are new.
            pre_hash.is_none() && !inputs.contains(&reference)
        };
        if changed && !outputs.contains(&reference) {
            outputs.push(reference);
        }
    }
    let completed_at = Utc::now();
    let key = ws
        .lineage()
        .end_step(token, outputs, BTreeMap::new(), completed_at)
        .map_err(EngineError::from)?;
    ws.save_lineage()?;
    println!("Recorded step {}", key);
    Ok(0)
}
