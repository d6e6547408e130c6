// restore_cmd.rs — `dw restore <ref>` output and exit-code mapping.

use std::process::ExitCode;

use dw_engine::{restore, EngineError, Workspace};

pub fn run(ws: &mut Workspace, opts: &restore::RestoreOptions) -> Result<ExitCode, EngineError> {
    let report = restore::run(ws, opts)?;
    if let Some(preserved) = &report.preserved {
        println!(
            "Preserved uncaptured work as snapshot {}",
            &preserved[..12]
        );
    }
    println!("Restored snapshot {}", &report.hash[..12]);
    println!("  restored: {}", join_or_none(&report.restored));
    println!("  left:     {}", join_or_none(&report.left));
    if let Some(failure) = &report.failure {
        // Partial restoration is accepted but loudly surfaced: the
        // resources before the failure hold the snapshot state, the rest
        // were never touched.
        eprintln!(
            "error: restore of '{}' failed: {}",
            failure.resource, failure.message
        );
        if !report.pending.is_empty() {
            eprintln!("  never attempted: {}", join_or_none(&report.pending));
        }
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
