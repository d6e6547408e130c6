// status.rs — `dw status` output.

use dw_engine::{status, EngineError, Workspace};

pub fn run(ws: &Workspace) -> Result<(), EngineError> {
    let report = status::report(ws)?;
    println!("Workspace '{}' on {}", report.workspace, report.hostname);
    match &report.latest {
        Some(latest) => {
            let tags = if latest.tags.is_empty() {
                String::new()
            } else {
                format!(" ({})", latest.tags.join(", "))
            };
            println!(
                "Latest snapshot: {}{} taken {}",
                &latest.hash[..12],
                tags,
                latest.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
        None => println!("No snapshots yet."),
    }
    if report.lineage_steps > 0 {
        println!("Working lineage: {} step(s) recorded", report.lineage_steps);
    }
    println!();
    for resource in &report.resources {
        let state = match (&resource.note, resource.dirty) {
            (Some(note), _) => format!("unavailable ({})", note),
            (None, Some(true)) => "dirty".to_string(),
            (None, Some(false)) => match resource.matches_latest {
                Some(true) => "clean, matches latest snapshot".to_string(),
                Some(false) => "clean, differs from latest snapshot".to_string(),
                None => "clean".to_string(),
            },
            (None, None) => "unknown".to_string(),
        };
        let ro = if resource.read_only { ", read-only" } else { "" };
        println!(
            "  {:<20} {:<18} [{}{}] {}",
            resource.name, resource.role, resource.kind, ro, state
        );
        if let Some(path) = &resource.path {
            println!("  {:<20} at {}", "", path);
        }
    }
    Ok(())
}
