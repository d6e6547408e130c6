// diff.rs — `dw diff <ref> <ref>` output.

use dw_engine::{diff, EngineError, Workspace};

pub fn run(ws: &Workspace, from: &str, to: &str) -> Result<(), EngineError> {
    let report = diff::run(ws, from, to)?;
    println!(
        "Comparing {} .. {}",
        &report.from[..12],
        &report.to[..12]
    );
    let mut any = false;
    for resource in &report.resources {
        if !resource.changed {
            continue;
        }
        any = true;
        println!("  {}:", resource.name);
        if let Some(note) = &resource.note {
            println!("    {}", note);
        }
        if let Some(paths) = &resource.paths {
            for path in paths {
                println!("    {}", path);
            }
        }
    }
    if !any {
        println!("  no differences");
    }
    Ok(())
}
