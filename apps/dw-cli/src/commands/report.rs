// report.rs — `dw report {status|history|results|lineage}`.

use clap::Subcommand;

use dw_engine::{EngineError, Workspace};
use dw_lineage::LineageStore;

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Same as `dw status`.
    Status,
    /// Snapshot history, newest first.
    History {
        /// Show at most this many entries.
        #[arg(short, default_value = "20")]
        n: usize,
    },
    /// Metrics recorded from results resources, newest first.
    Results {
        #[arg(short, default_value = "20")]
        n: usize,
    },
    /// The frozen lineage of one snapshot.
    Lineage {
        /// Tag or hash prefix of the snapshot.
        #[arg(long)]
        snapshot: String,
    },
}

pub fn run(ws: &Workspace, report: ReportCommands) -> Result<(), EngineError> {
    match report {
        ReportCommands::Status => super::status::run(ws),
        ReportCommands::History { n } => history(ws, n),
        ReportCommands::Results { n } => results(ws, n),
        ReportCommands::Lineage { snapshot } => lineage(ws, &snapshot),
    }
}

fn history(ws: &Workspace, n: usize) -> Result<(), EngineError> {
    let history = ws.history()?;
    if history.is_empty() {
        println!("No snapshots yet.");
        return Ok(());
    }
    for entry in history.newest_first().take(n) {
        let tags = if entry.tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", entry.tags.join(", "))
        };
        println!(
            "{}{}  {}  {}  #{}",
            &entry.hash[..12],
            tags,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.hostname,
            entry.snapshot_no,
        );
        if !entry.message.is_empty() {
            println!("    {}", entry.message);
        }
    }
    Ok(())
}

fn results(ws: &Workspace, n: usize) -> Result<(), EngineError> {
    let history = ws.history()?;
    let with_metrics: Vec<_> = history
        .newest_first()
        .filter(|e| !e.metrics.is_empty())
        .take(n)
        .collect();
    if with_metrics.is_empty() {
        println!("No recorded metrics.");
        return Ok(());
    }
    for entry in with_metrics {
        let tags = if entry.tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", entry.tags.join(", "))
        };
        println!("{}{}", &entry.hash[..12], tags);
        for (key, value) in &entry.metrics {
            println!("    {:<24} {}", key, value);
        }
    }
    Ok(())
}

fn lineage(ws: &Workspace, reference: &str) -> Result<(), EngineError> {
    let history = ws.history()?;
    let hash = history.resolve_ref(reference)?.hash.clone();
    let store = LineageStore::load(&ws.layout().snapshot_lineage_dir(&hash))?;
    if store.is_empty() {
        println!("Snapshot {} has no recorded lineage.", &hash[..12]);
        return Ok(());
    }
    println!("Lineage of snapshot {}:", &hash[..12]);
    for record in store.steps() {
        let duration = record
            .duration_secs
            .map(|d| format!(" ({:.1}s)", d))
            .unwrap_or_default();
        println!(
            "  step {}  started {}{}",
            record.key(),
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            duration
        );
        for input in &record.inputs {
            println!(
                "    in:  {}  [{}]",
                input.reference,
                input.certificate.describe()
            );
        }
        for output in &record.outputs {
            println!("    out: {}", output);
        }
        if !record.parameters.is_empty() {
            let params: Vec<String> = record
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!("    params: {}", params.join(", "));
        }
    }
    for source in store.sources() {
        println!(
            "  source {}  version {}",
            source.reference,
            &source.hash[..source.hash.len().min(12)]
        );
    }
    Ok(())
}
