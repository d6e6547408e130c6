// config.rs — `dw config {get|set}` over workspace-global parameters.
//
// `results_dir_template` is addressable like any parameter; everything
// else lands in the free-form global parameter map captured into every
// snapshot manifest.

use clap::Subcommand;

use dw_engine::{template, EngineError, Workspace};

const TEMPLATE_KEY: &str = "results_dir_template";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print one parameter, or all of them.
    Get { key: Option<String> },
    /// Set a parameter (values parse as JSON, else as strings).
    Set { key: String, value: String },
}

pub fn run(ws: &mut Workspace, op: ConfigCommands) -> Result<(), EngineError> {
    match op {
        ConfigCommands::Get { key } => get(ws, key.as_deref()),
        ConfigCommands::Set { key, value } => set(ws, &key, &value),
    }
}

fn get(ws: &Workspace, key: Option<&str>) -> Result<(), EngineError> {
    let config = ws.config();
    match key {
        Some(TEMPLATE_KEY) => println!("{}", config.results_dir_template),
        Some(key) => match config.global_params.get(key) {
            Some(value) => println!("{}", value),
            None => {
                return Err(EngineError::user(format!(
                    "no parameter named '{}'",
                    key
                )))
            }
        },
        None => {
            println!("{} = {}", TEMPLATE_KEY, config.results_dir_template);
            for (key, value) in &config.global_params {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}

fn set(ws: &mut Workspace, key: &str, value: &str) -> Result<(), EngineError> {
    if key == TEMPLATE_KEY {
        template::validate_template(value)?;
        ws.config_mut().results_dir_template = value.to_string();
    } else {
        let parsed = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        ws.config_mut().global_params.insert(key.to_string(), parsed);
    }
    ws.save_config()?;
    ws.commit_metadata(&format!("Set {}", key))?;
    println!("Set {} = {}", key, value);
    Ok(())
}
