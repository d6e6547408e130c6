// records.rs — Step and source-data records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::refs::{Certificate, LineageRef};

/// Key of a step record in the store: one entry per invocation, so
/// superseded generations stay around for closure walks.
pub fn step_key(name: &str, invocation: u32) -> String {
    format!("{}#{}", name, invocation)
}

/// An input as the step saw it: the reference plus the certificate that
/// was current when the step began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCert {
    pub reference: LineageRef,
    pub certificate: Certificate,
}

/// Metadata about one executed pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub invocation: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub inputs: Vec<InputCert>,
    pub outputs: Vec<LineageRef>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// The script or notebook that ran the step, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<LineageRef>,
}

impl StepRecord {
    pub fn key(&self) -> String {
        step_key(&self.name, self.invocation)
    }
}

/// A source-data capture: the resource-version hash seen when a step
/// first read a reference nobody had produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDataRecord {
    pub reference: LineageRef,
    pub hash: String,
    pub captured_at: DateTime<Utc>,
}
