// store.rs — The working lineage store and its persistence.
//
// Vertices: a map ref → certificate (the current provenance of every
// known artefact). Hyperedges: step records keyed by `name#invocation`.
// Superseded step records stay in the table — an overwritten output just
// stops pointing at them — so closure walks from older certificates still
// resolve.
//
// The store is one JSON document under `current_lineage/`; snapshot
// freezing copies it into `snapshot_lineage/<hash>/` after resolving step
// certificates to the resource-version hashes captured by the snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dw_workspace::store as ws_store;

use crate::error::LineageError;
use crate::records::{step_key, InputCert, SourceDataRecord, StepRecord};
use crate::refs::{Certificate, LineageRef};

const STORE_FILE: &str = "store.json";

/// Handle to a step opened with [`LineageStore::begin_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepToken(Uuid);

#[derive(Debug, Clone)]
struct PendingStep {
    name: String,
    started_at: DateTime<Utc>,
    parameters: BTreeMap<String, serde_json::Value>,
    inputs: Vec<InputCert>,
    code: Option<LineageRef>,
}

/// The lineage working set.
#[derive(Debug, Default)]
pub struct LineageStore {
    certs: BTreeMap<LineageRef, Certificate>,
    steps: BTreeMap<String, StepRecord>,
    sources: BTreeMap<LineageRef, SourceDataRecord>,
    invocations: BTreeMap<String, u32>,
    open: HashMap<Uuid, PendingStep>,
}

/// On-disk shape. Maps keyed by struct refs become entry lists in JSON.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDoc {
    certs: Vec<CertEntry>,
    steps: Vec<StepRecord>,
    sources: Vec<SourceDataRecord>,
    invocations: BTreeMap<String, u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CertEntry {
    reference: LineageRef,
    certificate: Certificate,
}

impl LineageStore {
    /// Load the store from a lineage directory; an absent document is an
    /// empty working set.
    pub fn load(dir: &Path) -> Result<Self, LineageError> {
        let path = dir.join(STORE_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let doc: StoreDoc = ws_store::read_json(&path)?;
        let mut store = Self::default();
        for entry in doc.certs {
            store.certs.insert(entry.reference, entry.certificate);
        }
        for record in doc.steps {
            store.steps.insert(record.key(), record);
        }
        for source in doc.sources {
            store.sources.insert(source.reference.clone(), source);
        }
        store.invocations = doc.invocations;
        Ok(store)
    }

    pub fn save(&self, dir: &Path) -> Result<(), LineageError> {
        let doc = StoreDoc {
            certs: self
                .certs
                .iter()
                .map(|(reference, certificate)| CertEntry {
                    reference: reference.clone(),
                    certificate: certificate.clone(),
                })
                .collect(),
            steps: self.steps.values().cloned().collect(),
            sources: self.sources.values().cloned().collect(),
            invocations: self.invocations.clone(),
        };
        ws_store::write_json_atomic(&dir.join(STORE_FILE), &doc)?;
        Ok(())
    }

    /// Drop the whole working set (restore and pull invalidate it).
    pub fn clear(&mut self) {
        self.certs.clear();
        self.steps.clear();
        self.sources.clear();
        self.invocations.clear();
        self.open.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty() && self.steps.is_empty() && self.sources.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.values()
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceDataRecord> {
        self.sources.values()
    }

    pub fn certificate_for(&self, reference: &LineageRef) -> Option<&Certificate> {
        self.certs.get(reference)
    }

    /// Open a step. Resolves each input to its current certificate
    /// (capturing source data via `resolve_version` for refs nothing has
    /// produced), then validates the transitive input closure.
    pub fn begin_step<F>(
        &mut self,
        name: &str,
        started_at: DateTime<Utc>,
        parameters: BTreeMap<String, serde_json::Value>,
        inputs: &[LineageRef],
        code: Option<LineageRef>,
        mut resolve_version: F,
    ) -> Result<StepToken, LineageError>
    where
        F: FnMut(&LineageRef) -> Result<String, String>,
    {
        let mut input_certs = Vec::with_capacity(inputs.len());
        for reference in inputs {
            let certificate = self.input_certificate(reference, &mut resolve_version)?;
            input_certs.push(InputCert {
                reference: reference.clone(),
                certificate,
            });
        }
        self.check_consistency(&input_certs)?;

        let token = Uuid::new_v4();
        self.open.insert(
            token,
            PendingStep {
                name: name.to_string(),
                started_at,
                parameters,
                inputs: input_certs,
                code,
            },
        );
        Ok(StepToken(token))
    }

    /// Close a step: validate its outputs, assign the next invocation
    /// number, record it, and point every output's certificate at it.
    /// Returns the step-record key.
    pub fn end_step(
        &mut self,
        token: StepToken,
        outputs: Vec<LineageRef>,
        metrics: BTreeMap<String, f64>,
        completed_at: DateTime<Utc>,
    ) -> Result<String, LineageError> {
        let pending = self
            .open
            .remove(&token.0)
            .ok_or(LineageError::UnknownStepToken)?;

        // Outputs of one step may not overlap each other...
        for (i, a) in outputs.iter().enumerate() {
            for b in &outputs[i + 1..] {
                if a.overlaps(b) {
                    return Err(subpath_conflict(a, b));
                }
            }
        }
        // ...nor sit inside (or around) a different artefact someone else
        // produced. An exact match is the normal overwrite case.
        for output in &outputs {
            for existing in self.certs.keys() {
                if existing != output && existing.overlaps(output) {
                    return Err(subpath_conflict(existing, output));
                }
            }
        }

        let invocation = self
            .invocations
            .get(pending.name.as_str())
            .copied()
            .unwrap_or(0)
            + 1;
        self.invocations.insert(pending.name.clone(), invocation);

        let duration_secs = (completed_at - pending.started_at)
            .to_std()
            .ok()
            .map(|d| d.as_secs_f64());
        let record = StepRecord {
            name: pending.name.clone(),
            invocation,
            started_at: pending.started_at,
            duration_secs,
            parameters: pending.parameters,
            inputs: pending.inputs,
            outputs: outputs.clone(),
            metrics,
            code: pending.code,
        };
        let key = record.key();
        for output in outputs {
            self.certs.insert(
                output,
                Certificate::Step {
                    step: pending.name.clone(),
                    invocation,
                },
            );
        }
        self.steps.insert(key.clone(), record);
        Ok(key)
    }

    /// Abandon a step opened with `begin_step` (e.g. the command failed).
    pub fn abort_step(&mut self, token: StepToken) {
        self.open.remove(&token.0);
    }

    /// Resolve step certificates to the resource-version hashes a
    /// snapshot just captured. Called on the working set right before
    /// freezing, so frozen lineage carries real versions.
    pub fn materialize(&mut self, resource_hashes: &BTreeMap<String, String>) {
        for (reference, certificate) in self.certs.iter_mut() {
            let resolved = match certificate {
                Certificate::Step { step, invocation } => {
                    resource_hashes
                        .get(&reference.resource)
                        .map(|hash| Certificate::Hash {
                            hash: hash.clone(),
                            produced_by: Some(step_key(step, *invocation)),
                        })
                }
                Certificate::Hash { .. } => None,
            };
            if let Some(resolved) = resolved {
                *certificate = resolved;
            }
        }
    }

    fn input_certificate<F>(
        &mut self,
        reference: &LineageRef,
        resolve_version: &mut F,
    ) -> Result<Certificate, LineageError>
    where
        F: FnMut(&LineageRef) -> Result<String, String>,
    {
        // Exact match first.
        if let Some(cert) = self.certs.get(reference).cloned() {
            if let Certificate::Hash {
                ref hash,
                produced_by: None,
            } = cert
            {
                // Plain source data: re-check the live version, since the
                // user may have changed it outside the tool.
                let current = self.capture_version(reference, resolve_version)?;
                if &current != hash {
                    let refreshed = Certificate::source(current.clone());
                    self.record_source(reference, current);
                    return Ok(refreshed);
                }
            }
            return Ok(cert);
        }
        // A produced artefact that contains (or is contained by) the
        // requested path certifies it.
        if let Some((_, cert)) = self
            .certs
            .iter()
            .find(|(existing, _)| existing.overlaps(reference))
        {
            return Ok(cert.clone());
        }
        // Nobody produced it: capture it as source data.
        let hash = self.capture_version(reference, resolve_version)?;
        self.record_source(reference, hash.clone());
        Ok(Certificate::source(hash))
    }

    fn capture_version<F>(
        &self,
        reference: &LineageRef,
        resolve_version: &mut F,
    ) -> Result<String, LineageError>
    where
        F: FnMut(&LineageRef) -> Result<String, String>,
    {
        resolve_version(reference).map_err(|message| LineageError::SourceCapture {
            reference: reference.clone(),
            message,
        })
    }

    fn record_source(&mut self, reference: &LineageRef, hash: String) {
        self.certs
            .insert(reference.clone(), Certificate::source(hash.clone()));
        self.sources.insert(
            reference.clone(),
            SourceDataRecord {
                reference: reference.clone(),
                hash,
                captured_at: Utc::now(),
            },
        );
    }

    /// Walk the transitive input closure and refuse if two reachable
    /// certificates pin different versions of the same reference.
    fn check_consistency(&self, inputs: &[InputCert]) -> Result<(), LineageError> {
        let mut seen: BTreeMap<LineageRef, Certificate> = BTreeMap::new();
        let mut worklist: Vec<InputCert> = inputs.to_vec();
        while let Some(item) = worklist.pop() {
            if let Some(existing) = seen.get(&item.reference) {
                if !existing.same_version(&item.certificate) {
                    return Err(LineageError::InconsistentLineage {
                        reference: item.reference,
                        first: existing.describe(),
                        second: item.certificate.describe(),
                    });
                }
                continue;
            }
            seen.insert(item.reference.clone(), item.certificate.clone());
            if let Some(key) = item.certificate.step_key() {
                let record =
                    self.steps
                        .get(&key)
                        .ok_or_else(|| LineageError::MissingStepRecord {
                            key: key.clone(),
                        })?;
                worklist.extend(record.inputs.iter().cloned());
            }
        }
        Ok(())
    }
}

fn subpath_conflict(a: &LineageRef, b: &LineageRef) -> LineageError {
    LineageError::SubpathConflict {
        resource: a.resource.clone(),
        a: a.subpath.clone().unwrap_or_else(|| "/".to_string()),
        b: b.subpath.clone().unwrap_or_else(|| "/".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_version(hash: &str) -> impl FnMut(&LineageRef) -> Result<String, String> {
        let hash = hash.to_string();
        move |_| Ok(hash.clone())
    }

    fn run_step(
        store: &mut LineageStore,
        name: &str,
        inputs: &[LineageRef],
        outputs: &[LineageRef],
        version: &str,
    ) -> Result<String, LineageError> {
        let token = store.begin_step(
            name,
            Utc::now(),
            BTreeMap::new(),
            inputs,
            Some(LineageRef::subpath("code", format!("{}.py", name))),
            fixed_version(version),
        )?;
        store.end_step(token, outputs.to_vec(), BTreeMap::new(), Utc::now())
    }

    #[test]
    fn chain_records_steps_and_sources() {
        let mut store = LineageStore::default();
        let data = LineageRef::resource("data");
        let mid = LineageRef::resource("mid");
        let fin = LineageRef::resource("final");

        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "aaaa").unwrap();
        run_step(&mut store, "s2", &[mid.clone()], &[fin.clone()], "aaaa").unwrap();

        assert_eq!(store.steps().count(), 2);
        assert_eq!(store.sources().count(), 1);
        assert!(matches!(
            store.certificate_for(&fin),
            Some(Certificate::Step { step, invocation: 1 }) if step == "s2"
        ));
        // The source capture for `data` holds the resolved version.
        assert_eq!(store.sources().next().unwrap().hash, "aaaa");
    }

    #[test]
    fn inconsistent_closure_is_refused_naming_both_steps() {
        let mut store = LineageStore::default();
        let data = LineageRef::resource("data");
        let mid = LineageRef::resource("mid");
        let side = LineageRef::resource("side");

        // s1 reads data@aaaa and writes mid; a sibling step captures the
        // same generation into `side`.
        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "aaaa").unwrap();
        run_step(&mut store, "keep", &[mid.clone()], &[side.clone()], "aaaa").unwrap();

        // The upstream data changes and s1 re-runs: mid now derives from
        // data@bbbb, while side still derives from mid#1 -> data@aaaa.
        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "bbbb").unwrap();

        let err = run_step(&mut store, "s2", &[mid.clone(), side.clone()], &[], "bbbb")
            .expect_err("closure mixes two generations");
        match err {
            LineageError::InconsistentLineage { reference, first, second } => {
                assert_eq!(reference.resource, "mid");
                let pair = format!("{} / {}", first, second);
                assert!(pair.contains("s1#1") && pair.contains("s1#2"), "{}", pair);
            }
            other => panic!("expected InconsistentLineage, got {other}"),
        }
    }

    #[test]
    fn output_overwrite_keeps_historical_record() {
        let mut store = LineageStore::default();
        let data = LineageRef::resource("data");
        let mid = LineageRef::resource("mid");

        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "aaaa").unwrap();
        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "aaaa").unwrap();

        // Two invocations recorded; the live certificate points at #2.
        assert_eq!(store.steps().count(), 2);
        assert!(matches!(
            store.certificate_for(&mid),
            Some(Certificate::Step { invocation: 2, .. })
        ));
    }

    #[test]
    fn overlapping_outputs_are_refused() {
        let mut store = LineageStore::default();
        let token = store
            .begin_step(
                "s",
                Utc::now(),
                BTreeMap::new(),
                &[],
                None,
                fixed_version("x"),
            )
            .unwrap();
        let err = store
            .end_step(
                token,
                vec![
                    LineageRef::subpath("out", "a"),
                    LineageRef::subpath("out", "a/b"),
                ],
                BTreeMap::new(),
                Utc::now(),
            )
            .expect_err("nested outputs");
        assert!(matches!(err, LineageError::SubpathConflict { .. }));
    }

    #[test]
    fn materialize_resolves_step_certs_and_closure_still_walks() {
        let mut store = LineageStore::default();
        let data = LineageRef::resource("data");
        let mid = LineageRef::resource("mid");

        run_step(&mut store, "s1", &[data.clone()], &[mid.clone()], "aaaa").unwrap();

        let mut hashes = BTreeMap::new();
        hashes.insert("mid".to_string(), "f".repeat(40));
        store.materialize(&hashes);

        match store.certificate_for(&mid) {
            Some(Certificate::Hash { hash, produced_by }) => {
                assert_eq!(hash, &"f".repeat(40));
                assert_eq!(produced_by.as_deref(), Some("s1#1"));
            }
            other => panic!("expected resolved hash cert, got {other:?}"),
        }
        // A later step reading `mid` still closure-checks through s1#1.
        run_step(&mut store, "s2", &[mid.clone()], &[], "aaaa").unwrap();
    }

    #[test]
    fn save_load_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LineageStore::default();
        let data = LineageRef::resource("data");
        let mid = LineageRef::resource("mid");
        run_step(&mut store, "s1", &[data], &[mid.clone()], "aaaa").unwrap();

        store.save(dir.path()).unwrap();
        let loaded = LineageStore::load(dir.path()).unwrap();
        assert_eq!(loaded.steps().count(), 1);
        assert_eq!(loaded.sources().count(), 1);
        assert!(loaded.certificate_for(&mid).is_some());

        let mut cleared = loaded;
        cleared.clear();
        assert!(cleared.is_empty());
    }
}
