// refs.rs — Lineage references and certificates.

use serde::{Deserialize, Serialize};

/// A logical artefact: a resource, or a subtree of one.
///
/// Equality is by (resource, subpath) pair; ordering makes refs usable as
/// sorted map keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineageRef {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

impl LineageRef {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            subpath: None,
        }
    }

    pub fn subpath(resource: impl Into<String>, subpath: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            subpath: Some(subpath.into()),
        }
    }

    /// True if the two refs name the same resource and their paths
    /// overlap: same path, or one contains the other (the resource root
    /// contains every subpath).
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.resource != other.resource {
            return false;
        }
        match (&self.subpath, &other.subpath) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => {
                a == b
                    || a.starts_with(&format!("{}/", b))
                    || b.starts_with(&format!("{}/", a))
            }
        }
    }
}

impl std::fmt::Display for LineageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subpath {
            Some(sub) => write!(f, "{}/{}", self.resource, sub),
            None => f.write_str(&self.resource),
        }
    }
}

/// A reference's current provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cert_type", rename_all = "snake_case")]
pub enum Certificate {
    /// A resource-version hash. `produced_by` survives snapshot
    /// materialisation so the closure walk can still reach the step
    /// record behind a resolved certificate.
    Hash {
        hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        produced_by: Option<String>,
    },
    /// An output of a recorded step, not yet resolved to a hash.
    Step { step: String, invocation: u32 },
}

impl Certificate {
    pub fn source(hash: impl Into<String>) -> Self {
        Certificate::Hash {
            hash: hash.into(),
            produced_by: None,
        }
    }

    /// The step-record key behind this certificate, if any.
    pub fn step_key(&self) -> Option<String> {
        match self {
            Certificate::Hash { produced_by, .. } => produced_by.clone(),
            Certificate::Step { step, invocation } => {
                Some(crate::records::step_key(step, *invocation))
            }
        }
    }

    /// Do two certificates for the same reference denote the same
    /// version? Producer identity wins when both sides have one; pure
    /// hash certificates compare by hash.
    pub fn same_version(&self, other: &Self) -> bool {
        match (self.step_key(), other.step_key()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => match (self, other) {
                (Certificate::Hash { hash: a, .. }, Certificate::Hash { hash: b, .. }) => a == b,
                _ => false,
            },
            _ => false,
        }
    }

    /// Human description used in inconsistency reports.
    pub fn describe(&self) -> String {
        match self {
            Certificate::Hash {
                hash,
                produced_by: Some(key),
            } => format!("step {} (version {})", key, &hash[..hash.len().min(8)]),
            Certificate::Hash { hash, .. } => {
                format!("source data at version {}", &hash[..hash.len().min(8)])
            }
            Certificate::Step { step, invocation } => {
                format!("step {}", crate::records::step_key(step, *invocation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_overlap_rules() {
        let root = LineageRef::resource("data");
        let a = LineageRef::subpath("data", "raw");
        let nested = LineageRef::subpath("data", "raw/2019");
        let sibling = LineageRef::subpath("data", "rawhide");
        let other = LineageRef::resource("other");

        assert!(root.overlaps(&a));
        assert!(a.overlaps(&nested));
        assert!(!a.overlaps(&sibling)); // prefix of the string, not the path
        assert!(!a.overlaps(&other));
    }

    #[test]
    fn certificate_version_comparison() {
        let s1 = Certificate::Step {
            step: "train".into(),
            invocation: 1,
        };
        let s2 = Certificate::Step {
            step: "train".into(),
            invocation: 2,
        };
        let resolved_s1 = Certificate::Hash {
            hash: "a".repeat(40),
            produced_by: Some("train#1".into()),
        };
        assert!(!s1.same_version(&s2));
        assert!(s1.same_version(&resolved_s1));
        assert!(!s2.same_version(&resolved_s1));

        let src_a = Certificate::source("a".repeat(40));
        let src_b = Certificate::source("b".repeat(40));
        assert!(src_a.same_version(&src_a.clone()));
        assert!(!src_a.same_version(&src_b));
    }
}
