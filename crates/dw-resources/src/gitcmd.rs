// gitcmd.rs — Narrow subprocess runner for git.
//
// Every git invocation in the tool goes through GitRunner: stdout is
// captured and trimmed, stderr is folded into the error, and a missing
// binary becomes ToolMissing instead of a raw I/O error.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::ResourceError;

/// Runs git commands in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitRunner {
    work_dir: PathBuf,
}

impl GitRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run `git <args>`, returning trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, ResourceError> {
        debug!(dir = %self.work_dir.display(), ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ResourceError::ToolMissing {
                        tool: "git".to_string(),
                    }
                } else {
                    ResourceError::IoError {
                        path: self.work_dir.clone(),
                        source: e,
                    }
                }
            })?;
        if !output.status.success() {
            return Err(ResourceError::Subprocess {
                tool: "git".to_string(),
                args: args.join(" "),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run `git <args>` where a non-zero exit is an answer, not an error.
    fn succeeds(&self, args: &[&str]) -> Result<bool, ResourceError> {
        match self.run(args) {
            Ok(_) => Ok(true),
            Err(ResourceError::Subprocess { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    pub fn is_repo(&self) -> Result<bool, ResourceError> {
        if !self.work_dir.is_dir() {
            return Ok(false);
        }
        self.succeeds(&["rev-parse", "--git-dir"])
    }

    pub fn init(&self) -> Result<(), ResourceError> {
        self.run(&["init"]).map(|_| ())
    }

    pub fn has_commits(&self) -> Result<bool, ResourceError> {
        self.succeeds(&["rev-parse", "--verify", "-q", "HEAD"])
    }

    pub fn head_commit(&self) -> Result<String, ResourceError> {
        self.run(&["rev-parse", "HEAD"])
    }

    /// `git status --porcelain`, optionally limited to one subpath.
    pub fn status_porcelain(&self, subpath: Option<&str>) -> Result<String, ResourceError> {
        let mut args = vec!["status", "--porcelain"];
        if let Some(sub) = subpath {
            args.push("--");
            args.push(sub);
        }
        self.run(&args)
    }

    pub fn is_dirty(&self, subpath: Option<&str>) -> Result<bool, ResourceError> {
        Ok(!self.status_porcelain(subpath)?.is_empty())
    }

    /// Stage everything (optionally one subpath) and commit if anything
    /// is staged. Returns whether a commit was created.
    pub fn commit_all(&self, subpath: Option<&str>, message: &str) -> Result<bool, ResourceError> {
        match subpath {
            Some(sub) => self.run(&["add", "-A", "--", sub])?,
            None => self.run(&["add", "-A"])?,
        };
        if self.run(&["diff", "--cached", "--name-only"])?.is_empty() {
            return Ok(false);
        }
        self.run(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Stage and commit specific paths (metadata commits).
    pub fn commit_paths(&self, paths: &[&str], message: &str) -> Result<bool, ResourceError> {
        let mut add = vec!["add", "--"];
        add.extend(paths);
        self.run(&add)?;
        if self.run(&["diff", "--cached", "--name-only"])?.is_empty() {
            return Ok(false);
        }
        self.run(&["commit", "-m", message])?;
        Ok(true)
    }

    pub fn object_exists(&self, oid: &str) -> Result<bool, ResourceError> {
        self.succeeds(&["cat-file", "-e", &format!("{}^{{commit}}", oid)])
    }

    pub fn reset_hard(&self, commit: &str) -> Result<(), ResourceError> {
        self.run(&["reset", "--hard", commit]).map(|_| ())
    }

    /// Reset one subpath to its content at `commit`.
    pub fn checkout_path(&self, commit: &str, subpath: &str) -> Result<(), ResourceError> {
        self.run(&["checkout", commit, "--", subpath]).map(|_| ())
    }

    pub fn changed_paths(
        &self,
        from: &str,
        to: &str,
        subpath: Option<&str>,
    ) -> Result<Vec<String>, ResourceError> {
        let mut args = vec!["diff", "--name-only", from, to];
        if let Some(sub) = subpath {
            args.push("--");
            args.push(sub);
        }
        let out = self.run(&args)?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    pub fn fetch(&self) -> Result<(), ResourceError> {
        self.run(&["fetch"]).map(|_| ())
    }

    pub fn push(&self) -> Result<(), ResourceError> {
        self.run(&["push"]).map(|_| ())
    }

    pub fn push_initial(&self, remote: &str, branch: &str) -> Result<(), ResourceError> {
        self.run(&["push", "-u", remote, branch]).map(|_| ())
    }

    /// Fast-forward-only merge of the upstream branch; a divergence is a
    /// subprocess error the caller reports as a conflict.
    pub fn pull_ff_only(&self) -> Result<(), ResourceError> {
        self.run(&["pull", "--ff-only"]).map(|_| ())
    }

    /// How far the remote tip is ahead of (and behind) local HEAD.
    /// Requires a prior fetch.
    pub fn ahead_behind(&self, upstream: &str) -> Result<(u32, u32), ResourceError> {
        let out = self.run(&[
            "rev-list",
            "--left-right",
            "--count",
            &format!("{}...HEAD", upstream),
        ])?;
        let mut parts = out.split_whitespace();
        let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((ahead, behind))
    }

    pub fn current_branch(&self) -> Result<String, ResourceError> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn remote_url(&self, remote: &str) -> Result<Option<String>, ResourceError> {
        match self.run(&["remote", "get-url", remote]) {
            Ok(url) => Ok(Some(url)),
            Err(ResourceError::Subprocess { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), ResourceError> {
        self.run(&["remote", "add", name, url]).map(|_| ())
    }

    /// `git clone <url> <target>` run from the parent of `target`.
    pub fn clone_repo(url: &str, target: &Path) -> Result<(), ResourceError> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
        let runner = GitRunner::new(parent);
        let target_str = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        runner.run(&["clone", url, &target_str]).map(|_| ())
    }
}
