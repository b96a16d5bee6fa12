use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};

use crate::error::ReviewError;

/// Which part of the change set a diff covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffScope {
    /// Everything, minus the given pathspecs.
    Whole { exclude: Vec<String> },
    /// A single repo-relative path.
    File(String),
}

/// The version-control operations a review run needs.
pub trait SourceControl {
    fn root(&self) -> &Path;

    /// Short name of the checked-out branch; `None` when detached or unknown.
    fn current_branch(&self) -> Option<String>;

    fn branch_exists(&self, name: &str) -> bool;

    /// True when tracked files carry no uncommitted changes.
    fn is_clean(&self) -> Result<bool>;

    /// Updates `target` from its remote and merges it into `active`.
    fn sync(&self, target: &str, active: &str) -> Result<()>;

    fn diff(&self, branch: &str, scope: &DiffScope) -> Result<String>;

    fn changed_files(&self, branch: &str) -> Result<Vec<String>>;
}

/// Walks upward from `start` looking for a `.git` marker.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = std::fs::canonicalize(start).ok()?;
    start
        .ancestors()
        .find(|dir| {
            let marker = dir.join(".git");
            marker.is_dir() || marker.is_file()
        })
        .map(Path::to_path_buf)
}

/// Splits `--name-only` output; NUL-separated when `-z` was given, else line-separated.
pub fn parse_name_only(stdout: &str) -> Vec<String> {
    let entries: Vec<&str> = if stdout.contains('\0') {
        stdout.split('\0').collect()
    } else {
        stdout.lines().map(|l| l.trim_end_matches('\r')).collect()
    };
    entries
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// `SourceControl` backed by the `git` executable.
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    fn git_cmd(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir);
        cmd
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        log::debug!("git {}", args.join(" "));
        self.git_cmd()
            .args(args)
            .output()
            .with_context(|| format!("run git {}", args.first().copied().unwrap_or_default()))
    }

    /// Runs git and returns stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String> {
        let out = self.output(args)?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).to_string());
        }
        Err(ReviewError::Git {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }
        .into())
    }

    fn diff_args<'a>(branch: &'a str, extra: &'a [&'a str]) -> Vec<&'a str> {
        let mut args = vec![
            "--no-pager",
            "-c",
            "color.ui=false",
            "-c",
            "core.quotePath=false",
            "diff",
            "--no-ext-diff",
        ];
        args.extend_from_slice(extra);
        args.push(branch);
        args
    }
}

impl SourceControl for GitCli {
    fn root(&self) -> &Path {
        &self.workdir
    }

    fn current_branch(&self) -> Option<String> {
        let out = match self.output(&["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(out) => out,
            Err(err) => {
                log::warn!("detect active branch: {err:#}");
                return None;
            }
        };
        if !out.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
        // Detached HEAD reports the literal "HEAD".
        if name.is_empty() || name == "HEAD" {
            return None;
        }
        Some(name)
    }

    fn branch_exists(&self, name: &str) -> bool {
        let reference = format!("refs/heads/{name}");
        match self.output(&["show-ref", "--verify", "--quiet", &reference]) {
            Ok(out) => out.status.success(),
            Err(err) => {
                log::warn!("check branch {name}: {err:#}");
                false
            }
        }
    }

    fn is_clean(&self) -> Result<bool> {
        let status = self.run(&["status", "--porcelain", "--untracked-files=no"])?;
        Ok(status.trim().is_empty())
    }

    fn sync(&self, target: &str, active: &str) -> Result<()> {
        self.run(&["checkout", target])?;
        self.run(&["pull"])?;
        self.run(&["checkout", active])?;
        self.run(&["merge", "--no-edit", target])?;
        Ok(())
    }

    fn diff(&self, branch: &str, scope: &DiffScope) -> Result<String> {
        let pathspecs: Vec<String> = match scope {
            DiffScope::Whole { exclude } => exclude
                .iter()
                .map(|p| format!(":(exclude,literal){p}"))
                .collect(),
            DiffScope::File(path) => vec![format!(":(literal){path}")],
        };
        let mut args = Self::diff_args(branch, &[]);
        args.push("--");
        args.extend(pathspecs.iter().map(String::as_str));
        self.run(&args)
    }

    fn changed_files(&self, branch: &str) -> Result<Vec<String>> {
        let args = Self::diff_args(branch, &["--name-only", "-z"]);
        Ok(parse_name_only(&self.run(&args)?))
    }
}
