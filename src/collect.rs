use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub ignore: Vec<String>,
    pub include_hidden: bool,
    pub respect_gitignore: bool,
}

#[derive(Debug, Clone)]
struct Root {
    given: PathBuf,
    canonical: Option<PathBuf>,
}

/// The set of input paths a run is scoped to.
#[derive(Debug, Clone)]
pub struct PathScope {
    roots: Vec<Root>,
    ignore: GlobSet,
    include_hidden: bool,
    respect_gitignore: bool,
}

impl PathScope {
    pub fn new(paths: &[PathBuf], opts: &CollectOptions) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &opts.ignore {
            // fnmatch semantics: `*` crosses directory separators.
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .with_context(|| format!("invalid ignore pattern: {pattern}"))?;
            builder.add(glob);
        }
        let ignore = builder.build().context("build ignore patterns")?;

        let roots = paths
            .iter()
            .map(|p| Root {
                given: p.clone(),
                canonical: std::fs::canonicalize(p).ok(),
            })
            .collect();

        Ok(Self {
            roots,
            ignore,
            include_hidden: opts.include_hidden,
            respect_gitignore: opts.respect_gitignore,
        })
    }

    /// Walks every root and returns candidate files in traversal order.
    pub fn collect(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for root in &self.roots {
            let path = &root.given;
            if path.is_file() {
                if !self.is_ignored(path, Path::new("")) {
                    out.push(path.clone());
                }
            } else if path.is_dir() {
                self.walk_dir(path, &mut out);
            } else {
                log::debug!("skipping {}: not a file or directory", path.display());
            }
        }
        out
    }

    fn walk_dir(&self, root: &Path, out: &mut Vec<PathBuf>) {
        let prune_root = root.to_path_buf();
        let ignore = self.ignore.clone();
        let walker = WalkBuilder::new(root)
            .hidden(!self.include_hidden)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .git_global(false)
            .ignore(false)
            .parents(self.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let rel = entry.path().strip_prefix(&prune_root).unwrap_or(entry.path());
                !(ignore.is_match(entry.path()) || ignore.is_match(rel))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("walk {}: {err}", root.display());
                    continue;
                }
            };
            if entry.file_type().is_some_and(|t| t.is_file()) {
                out.push(entry.into_path());
            }
        }
    }

    /// Whether an absolute path falls inside one of the roots and survives
    /// the hidden and ignore filters.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| {
            let Some(canonical) = &root.canonical else {
                return false;
            };
            let Ok(rel) = path.strip_prefix(canonical) else {
                return false;
            };
            if !self.include_hidden && is_hidden(rel) {
                return false;
            }
            !self.is_ignored(&root.given.join(rel), rel)
        })
    }

    fn is_ignored(&self, walked: &Path, rel: &Path) -> bool {
        if self.ignore.is_empty() {
            return false;
        }
        self.ignore.is_match(walked)
            || (!rel.as_os_str().is_empty() && self.ignore.is_match(rel))
    }
}

fn is_hidden(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}
