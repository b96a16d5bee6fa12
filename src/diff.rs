#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    FileHeader,
    HunkHeader,
    Context,
    Add,
    Remove,
}

/// One file's section of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub added: usize,
    pub removed: usize,
}

impl FileDiff {
    pub fn new(path: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diff: diff.into(),
        }
    }

    pub fn stats(&self) -> Stats {
        stats(&self.diff)
    }
}

pub fn classify(line: &str) -> Kind {
    if line.starts_with("@@") {
        Kind::HunkHeader
    } else if line.starts_with("+++ ")
        || line.starts_with("--- ")
        || line.starts_with("diff --git ")
        || line.starts_with("index ")
    {
        Kind::FileHeader
    } else if line.starts_with('+') {
        Kind::Add
    } else if line.starts_with('-') {
        Kind::Remove
    } else {
        Kind::Context
    }
}

pub fn stats(diff: &str) -> Stats {
    let mut out = Stats::default();
    let mut in_hunk = false;
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            in_hunk = false;
            continue;
        }
        match classify(line) {
            Kind::HunkHeader => in_hunk = true,
            // Header lines only count before the first hunk of a file.
            Kind::Add if in_hunk => out.added += 1,
            Kind::Remove if in_hunk => out.removed += 1,
            Kind::FileHeader if in_hunk && line.starts_with("+++ ") => out.added += 1,
            Kind::FileHeader if in_hunk && line.starts_with("--- ") => out.removed += 1,
            _ => {}
        }
    }
    out
}

/// Splits a combined `git diff` into per-file sections, keyed by the new path.
pub fn split_by_file(diff: &str) -> Vec<FileDiff> {
    let mut out: Vec<FileDiff> = Vec::new();
    for line in diff.split_inclusive('\n') {
        if let Some(header) = line.strip_prefix("diff --git ") {
            out.push(FileDiff::new(header_path(header.trim_end()), String::new()));
        }
        if let Some(current) = out.last_mut() {
            current.diff.push_str(line);
        }
    }
    out
}

fn header_path(header: &str) -> String {
    // `a/<old> b/<new>`; paths with spaces make the split ambiguous, so
    // prefer the last ` b/` occurrence.
    if let Some(idx) = header.rfind(" b/") {
        return header[idx + 3..].trim_matches('"').to_string();
    }
    header
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .trim_start_matches("b/")
        .to_string()
}
