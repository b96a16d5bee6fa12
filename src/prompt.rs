use crate::diff::{FileDiff, split_by_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
  #[default]
  Plain,
  /// Claude-style `<documents>` XML.
  Cxml,
}

/// What a single review request covers.
#[derive(Debug, Clone)]
pub enum ReviewTarget {
  File { branch: String, file: FileDiff },
  ChangeSet {
    branch: String,
    files: Vec<String>,
    diff: String,
  },
}

impl ReviewTarget {
  pub fn label(&self) -> String {
    match self {
      ReviewTarget::File { file, .. } => file.path.clone(),
      ReviewTarget::ChangeSet { files, .. } => format!("{} changed file(s)", files.len()),
    }
  }

  pub fn diff_text(&self) -> &str {
    match self {
      ReviewTarget::File { file, .. } => &file.diff,
      ReviewTarget::ChangeSet { diff, .. } => diff,
    }
  }
}

pub fn render(target: &ReviewTarget, layout: Layout) -> String {
  match layout {
    Layout::Plain => render_plain(target),
    Layout::Cxml => {
      let documents = match target {
        ReviewTarget::File { file, .. } => vec![file.clone()],
        ReviewTarget::ChangeSet { diff, .. } => split_by_file(diff),
      };
      render_cxml(&documents)
    }
  }
}

fn render_plain(target: &ReviewTarget) -> String {
  match target {
    ReviewTarget::File { branch, file } => format!(
      "# INPUT\n$> git --no-pager diff {branch} {path}\n\n{diff}\n\nFile being reviewed: {path}",
      path = file.path,
      diff = file.diff,
    ),
    ReviewTarget::ChangeSet {
      branch,
      files,
      diff,
    } => format!(
      "# INPUT\n$> git --no-pager diff {branch}\n\n{diff}\n\nFiles being reviewed: {}",
      files.join(", "),
    ),
  }
}

fn render_cxml(documents: &[FileDiff]) -> String {
  let mut out = String::from("<documents>\n");
  for (i, doc) in documents.iter().enumerate() {
    out.push_str(&format!(
      "<document index=\"{}\">\n<source>{}</source>\n<document_content>\n{}\n</document_content>\n</document>\n",
      i + 1,
      doc.path,
      doc.diff.trim_end_matches('\n'),
    ));
  }
  out.push_str("</documents>");
  out
}
