use std::path::PathBuf;

/// Failures that end a run with a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Anthropic API key is not set (use --api-key or ANTHROPIC_API_KEY).")]
    MissingApiKey,
    #[error("No files found to review.")]
    NoFiles,
    #[error("No git repository found in '{}' or its parent directories.", path.display())]
    NoRepository { path: PathBuf },
    #[error("The branch '{branch}' does not exist in the repository.")]
    BranchMissing { branch: String },
    #[error("Could not determine the active git branch.")]
    IndeterminateBranch,
    #[error("Active branch and specified branch are the same: {branch}")]
    SameBranch { branch: String },
    #[error("Working tree has uncommitted changes; commit or stash them before --sync.")]
    DirtyWorkingTree,
    #[error("`{command}` failed: {stderr}")]
    Git { command: String, stderr: String },
    #[error("inference request failed: {message}")]
    Inference { message: String },
}

impl ReviewError {
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }
}
