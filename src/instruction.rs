use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

pub const FALLBACK_INSTRUCTION: &str =
    "You are a code review agent that reviews code for potential issues.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Local,
    Remote,
    Fallback,
}

/// The system instruction sent with every request, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub text: String,
    pub provenance: Provenance,
}

impl Instruction {
    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_INSTRUCTION.to_string(),
            provenance: Provenance::Fallback,
        }
    }
}

pub trait InstructionSource {
    fn provenance(&self) -> Provenance;
    fn fetch(&self) -> Result<String>;
}

pub struct HttpSource {
    url: String,
    timeout: Option<Duration>,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl InstructionSource for HttpSource {
    fn provenance(&self) -> Provenance {
        Provenance::Remote
    }

    fn fetch(&self) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")?;
        let resp = client
            .get(&self.url)
            .send()
            .with_context(|| format!("fetch {}", self.url))?
            .error_for_status()
            .with_context(|| format!("fetch {}", self.url))?;
        resp.text().context("read system prompt body")
    }
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl InstructionSource for FileSource {
    fn provenance(&self) -> Provenance {
        Provenance::Local
    }

    fn fetch(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))
    }
}

/// Tries each source in order and settles on the fallback text. Never fails.
pub fn resolve(sources: &[&dyn InstructionSource]) -> Instruction {
    for source in sources {
        match fetch_non_empty(*source) {
            Ok(text) => {
                log::info!("using {:?} system prompt", source.provenance());
                return Instruction {
                    text,
                    provenance: source.provenance(),
                };
            }
            Err(err) => log::warn!("loading system prompt: {err:#}"),
        }
    }
    log::warn!("falling back to the built-in system prompt");
    Instruction::fallback()
}

fn fetch_non_empty(source: &dyn InstructionSource) -> Result<String> {
    let text = source.fetch()?;
    if text.trim().is_empty() {
        bail!("system prompt is empty");
    }
    Ok(text)
}
