use anyhow::Result;

use crate::instruction::Instruction;
use crate::prompt::{Layout, ReviewTarget, render};

/// A single-turn request: one system directive, one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
  pub system: String,
  pub content: String,
  pub model: String,
  pub max_tokens: u32,
}

/// Text segments in the order the service produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewResponse {
  segments: Vec<String>,
}

impl ReviewResponse {
  pub fn push(&mut self, segment: impl Into<String>) {
    self.segments.push(segment.into());
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  pub fn text(&self) -> String {
    self.segments.concat()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.iter().all(|s| s.is_empty())
  }
}

impl<S: Into<String>> FromIterator<S> for ReviewResponse {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      segments: iter.into_iter().map(Into::into).collect(),
    }
  }
}

pub trait InferenceClient {
  /// Sends `request`, handing each text segment to `on_segment` as it arrives.
  fn complete(
    &self,
    request: &ReviewRequest,
    on_segment: &mut dyn FnMut(&str),
  ) -> Result<ReviewResponse>;
}

impl<C: InferenceClient + ?Sized> InferenceClient for &C {
  fn complete(
    &self,
    request: &ReviewRequest,
    on_segment: &mut dyn FnMut(&str),
  ) -> Result<ReviewResponse> {
    (**self).complete(request, on_segment)
  }
}

#[derive(Debug, Clone)]
pub struct ReviewSettings {
  pub layout: Layout,
  pub model: String,
  pub max_tokens: u32,
}

pub struct Reviewer<C> {
  client: C,
  instruction: Instruction,
  settings: ReviewSettings,
}

impl<C: InferenceClient> Reviewer<C> {
  pub fn new(client: C, instruction: Instruction, settings: ReviewSettings) -> Self {
    Self {
      client,
      instruction,
      settings,
    }
  }

  pub fn instruction(&self) -> &Instruction {
    &self.instruction
  }

  pub fn request_for(&self, target: &ReviewTarget) -> ReviewRequest {
    ReviewRequest {
      system: self.instruction.text.clone(),
      content: render(target, self.settings.layout),
      model: self.settings.model.clone(),
      max_tokens: self.settings.max_tokens,
    }
  }

  pub fn review(
    &self,
    target: &ReviewTarget,
    on_segment: &mut dyn FnMut(&str),
  ) -> Result<ReviewResponse> {
    let request = self.request_for(target);
    log::debug!(
      "sending {} byte review request for {} to {}",
      request.content.len(),
      target.label(),
      request.model
    );
    self.client.complete(&request, on_segment)
  }
}
