use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::review::{InferenceClient, ReviewRequest, ReviewResponse};

const API_VERSION: &str = "2023-06-01";

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ApiError,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: String, timeout: Option<Duration>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

impl InferenceClient for AnthropicClient {
    fn complete(
        &self,
        request: &ReviewRequest,
        on_segment: &mut dyn FnMut(&str),
    ) -> Result<ReviewResponse> {
        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: [Message {
                role: "user",
                content: &request.content,
            }],
            stream: true,
        };

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|err| ReviewError::inference(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(ReviewError::inference(format!("{status}: {}", error_message(&text))).into());
        }

        read_stream(BufReader::new(resp), on_segment)
    }
}

/// Consumes a server-sent-event stream, forwarding text deltas in order.
fn read_stream<R: BufRead>(reader: R, on_segment: &mut dyn FnMut(&str)) -> Result<ReviewResponse> {
    let mut response = ReviewResponse::default();
    for line in reader.lines() {
        let line = line.context("read response stream")?;
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                log::debug!("skipping unparsable stream event: {err}");
                continue;
            }
        };
        match event {
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => {
                on_segment(&text);
                response.push(text);
            }
            StreamEvent::Error { error } => {
                return Err(
                    ReviewError::inference(format!("{}: {}", error.kind, error.message)).into(),
                );
            }
            StreamEvent::MessageStop => break,
            _ => {}
        }
    }
    Ok(response)
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("{}: {}", parsed.error.kind, parsed.error.message),
        Err(_) => body.trim().to_string(),
    }
}
