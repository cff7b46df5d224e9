//! Minimal SSE client for tests: opens the stream and yields events.

use anyhow::Context as _;
use futures::StreamExt as _;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

pub struct SseClient {
    stream: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
}

impl SseClient {
    /// Open `GET {url}` and return once the stream headers arrived.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let response = reqwest::Client::new()
            .get(url)
            .send()
            .await
            .context("open SSE stream")?;
        anyhow::ensure!(
            response.status().is_success(),
            "SSE endpoint returned {}",
            response.status()
        );
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        anyhow::ensure!(
            content_type.starts_with("text/event-stream"),
            "unexpected content type: {content_type}"
        );
        Ok(Self {
            stream: response.bytes_stream().boxed(),
            buffer: String::new(),
        })
    }

    /// Next full event frame, skipping keep-alive comments.
    pub async fn next_event(&mut self, timeout: Duration) -> anyhow::Result<SseEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.pop_event() {
                return Ok(event);
            }
            let chunk = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .context("timed out waiting for SSE event")?
                .context("SSE stream ended")?
                .context("SSE stream error")?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn pop_event(&mut self) -> Option<SseEvent> {
        loop {
            let end = self.buffer.find("\n\n")?;
            let frame: String = self.buffer.drain(..end + 2).collect();

            let mut event = String::from("message");
            let mut data_lines: Vec<&str> = Vec::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }
            // Comment-only frames (keep-alives) carry no data.
            if data_lines.is_empty() {
                continue;
            }
            return Some(SseEvent {
                event,
                data: data_lines.join("\n"),
            });
        }
    }
}
