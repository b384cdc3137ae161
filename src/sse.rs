// Push notifications over server-sent events.
// Each notification only means "availability may have changed"; payloads are not read.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::session::Session;

pub const NOTIFICATIONS_PATH: &str = "/notifications/resources";

/// Yields `Ok(())` per notification. An `Err` item or the end of the stream
/// means the subscription is gone.
pub type NotificationStream = BoxStream<'static, Result<(), ApiError>>;

#[async_trait]
pub trait NotificationSource: Send + Sync + 'static {
    async fn open(&self) -> Result<NotificationStream, ApiError>;
}

/// Incremental event-stream decoder. Feed it raw chunks; it reports how many
/// events were completed. Comment lines (keep-alives) and events without data
/// are not counted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        self.buffer.extend_from_slice(chunk);
        let mut completed = 0;

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                if self.has_data {
                    completed += 1;
                }
                self.has_data = false;
            } else if line.starts_with(b"data") {
                self.has_data = true;
            }
        }

        completed
    }
}

pub struct SseNotificationSource {
    http: reqwest::Client,
    url: String,
    session: Arc<Session>,
}

impl SseNotificationSource {
    pub fn new(config: &ClientConfig, session: Arc<Session>) -> Result<Self, ApiError> {
        // no overall timeout: the response body never ends on its own
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}{}", config.base_url.trim_end_matches('/'), NOTIFICATIONS_PATH),
            session,
        })
    }
}

#[async_trait]
impl NotificationSource for SseNotificationSource {
    async fn open(&self) -> Result<NotificationStream, ApiError> {
        let mut request = self.http.get(&self.url).header(ACCEPT, "text/event-stream");
        if let Some(token) = self.session.access_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::StreamError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::StreamError(format!(
                "subscription refused with status {}",
                status.as_u16()
            )));
        }
        info!(url = %self.url, "notification stream opened");

        let chunks = response.bytes_stream().boxed();
        let notifications = stream::unfold(
            (chunks, SseDecoder::new(), 0usize),
            |(mut chunks, mut decoder, mut pending)| async move {
                loop {
                    if pending > 0 {
                        return Some((Ok(()), (chunks, decoder, pending - 1)));
                    }
                    match chunks.next().await {
                        Some(Ok(chunk)) => pending = decoder.feed(&chunk),
                        Some(Err(e)) => {
                            let err = ApiError::StreamError(e.to_string());
                            return Some((Err(err), (chunks, decoder, 0)));
                        }
                        None => {
                            debug!("notification stream ended");
                            return None;
                        }
                    }
                }
            },
        );

        Ok(notifications.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_counts_complete_events() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"event: changed\ndata: {\"type\":\"Room\"}\n\n"), 1);
        assert_eq!(decoder.feed(b"data: a\n\ndata: b\n\n"), 2);
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"da"), 0);
        assert_eq!(decoder.feed(b"ta: x\r"), 0);
        assert_eq!(decoder.feed(b"\n\r\n"), 1);
    }

    #[test]
    fn test_decoder_ignores_keep_alives() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b": ping\n\n"), 0);
        assert_eq!(decoder.feed(b"retry: 1000\n\n"), 0);
        assert_eq!(decoder.feed(b"data\n\n"), 1);
    }
}
