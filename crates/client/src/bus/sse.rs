//! Server-sent events transport.
//!
//! # Protocol
//!
//! 1. `GET {events_url}` with `Accept: text/event-stream` opens the stream.
//!    The first event is `event: connected` whose data is the connection id.
//! 2. `POST {events_url}{id}/subscriptions` `{"channel": "/topic/prices"}`
//!    subscribes the connection to a channel.
//! 3. Channel messages arrive as `event: <channel path>` with the JSON body
//!    in `data:`. Comment lines (`: ping`) and `event: heartbeat` are server
//!    heartbeats.
//! 4. `POST {events_url}{id}/heartbeat` is the client heartbeat.
//! 5. `DELETE {events_url}{id}` closes the connection.
//!
//! The stream GET has no overall timeout; every other call is bounded by the
//! request timeout.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use super::transport::{Channel, Frame, PushConnection, PushTransport, TransportError};
use crate::config::ClientConfig;

/// Event name of the handshake event.
const CONNECTED_EVENT: &str = "connected";

/// Event name of an explicit server heartbeat.
const HEARTBEAT_EVENT: &str = "heartbeat";

/// Default time allowed for the stream to open and identify itself.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on subscribe, heartbeat and close calls.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Push transport over server-sent events.
pub struct SseTransport {
    client: reqwest::Client,
    events_url: Url,
    token: Option<SecretString>,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl SseTransport {
    /// Create a transport against `events_url`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        events_url: Url,
        token: Option<SecretString>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            client,
            events_url,
            token,
            handshake_timeout,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound subscribe, heartbeat and close calls by `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create a transport from client configuration.
    ///
    /// The transport gets its own HTTP client without an overall timeout, so
    /// the long-lived stream is not cut off.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self::new(
            client,
            config.events_url.clone(),
            config.api_token.clone(),
            DEFAULT_HANDSHAKE_TIMEOUT,
        )
        .with_request_timeout(config.request_timeout))
    }

    async fn open(&self) -> Result<SseConnection, TransportError> {
        let mut request = self
            .client
            .get(self.events_url.clone())
            .header("Accept", "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request.send().await?.error_for_status()?;

        let mut conn = SseConnection {
            client: self.client.clone(),
            events_url: self.events_url.clone(),
            token: self.token.clone(),
            request_timeout: self.request_timeout,
            id: String::new(),
            response,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        };
        conn.id = conn.handshake().await?;
        Ok(conn)
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    #[instrument(skip(self), fields(url = %self.events_url))]
    async fn connect(&self) -> Result<Box<dyn PushConnection>, TransportError> {
        let conn = tokio::time::timeout(self.handshake_timeout, self.open())
            .await
            .map_err(|_| TransportError::Protocol("handshake timed out".to_string()))??;
        debug!(connection_id = %conn.id, "Event stream opened");
        Ok(Box::new(conn))
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    channel: String,
}

/// One open event stream.
pub struct SseConnection {
    client: reqwest::Client,
    events_url: Url,
    token: Option<SecretString>,
    request_timeout: Duration,
    id: String,
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<SseRecord>,
}

impl SseConnection {
    /// Read records until the `connected` event and return its id.
    async fn handshake(&mut self) -> Result<String, TransportError> {
        loop {
            match self.next_record().await? {
                None => return Err(TransportError::Closed),
                Some(SseRecord::Comment) => {}
                Some(SseRecord::Event { name, .. }) if name.as_deref() == Some(HEARTBEAT_EVENT) => {}
                Some(SseRecord::Event { name, data }) if name.as_deref() == Some(CONNECTED_EVENT) => {
                    let id = data.trim();
                    if id.is_empty() {
                        return Err(TransportError::Protocol("empty connection id".to_string()));
                    }
                    return Ok(id.to_string());
                }
                Some(SseRecord::Event { name, .. }) => {
                    return Err(TransportError::Protocol(format!(
                        "expected connected event, got {name:?}"
                    )));
                }
            }
        }
    }

    /// Next decoded record. Cancel-safe: a dropped call loses no data.
    async fn next_record(&mut self) -> Result<Option<SseRecord>, TransportError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            match self.response.chunk().await? {
                Some(bytes) => self.pending.extend(self.decoder.feed(&bytes)),
                None => return Ok(None),
            }
        }
    }

    fn endpoint(&self, suffix: &str) -> Result<Url, TransportError> {
        let path = if suffix.is_empty() {
            self.id.clone()
        } else {
            format!("{}/{suffix}", self.id)
        };
        self.events_url
            .join(&path)
            .map_err(|e| TransportError::Protocol(format!("bad endpoint {path}: {e}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .timeout(self.request_timeout);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl PushConnection for SseConnection {
    async fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError> {
        let url = self.endpoint("subscriptions")?;
        let body = SubscribeRequest {
            channel: channel.path(),
        };
        self.request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        debug!(channel = %body.channel, "Subscribed");
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.next_record().await? {
                None => return Ok(None),
                Some(SseRecord::Comment) => return Ok(Some(Frame::Heartbeat)),
                Some(SseRecord::Event {
                    name: Some(name), ..
                }) if name == HEARTBEAT_EVENT => return Ok(Some(Frame::Heartbeat)),
                Some(SseRecord::Event {
                    name: Some(name),
                    data,
                }) if name != CONNECTED_EVENT => return Ok(Some(Frame::message(name, data))),
                Some(SseRecord::Event { name, .. }) => {
                    debug!(event = ?name, "Skipping event without a channel");
                }
            }
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        let url = self.endpoint("heartbeat")?;
        self.request(reqwest::Method::POST, url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&mut self) {
        let Ok(url) = self.endpoint("") else {
            return;
        };
        if let Err(e) = self.request(reqwest::Method::DELETE, url).send().await {
            debug!(error = %e, "Failed to close event stream");
        }
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// A decoded server-sent events record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// A comment line, used as a keep-alive.
    Comment,
    /// A dispatched event.
    Event { name: Option<String>, data: String },
}

/// Incremental `text/event-stream` decoder.
///
/// Accepts arbitrary byte chunks; lines may be split across chunks and end in
/// `\n` or `\r\n`. The `id` and `retry` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    name: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every record it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(record) = self.line(&line) {
                records.push(record);
            }
        }
        records
    }

    fn line(&mut self, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Some(SseRecord::Comment);
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseRecord> {
        let name = self.name.take();
        let data = self.data.take();
        if name.is_none() && data.is_none() {
            return None;
        }
        Some(SseRecord::Event {
            name,
            data: data.unwrap_or_default(),
        })
    }
}
