//! Push transport seam.
//!
//! The bus drives a [`PushTransport`] through connect, subscribe, heartbeat
//! and close. Transport failures and server-side closes are reported through
//! these return values and nothing else.

use async_trait::async_trait;
use thiserror::Error;

use storefront_sync_core::UserId;

/// Broadcast channel carrying price events for every product.
pub const PRICES_CHANNEL: &str = "/topic/prices";

/// Errors from the push transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("connection closed by server")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no frame or heartbeat within the heartbeat window")]
    HeartbeatTimeout,
}

/// A subscribable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Price events for all products.
    Prices,
    /// Order and profile notifications for one user.
    User(UserId),
}

impl Channel {
    /// The channel's destination path.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Prices => PRICES_CHANNEL.to_string(),
            Self::User(user_id) => format!("/user/{user_id}/queue/notifications"),
        }
    }
}

/// One unit received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A message on a channel.
    Message { channel: String, body: String },
    /// A server heartbeat.
    Heartbeat,
}

impl Frame {
    /// A message frame.
    #[must_use]
    pub fn message(channel: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Message {
            channel: channel.into(),
            body: body.into(),
        }
    }
}

/// Opens connections to the push server.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn PushConnection>, TransportError>;
}

/// An open push connection. The client only receives; it never publishes.
#[async_trait]
pub trait PushConnection: Send {
    /// Subscribe to a channel.
    async fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError>;

    /// Wait for the next frame. `Ok(None)` means the server closed the stream.
    ///
    /// Must be cancel-safe: the bus races it against timers and drops the
    /// future when a timer wins.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a client heartbeat.
    async fn send_heartbeat(&mut self) -> Result<(), TransportError>;

    /// Close the connection. Best effort; never fails.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_paths() {
        assert_eq!(Channel::Prices.path(), "/topic/prices");
        assert_eq!(
            Channel::User(UserId::new(12)).path(),
            "/user/12/queue/notifications"
        );
    }
}
