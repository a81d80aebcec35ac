//! Transport adapters: REST calls to the chat API and the live event socket.
//!
//! Both sides are traits so the session can be driven without a network.

mod api;
mod live;

pub use api::{ApiClient, OutboundMessage, TokenPair};
pub use live::WsLiveChannel;

use async_trait::async_trait;

use crate::config::Credentials;
use crate::message::HistoryRecord;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("token response carried no access token")]
    MissingAccessToken,
    #[error("live socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// REST side of the chat API.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// POST /token with the credentials; returns the access/refresh pair.
    async fn authenticate(&self, credentials: &Credentials) -> Result<TokenPair, TransportError>;

    /// GET the ordered chat history for a contact.
    async fn fetch_history(&self, contact: &str) -> Result<Vec<HistoryRecord>, TransportError>;

    /// POST an outbound text message, authorized with the access token.
    async fn send_message(
        &self,
        access_token: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;
}

/// One long-lived inbound event connection.
#[async_trait]
pub trait LiveChannel: Send {
    /// Next inbound text frame. `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    fn is_open(&self) -> bool;

    /// Release the connection. No-op when it is already closed or was never opened.
    async fn close(&mut self);
}
