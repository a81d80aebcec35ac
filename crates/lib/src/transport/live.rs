//! Websocket live event channel (inbound text frames only).

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{LiveChannel, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live channel over a websocket. Starts unconnected; `connect` opens it.
pub struct WsLiveChannel {
    url: String,
    ws: Option<WsStream>,
}

impl WsLiveChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the websocket. Calling again while open is a no-op.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.ws.is_some() {
            return Ok(());
        }
        match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _)) => {
                log::info!("live channel: connected to {}", self.url);
                self.ws = Some(ws);
                Ok(())
            }
            Err(e) => {
                log::debug!("live channel: could not connect to {}: {}", self.url, e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let ws = self.ws.as_mut()?;
            let item = ws.next().await;
            match item {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("live channel: server closed the connection");
                    self.ws = None;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.ws = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.ws.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                log::debug!("live channel: close failed: {}", e);
            }
            log::info!("live channel: closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unopened_channel_yields_nothing_and_closes_quietly() {
        let mut live = WsLiveChannel::new("ws://127.0.0.1:1/ws");
        assert!(!live.is_open());
        assert!(live.next_frame().await.is_none());
        live.close().await;
        live.close().await;
        assert!(!live.is_open());
    }

    #[tokio::test]
    async fn failed_connect_stays_closed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut live = WsLiveChannel::new(format!("ws://127.0.0.1:{}/ws", port));
        assert!(live.connect().await.is_err());
        assert!(!live.is_open());
    }
}
