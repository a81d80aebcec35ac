//! REST client for the chat API (token, history, WhatsApp send).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatApi, TransportError};
use crate::config::Credentials;
use crate::message::HistoryRecord;

/// Response of POST /token. Only `access` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Body of POST /whatsapp/send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub target_phone: String,
    pub text: String,
    pub from_bot: bool,
    pub is_assigned: bool,
}

impl OutboundMessage {
    /// Message typed by a human operator. A non-empty `label` is prepended in bold on its own line.
    pub fn from_user(target_phone: impl Into<String>, label: &str, text: &str) -> Self {
        let text = if label.is_empty() {
            text.to_string()
        } else {
            format!("*{}*\n{}", label, text)
        };
        Self {
            target_phone: target_phone.into(),
            text,
            from_bot: false,
            is_assigned: true,
        }
    }
}

/// Client for the chat REST API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api { status, body });
        }
        Ok(res)
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<TokenPair, TransportError> {
        let url = format!("{}/token", self.base_url);
        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let res = self.client.post(&url).json(&body).send().await?;
        let tokens: TokenPair = Self::check(res).await?.json().await?;
        if tokens.access.is_none() {
            return Err(TransportError::MissingAccessToken);
        }
        Ok(tokens)
    }

    async fn fetch_history(&self, contact: &str) -> Result<Vec<HistoryRecord>, TransportError> {
        let url = format!("{}/chat/external/messages", self.base_url);
        let res = self
            .client
            .get(&url)
            .query(&[("contact", contact)])
            .send()
            .await?;
        let records: Vec<HistoryRecord> = Self::check(res).await?.json().await?;
        Ok(records)
    }

    async fn send_message(
        &self,
        access_token: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let url = format!("{}/whatsapp/send", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(message)
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }
}
