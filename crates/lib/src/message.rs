//! Canonical chat message and the normalizer that builds it from history records and live frames.
//!
//! History items and live socket frames use different field names for the same things;
//! both are reduced to one [`CanonicalMessage`] here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const CUSTOMER: &str = "customer";
const AGENT: &str = "agent";

/// Party a message is attributed to; decides display alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Customer,
    Agent,
    /// Any other role string sent by the server (e.g. "bot", "system").
    Other(String),
    /// The record carried no role at all.
    Unspecified,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s {
            CUSTOMER => Role::Customer,
            AGENT => Role::Agent,
            "" => Role::Unspecified,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Customer => CUSTOMER,
            Role::Agent => AGENT,
            Role::Other(s) => s,
            Role::Unspecified => "",
        }
    }

    pub fn is_customer(&self) -> bool {
        matches!(self, Role::Customer)
    }
}

impl From<Option<String>> for Role {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Role::parse).unwrap_or(Role::Unspecified)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Horizontal placement of a message bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Customer messages.
    Start,
    /// Everyone else.
    End,
}

/// One chat message regardless of where it came from.
#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    /// Contact address (phone) or id; absent for most history items.
    pub sender: Option<String>,
    pub role: Role,
    pub body: String,
    /// Rendering key, unique per normalization. Not part of equality.
    pub identity: Uuid,
}

impl CanonicalMessage {
    pub fn new(sender: Option<String>, role: Role, body: impl Into<String>) -> Self {
        Self {
            sender,
            role,
            body: body.into(),
            identity: Uuid::new_v4(),
        }
    }

    pub fn alignment(&self) -> Alignment {
        if self.role.is_customer() {
            Alignment::Start
        } else {
            Alignment::End
        }
    }

    /// True when sender, role and body match. Identity is never compared.
    pub fn same_content(&self, other: &Self) -> bool {
        self.sender == other.sender && self.role == other.role && self.body == other.body
    }
}

impl PartialEq for CanonicalMessage {
    fn eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

impl Eq for CanonicalMessage {}

/// Item of the chat history endpoint. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_number: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("live frame is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result of normalizing a well-formed live frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveOutcome {
    Accepted(CanonicalMessage),
    /// Valid frame that does not belong in the conversation (agent echo, system event).
    Filtered,
}

/// Normalize one history item.
///
/// When the record has a `role`, `sender` is the contact. Without a `role`, the record's
/// `sender` names the party (as in live frames), so it becomes the role and the contact
/// comes from `targetNumber`.
pub fn normalize_history(record: HistoryRecord) -> CanonicalMessage {
    let HistoryRecord {
        content,
        text,
        sender,
        role,
        target_number,
    } = record;
    let (role, sender) = match role {
        Some(role) => (Role::parse(&role), sender.or(target_number)),
        None => (Role::from(sender), target_number),
    };
    let body = content.or(text).unwrap_or_default();
    CanonicalMessage::new(sender, role, body)
}

/// Parse and normalize one live text frame: `{ "message": { "sender", "targetNumber", "content" } }`.
///
/// Only invalid JSON is an error. A frame without a `message` object, or whose nested
/// `sender` is not the string `"customer"`, is filtered. Accepted frames map canonical
/// sender ← `targetNumber`, role ← `sender`, body ← `content`.
pub fn normalize_live(frame: &str) -> Result<LiveOutcome, NormalizeError> {
    let frame: Value = serde_json::from_str(frame)?;
    let Some(message) = frame.get("message").and_then(Value::as_object) else {
        return Ok(LiveOutcome::Filtered);
    };
    if message.get("sender").and_then(Value::as_str) != Some(CUSTOMER) {
        return Ok(LiveOutcome::Filtered);
    }
    Ok(LiveOutcome::Accepted(CanonicalMessage::new(
        message.get("targetNumber").and_then(lenient_string),
        Role::Customer,
        message
            .get("content")
            .and_then(lenient_string)
            .unwrap_or_default(),
    )))
}

/// Strings as-is, numbers in their JSON form; anything else is absent.
fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
