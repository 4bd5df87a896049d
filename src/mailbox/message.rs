//! One mailbox message, one file
//!
//! ```text
//! From: alice
//! To: bob
//! Kind: request
//! Id: 00001760000000000000-0000004242-0000000007
//! Time: 2026-10-16T09:30:00.000000Z
//!
//! Content:
//! What is 2 + 2?
//! ```
//!
//! Replies add an `In-Reply-To` header carrying the request id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ: AtomicU64 = AtomicU64::new(0);
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

const CONTENT_MARKER: &str = "Content:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Reply,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Reply => "reply",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "request" => Ok(MessageKind::Request),
            "reply" => Ok(MessageKind::Reply),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

/// Ordering marker: wall-clock micros, writer pid, per-process sequence.
///
/// Micros never go backwards within a process, so ids from one writer sort
/// in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub micros: u64,
    pub pid: u32,
    pub seq: u64,
}

impl MessageId {
    pub fn next() -> Self {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let previous = LAST_MICROS.fetch_max(now, Ordering::SeqCst);
        Self {
            micros: previous.max(now),
            pid: std::process::id(),
            seq: SEQ.fetch_add(1, Ordering::SeqCst),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}-{:010}-{:010}", self.micros, self.pid, self.seq)
    }
}

impl FromStr for MessageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('-');
        let mut field = |what: &str| {
            parts
                .next()
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(|| format!("invalid message id '{}': missing {}", s, what))
        };
        let micros = field("timestamp")?;
        let pid = field("pid")?;
        let seq = field("sequence")?;
        if parts.next().is_some() {
            return Err(format!("invalid message id '{}': trailing fields", s));
        }
        let bad = |e: std::num::ParseIntError| format!("invalid message id '{}': {}", s, e);
        Ok(Self {
            micros: micros.parse().map_err(bad)?,
            pid: pid.parse().map_err(bad)?,
            seq: seq.parse().map_err(bad)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: MessageId,
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    pub in_reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

impl MailMessage {
    pub fn request(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            kind: MessageKind::Request,
            from: from.into(),
            to: to.into(),
            in_reply_to: None,
            created_at: Utc::now(),
            content: content.into(),
        }
    }

    /// Reply addressed back to the sender of `request`
    pub fn reply_to(request: &MailMessage, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            kind: MessageKind::Reply,
            from: request.to.clone(),
            to: request.from.clone(),
            in_reply_to: Some(request.id),
            created_at: Utc::now(),
            content: content.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.md", self.id, self.kind.as_str())
    }

    /// `(id, kind)` encoded in a message file name
    pub fn parse_file_name(name: &str) -> Option<(MessageId, MessageKind)> {
        let stem = name.strip_suffix(".md")?;
        let (id, kind) = stem.rsplit_once('-')?;
        Some((id.parse().ok()?, kind.parse().ok()?))
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "From: {}\nTo: {}\nKind: {}\nId: {}\n",
            self.from,
            self.to,
            self.kind.as_str(),
            self.id
        );
        if let Some(request) = &self.in_reply_to {
            out.push_str(&format!("In-Reply-To: {}\n", request));
        }
        out.push_str(&format!(
            "Time: {}\n\n{}\n{}\n",
            self.created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            CONTENT_MARKER,
            self.content
        ));
        out
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut from = None;
        let mut to = None;
        let mut kind = None;
        let mut id = None;
        let mut in_reply_to = None;
        let mut created_at = None;

        let mut lines = text.split_inclusive('\n');
        for line in lines.by_ref() {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| format!("malformed header line '{}'", line))?;
            let value = value.trim();
            match key.trim() {
                "From" => from = Some(value.to_string()),
                "To" => to = Some(value.to_string()),
                "Kind" => kind = Some(value.parse::<MessageKind>()?),
                "Id" => id = Some(value.parse::<MessageId>()?),
                "In-Reply-To" => in_reply_to = Some(value.parse::<MessageId>()?),
                "Time" => {
                    created_at = Some(
                        DateTime::parse_from_rfc3339(value)
                            .map_err(|e| format!("invalid Time header: {}", e))?
                            .with_timezone(&Utc),
                    )
                }
                other => tracing::debug!(header = other, "Ignoring unknown mailbox header"),
            }
        }

        match lines.next() {
            Some(line) if line.trim_end() == CONTENT_MARKER => {}
            _ => return Err(format!("missing '{}' section", CONTENT_MARKER)),
        }
        let body: String = lines.collect();
        let content = body.strip_suffix('\n').unwrap_or(&body);
        let content = content.strip_suffix('\r').unwrap_or(content).to_string();

        let missing = |header: &str| format!("missing {} header", header);
        Ok(Self {
            id: id.ok_or_else(|| missing("Id"))?,
            kind: kind.ok_or_else(|| missing("Kind"))?,
            from: from.ok_or_else(|| missing("From"))?,
            to: to.ok_or_else(|| missing("To"))?,
            in_reply_to,
            created_at: created_at.unwrap_or_else(Utc::now),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let ids: Vec<MessageId> = (0..100).map(|_| MessageId::next()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let text = ids[0].to_string();
        assert_eq!(text.len(), 20 + 1 + 10 + 1 + 10);
        assert_eq!(text.parse::<MessageId>().unwrap(), ids[0]);
    }

    #[test]
    fn test_reply_preserves_multiline_content() {
        let request = MailMessage::request("alice", "bob", "line one\n\nContent: inside\nlast");
        let reply = MailMessage::reply_to(&request, "ok");
        assert_eq!(reply.to, "alice");
        assert_eq!(reply.in_reply_to, Some(request.id));

        let parsed = MailMessage::parse(&request.render()).unwrap();
        assert_eq!(parsed.content, "line one\n\nContent: inside\nlast");
        assert_eq!(parsed.id, request.id);

        let parsed_reply = MailMessage::parse(&reply.render()).unwrap();
        assert_eq!(parsed_reply.in_reply_to, Some(request.id));
        assert_eq!(parsed_reply.kind, MessageKind::Reply);
    }

    #[test]
    fn test_file_name_encodes_order_and_kind() {
        let message = MailMessage::request("a", "b", "x");
        let name = message.file_name();
        assert!(name.ends_with("-request.md"));
        assert_eq!(
            MailMessage::parse_file_name(&name),
            Some((message.id, MessageKind::Request))
        );
        assert_eq!(MailMessage::parse_file_name("notes.md"), None);
        assert_eq!(MailMessage::parse_file_name(".tmp-request.md"), None);
    }

    #[test]
    fn test_parse_rejects_missing_sections() {
        assert!(MailMessage::parse("From: a\nTo: b\n\nno marker").is_err());
        assert!(MailMessage::parse("From: a\n\nContent:\nhi").is_err());
    }
}
