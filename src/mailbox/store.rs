//! Per-agent mailbox directories under a shared root

use super::message::{MailMessage, MessageId, MessageKind};
use crate::agent::is_valid_name;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const REJECTED_DIR: &str = ".rejected";

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid agent name '{0}'")]
    InvalidAgentName(String),

    #[error("malformed message {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("no reply to {id} within {}s", timeout.as_secs())]
    Timeout { id: MessageId, timeout: Duration },

    #[error("cancelled while waiting for reply")]
    Cancelled,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> MailboxError + '_ {
    move |source| MailboxError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A message file read from disk
#[derive(Debug, Clone)]
pub struct Envelope {
    pub path: PathBuf,
    pub message: MailMessage,
}

/// One agent's view of the shared mailbox root
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
    owner: String,
    dir: PathBuf,
}

impl Mailbox {
    pub fn open(root: impl Into<PathBuf>, owner: &str) -> Result<Self, MailboxError> {
        if !is_valid_name(owner) {
            return Err(MailboxError::InvalidAgentName(owner.to_string()));
        }
        let root = root.into();
        let dir = root.join(owner);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(Self {
            root,
            owner: owner.to_string(),
            dir,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a request into `to`'s mailbox
    pub async fn send(&self, to: &str, content: &str) -> Result<MessageId, MailboxError> {
        let message = MailMessage::request(&self.owner, to, content);
        self.deliver(&message).await?;
        Ok(message.id)
    }

    /// Answer a request; the reply lands in the original sender's mailbox
    pub async fn reply(&self, request: &MailMessage, content: &str) -> Result<MessageId, MailboxError> {
        let message = MailMessage::reply_to(request, content);
        self.deliver(&message).await?;
        Ok(message.id)
    }

    /// Atomically place `message` in its recipient's directory.
    ///
    /// Written to a dot file first and renamed, so readers never see a
    /// partial message.
    pub async fn deliver(&self, message: &MailMessage) -> Result<PathBuf, MailboxError> {
        if !is_valid_name(&message.to) {
            return Err(MailboxError::InvalidAgentName(message.to.clone()));
        }
        let dir = self.root.join(&message.to);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let file_name = message.file_name();
        let tmp = dir.join(format!(".{}.tmp", file_name));
        let path = dir.join(&file_name);
        tokio::fs::write(&tmp, message.render())
            .await
            .map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

        tracing::debug!(
            from = %message.from,
            to = %message.to,
            id = %message.id,
            kind = message.kind.as_str(),
            "Delivered message"
        );
        Ok(path)
    }

    /// Messages of `kind` waiting in this mailbox, oldest first.
    ///
    /// Files that cannot be parsed are moved to `.rejected/`.
    pub async fn pending(&self, kind: MessageKind) -> Result<Vec<Envelope>, MailboxError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            match MailMessage::parse_file_name(&name) {
                Some((id, file_kind)) if file_kind == kind => found.push((id, entry.path())),
                Some(_) => {}
                None => tracing::debug!(file = %name, "Ignoring non-message file in mailbox"),
            }
        }
        found.sort_by_key(|(id, _)| *id);

        let mut envelopes = Vec::with_capacity(found.len());
        for (_, path) in found {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                // Consumed by someone else between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&path)(e)),
            };
            match MailMessage::parse(&text) {
                Ok(message) => envelopes.push(Envelope { path, message }),
                Err(reason) => self.reject(&path, &reason).await,
            }
        }
        Ok(envelopes)
    }

    async fn reject(&self, path: &Path, reason: &str) {
        tracing::warn!(file = %path.display(), reason, "Rejecting malformed message");
        let rejected = self.dir.join(REJECTED_DIR);
        let target = path.file_name().map(|name| rejected.join(name));
        let moved = match target {
            Some(target) => match tokio::fs::create_dir_all(&rejected).await {
                Ok(()) => tokio::fs::rename(path, &target).await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        if let Err(e) = moved {
            tracing::error!(file = %path.display(), error = %e, "Failed to move rejected message");
        }
    }

    /// Remove a processed message. Already gone is fine.
    pub async fn delete(&self, envelope: &Envelope) -> Result<(), MailboxError> {
        match tokio::fs::remove_file(&envelope.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&envelope.path)(e)),
        }
    }

    /// Consume the reply to `request`, if it has arrived
    pub async fn take_reply(&self, request: MessageId) -> Result<Option<MailMessage>, MailboxError> {
        let replies = self.pending(MessageKind::Reply).await?;
        match replies
            .into_iter()
            .find(|e| e.message.in_reply_to == Some(request))
        {
            Some(envelope) => {
                self.delete(&envelope).await?;
                Ok(Some(envelope.message))
            }
            None => Ok(None),
        }
    }

    /// Poll until the reply to `request` arrives
    pub async fn await_reply(
        &self,
        request: MessageId,
        timeout: Duration,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Result<MailMessage, MailboxError> {
        // None: too far out to represent, wait without a deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(reply) = self.take_reply(request).await? {
                return Ok(reply);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(MailboxError::Timeout { id: request, timeout });
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MailboxError::Cancelled),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_send_lands_in_recipient_dir_in_order() {
        let temp = TempDir::new().unwrap();
        let alice = Mailbox::open(temp.path(), "alice").unwrap();
        let bob = Mailbox::open(temp.path(), "bob").unwrap();

        let first = alice.send("bob", "one").await.unwrap();
        let second = alice.send("bob", "two").await.unwrap();

        let pending = bob.pending(MessageKind::Request).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message.id, first);
        assert_eq!(pending[1].message.id, second);
        assert_eq!(pending[0].message.from, "alice");
        assert!(alice.pending(MessageKind::Request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_round_trip() {
        let temp = TempDir::new().unwrap();
        let alice = Mailbox::open(temp.path(), "alice").unwrap();
        let bob = Mailbox::open(temp.path(), "bob").unwrap();

        let id = alice.send("bob", "ping").await.unwrap();
        let request = bob.pending(MessageKind::Request).await.unwrap().remove(0);
        bob.reply(&request.message, "pong").await.unwrap();
        bob.delete(&request).await.unwrap();
        bob.delete(&request).await.unwrap();

        let reply = alice
            .await_reply(id, Duration::from_secs(1), Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.content, "pong");
        assert!(alice.take_reply(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_files_are_rejected_and_dotfiles_ignored() {
        let temp = TempDir::new().unwrap();
        let bob = Mailbox::open(temp.path(), "bob").unwrap();
        let id = MessageId::next();
        std::fs::write(bob.dir().join(format!("{}-request.md", id)), "garbage").unwrap();
        std::fs::write(bob.dir().join(".partial-request.md.tmp"), "From: x").unwrap();

        assert!(bob.pending(MessageKind::Request).await.unwrap().is_empty());
        assert!(bob
            .dir()
            .join(REJECTED_DIR)
            .join(format!("{}-request.md", id))
            .exists());
    }

    #[tokio::test]
    async fn test_await_reply_times_out_and_cancels() {
        let temp = TempDir::new().unwrap();
        let alice = Mailbox::open(temp.path(), "alice").unwrap();
        let id = alice.send("bob", "anyone?").await.unwrap();

        let err = alice
            .await_reply(id, Duration::from_millis(30), Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MailboxError::Timeout { .. }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = alice
            .await_reply(id, Duration::from_secs(5), Duration::from_millis(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MailboxError::Cancelled));
    }

    #[test]
    fn test_invalid_names_refused() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Mailbox::open(temp.path(), "../etc"),
            Err(MailboxError::InvalidAgentName(_))
        ));
    }
}
