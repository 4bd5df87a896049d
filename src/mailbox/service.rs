//! Serve an agent from its mailbox
//!
//! Requests are handled one at a time in id order. Each gets exactly one
//! reply and is deleted only after the reply is written, so a crash between
//! the two replays the request on the next start.

use super::interceptor::{CommandInterceptor, Intercept};
use super::message::{MailMessage, MessageKind};
use super::store::{Mailbox, MailboxError};
use super::watcher::{MailboxWatcher, WatchBackend};
use crate::agent::Agent;
use crate::tool::CallStack;
use crate::tools::SharedAgent;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub processed: usize,
    pub intercepted: usize,
    pub failed_runs: usize,
}

pub struct MailboxService {
    mailbox: Mailbox,
    agent: SharedAgent,
    interceptor: Option<CommandInterceptor>,
    backend: WatchBackend,
    poll_interval: Duration,
    stats: ServiceStats,
}

impl MailboxService {
    /// Open the mailbox named after `agent` under `root`
    pub fn new(agent: Agent, root: impl Into<PathBuf>) -> Result<Self, MailboxError> {
        let mailbox = Mailbox::open(root, agent.name())?;
        Ok(Self {
            mailbox,
            agent: Arc::new(tokio::sync::Mutex::new(agent)),
            interceptor: None,
            backend: WatchBackend::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats: ServiceStats::default(),
        })
    }

    pub fn with_interceptor(mut self, interceptor: CommandInterceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn agent(&self) -> SharedAgent {
        self.agent.clone()
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats
    }

    /// Reply text for one request, or `None` if shutdown interrupted it
    async fn handle(&mut self, request: &MailMessage, cancel: &CancellationToken) -> Option<String> {
        if let Some(interceptor) = self.interceptor.as_mut() {
            if let Intercept::Handled(text) = interceptor.intercept(&request.content, cancel).await {
                self.stats.intercepted += 1;
                return Some(text);
            }
        }

        let mut agent = self.agent.lock().await;
        let outcome = agent
            .run_with(&request.content, &CallStack::new(), cancel.child_token())
            .await;
        if cancel.is_cancelled() && !outcome.is_completed() {
            return None;
        }
        if !outcome.is_completed() {
            self.stats.failed_runs += 1;
        }
        Some(outcome.to_text())
    }

    /// Handle every waiting request once. Returns how many were answered.
    pub async fn process_pending(&mut self, cancel: &CancellationToken) -> Result<usize, MailboxError> {
        let requests = self.mailbox.pending(MessageKind::Request).await?;
        let mut answered = 0;
        for envelope in requests {
            if cancel.is_cancelled() {
                break;
            }
            let request = &envelope.message;
            tracing::info!(
                agent = %self.mailbox.owner(),
                id = %request.id,
                from = %request.from,
                "Handling request"
            );

            let Some(text) = self.handle(request, cancel).await else {
                tracing::info!(id = %request.id, "Shutdown during request, left for next start");
                break;
            };
            match self.mailbox.reply(request, &text).await {
                Ok(reply_id) => {
                    tracing::debug!(id = %request.id, reply = %reply_id, "Replied");
                }
                Err(MailboxError::InvalidAgentName(name)) => {
                    tracing::warn!(id = %request.id, sender = %name, "Cannot reply to invalid sender, dropping");
                }
                Err(e) => return Err(e),
            }
            self.mailbox.delete(&envelope).await?;
            self.stats.processed += 1;
            answered += 1;
        }
        Ok(answered)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> ServiceStats {
        let mut watcher = MailboxWatcher::new(self.mailbox.dir(), self.backend, self.poll_interval);
        tracing::info!(
            agent = %self.mailbox.owner(),
            dir = %self.mailbox.dir().display(),
            backend = ?watcher.backend(),
            "Mailbox service started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = watcher.wait() => {}
            }
            if let Err(e) = self.process_pending(&shutdown).await {
                tracing::error!(agent = %self.mailbox.owner(), error = %e, "Mailbox scan failed");
            }
        }

        tracing::info!(
            agent = %self.mailbox.owner(),
            processed = self.stats.processed,
            intercepted = self.stats.intercepted,
            failed_runs = self.stats.failed_runs,
            "Mailbox service stopped"
        );
        self.stats
    }
}
