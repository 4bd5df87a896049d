//! File-based mailboxes between agents
//!
//! Every agent owns `<root>/<name>/`. A message is one markdown file named
//! `<id>-<kind>.md`; ids sort in creation order. A `MailboxService` answers
//! requests by running its agent, or through the slash-command interceptor
//! for `/name args` messages.

mod interceptor;
mod message;
mod service;
mod store;
mod watcher;

pub use interceptor::{CommandEntry, CommandInterceptor, Intercept, SlashCommand, DEFAULT_COMMAND_TIMEOUT};
pub use message::{MailMessage, MessageId, MessageKind};
pub use service::{MailboxService, ServiceStats, DEFAULT_POLL_INTERVAL};
pub use store::{Envelope, Mailbox, MailboxError, REJECTED_DIR};
pub use watcher::{MailboxWatcher, WatchBackend};
