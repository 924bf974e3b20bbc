//! Entry point for raw one-shot messages from the native messaging layer.
//!
//! The gateway validates the message shape, drops traffic that belongs to
//! the filtering engine's own content scripts, enforces sender trust and
//! then dispatches to the [`MessageEmitter`] that ports listen on.

use crate::emitter::MessageEmitter;
use crate::response::{get_message_response, Reply};
use crate::trust::{sender_origin, TrustPolicy, TrustedMessageTypes};
use crate::types::{Message, MessageSender};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message type prefixes handled by the filtering engine itself.
const FOREIGN_PREFIXES: [&str; 2] = ["ewe:", "ML:"];

pub struct MessageGateway {
    emitter: Arc<MessageEmitter>,
    policy: Arc<dyn TrustPolicy>,
    trusted_types: TrustedMessageTypes,
}

impl MessageGateway {
    pub fn new(emitter: Arc<MessageEmitter>, policy: Arc<dyn TrustPolicy>) -> Self {
        Self {
            emitter,
            policy,
            trusted_types: TrustedMessageTypes::new(),
        }
    }

    pub fn emitter(&self) -> &Arc<MessageEmitter> {
        &self.emitter
    }

    pub fn policy(&self) -> &Arc<dyn TrustPolicy> {
        &self.policy
    }

    /// Allows `types` for senders from `origin`, or from anywhere if `None`.
    pub fn add_trusted_message_types<I, S>(&self, origin: Option<&str>, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_types.add(origin, types);
    }

    /// Handles a message as delivered by the browser.
    ///
    /// Returns the reply to send back, or `None` when no reply is due.
    pub fn on_message(&self, raw: &Value, raw_sender: &MessageSender) -> Option<Reply> {
        let Some(message) = Message::from_value(raw) else {
            debug!("Ignoring invalid message");
            return None;
        };

        if FOREIGN_PREFIXES
            .iter()
            .any(|prefix| message.message_type.starts_with(prefix))
        {
            return None;
        }

        if !self.is_allowed(&message, raw_sender) {
            warn!(
                "Untrusted message received: {} from {}",
                message.message_type,
                raw_sender.url.as_deref().unwrap_or("<unknown>")
            );
            return None;
        }

        let sender = raw_sender.scoped();
        get_message_response(self.emitter.dispatch(&message, &sender))
    }

    fn is_allowed(&self, message: &Message, sender: &MessageSender) -> bool {
        if self.policy.is_trusted_sender(sender) {
            return true;
        }

        let origin = sender_origin(sender);
        self.trusted_types
            .is_trusted(origin.as_deref(), &message.message_type)
            || self.trusted_types.is_trusted(None, &message.message_type)
    }
}
