//! Request/response dispatcher for one-shot messages.
//!
//! A [`Port`] registers itself as a handler on a [`MessageEmitter`] and
//! routes each incoming message to the listeners registered for its exact
//! type. The listeners' results are reduced into the reply with
//! [`get_message_response`].

use crate::emitter::{EventEmitter, ListenerId, MessageEmitter};
use crate::error::MessagingError;
use crate::response::{get_message_response, Reply};
use crate::types::{Message, MessageSender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Listener for one message type.
///
/// Returning `Ok(None)` means the listener has no opinion on the reply.
/// Errors are logged and count as `None`.
pub type MessageListener =
    dyn Fn(&Message, &MessageSender) -> Result<Option<Reply>, MessagingError> + Send + Sync;

struct PortInner {
    listeners: EventEmitter<MessageListener>,
}

impl PortInner {
    fn on_message(&self, message: &Message, sender: &MessageSender) -> Option<Reply> {
        let listeners = self.listeners.listeners(&message.message_type);
        if listeners.is_empty() {
            debug!("No listeners for message '{}'", message.message_type);
            return None;
        }

        let responses = listeners
            .into_iter()
            .map(|listener| {
                match catch_unwind(AssertUnwindSafe(|| listener(message, sender))) {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        error!("{}", e);
                        None
                    }
                    Err(_) => {
                        error!("{}", MessagingError::ListenerPanicked(message.message_type.clone()));
                        None
                    }
                }
            })
            .collect();

        get_message_response(responses)
    }
}

/// Communication port receiving one-shot messages.
pub struct Port {
    inner: Arc<PortInner>,
    emitter: Arc<MessageEmitter>,
    registration: Mutex<Option<ListenerId>>,
}

impl Port {
    /// Creates a port and starts listening on `emitter`.
    pub fn new(emitter: Arc<MessageEmitter>) -> Self {
        let inner = Arc::new(PortInner {
            listeners: EventEmitter::new(),
        });

        let handler_inner = inner.clone();
        let registration = emitter.add_listener(Arc::new(move |message: &Message, sender: &MessageSender| {
            handler_inner.on_message(message, sender)
        }));

        Self {
            inner,
            emitter,
            registration: Mutex::new(Some(registration)),
        }
    }

    /// Adds a listener for messages of exactly `message_type`.
    ///
    /// Several listeners per type are allowed; all of them run and their
    /// defined results make up the reply.
    pub fn on<F>(&self, message_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&Message, &MessageSender) -> Result<Option<Reply>, MessagingError> + Send + Sync + 'static,
    {
        self.inner.listeners.on(message_type, Arc::new(listener))
    }

    /// Removes a listener. No-op if it isn't registered.
    pub fn off(&self, message_type: &str, id: ListenerId) {
        self.inner.listeners.off(message_type, id);
    }

    /// Dispatches a message to the listeners of its type.
    pub fn dispatch(&self, message: &Message, sender: &MessageSender) -> Option<Reply> {
        self.inner.on_message(message, sender)
    }

    /// Re-dispatches `message` under a different type, keeping its payload.
    pub fn forward(&self, message_type: &str, message: &Message, sender: &MessageSender) -> Option<Reply> {
        self.inner.on_message(&message.retyped(message_type), sender)
    }

    /// Stops receiving messages from the emitter.
    pub fn disconnect(&self) {
        if let Some(id) = self.registration.lock().take() {
            self.emitter.remove_listener(id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.registration.lock().is_some()
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("connected", &self.is_connected())
            .finish()
    }
}
