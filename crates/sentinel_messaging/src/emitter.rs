//! Name-keyed listener registries.
//!
//! [`EventEmitter`] keeps ordered listener lists per event name and is used
//! both by the [`Port`](crate::Port) (message type -> message listeners) and
//! by the [`EventRouter`](crate::EventRouter) (internal event name -> relay
//! callbacks). [`MessageEmitter`] is the flat listener set standing in for
//! the native one-shot messaging API.
//!
//! Listeners are always invoked on a snapshot taken under the lock, so a
//! listener may register or remove listeners without deadlocking and
//! changes only take effect for the next emission.

use crate::response::Reply;
use crate::types::{Message, MessageSender};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked with the arguments of an emitted event.
pub type EventListener = dyn Fn(&[Value]) + Send + Sync;

/// Ordered listener lists keyed by event name.
pub struct EventEmitter<L: ?Sized = EventListener> {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Arc<L>)>>>,
}

impl<L: ?Sized> EventEmitter<L> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a listener for `name`. Duplicates are allowed.
    pub fn on(&self, name: &str, listener: Arc<L>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it wasn't registered.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(name) else {
            return false;
        };

        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(name);
        }
        removed
    }

    /// Snapshot of the listeners for `name`, in registration order.
    pub fn listeners(&self, name: &str) -> Vec<Arc<L>> {
        self.listeners
            .lock()
            .get(name)
            .map(|list| list.iter().map(|(_, listener)| listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners.lock().contains_key(name)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map_or(0, Vec::len)
    }
}

impl EventEmitter<EventListener> {
    /// Calls every listener of `name` with `args`, in registration order.
    pub fn emit(&self, name: &str, args: &[Value]) {
        for listener in self.listeners(name) {
            listener(args);
        }
    }
}

impl<L: ?Sized> Default for EventEmitter<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level handler receiving every one-shot message.
pub type MessageHandler = dyn Fn(&Message, &MessageSender) -> Option<Reply> + Send + Sync;

/// Flat set of top-level message handlers.
///
/// This is the seam where the native one-shot messaging API plugs in: the
/// [`MessageGateway`](crate::MessageGateway) dispatches accepted messages
/// here and a [`Port`](crate::Port) registers itself as one handler.
#[derive(Default)]
pub struct MessageEmitter {
    handlers: Mutex<Vec<(ListenerId, Arc<MessageHandler>)>>,
}

impl MessageEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, handler: Arc<MessageHandler>) -> ListenerId {
        let id = ListenerId::next();
        self.handlers.lock().push((id, handler));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Hands the message to every handler and collects their results.
    pub fn dispatch(&self, message: &Message, sender: &MessageSender) -> Vec<Option<Reply>> {
        let handlers: Vec<Arc<MessageHandler>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        handlers
            .into_iter()
            .map(|handler| handler(message, sender))
            .collect()
    }
}
