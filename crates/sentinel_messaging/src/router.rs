//! Lazy publish/subscribe over long-lived UI connections.
//!
//! UI pages open a connection named `"ui"` and send control messages of the
//! form `{"type": "<type>.listen", "filter": [actions], "tabId"?: n}`. For
//! every requested action the router relays events back down the
//! connection as `{"type": "<type>.respond", "action", "args"}`.
//!
//! The sources of those events are registered with
//! [`EventRouter::install_handler`]. A handler's `install` callback is only
//! invoked while at least one connection listens to its event, and the
//! uninstall function it returns runs as soon as the last listener goes
//! away (connection closed or listened-to tab removed).
//!
//! ## Event names
//!
//! Internally each subscription is keyed by `"<type>.<action>"`, suffixed
//! with `":<tabId>"` for tab-scoped listeners so streams of different tabs
//! never mix. Every internal name gets its own handler instance, created
//! from the exact `"<type>.<action>"` registration or, failing that, from
//! the type-level template.

use crate::emitter::{EventEmitter, EventListener, ListenerId};
use crate::trust::TrustPolicy;
use crate::types::{ListenMessage, MessageSender, RespondMessage, TabId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Identifier assigned to a connection by the native messaging layer.
pub type ConnectionId = u64;

/// Connection name UI pages use for event subscriptions.
pub const UI_CONNECTION_NAME: &str = "ui";

/// A persistent connection to a UI page.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;
    fn name(&self) -> &str;
    fn sender(&self) -> &MessageSender;
    /// Posts a message down the connection. Must not block.
    fn post_message(&self, message: Value);
}

/// Emits an event for the internal name a handler was installed for.
pub type Emit = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Undoes what an install callback set up.
pub type Uninstall = Box<dyn FnOnce() + Send>;

/// Starts forwarding an event: receives `emit`, the action and the target
/// tab, and returns the matching [`Uninstall`].
pub type HandlerInstall = dyn Fn(Emit, &str, Option<TabId>) -> Uninstall + Send + Sync;

enum HandlerState {
    Idle,
    /// `install` is running outside the lock; `cancelled` is set when the
    /// last listener left in the meantime.
    Installing { cancelled: bool },
    Installed(Uninstall),
}

struct EventHandler {
    install: Arc<HandlerInstall>,
    state: HandlerState,
}

impl EventHandler {
    fn new(install: Arc<HandlerInstall>) -> Self {
        Self {
            install,
            state: HandlerState::Idle,
        }
    }
}

type SubscriptionId = u64;

/// Everything a single listen request registered.
struct Subscription {
    connection: ConnectionId,
    tab: Option<TabId>,
    relays: Vec<(String, ListenerId)>,
}

struct ConnectionEntry {
    connection: Arc<dyn Connection>,
    subscriptions: Vec<SubscriptionId>,
}

#[derive(Default)]
struct RouterState {
    installers: HashMap<String, Arc<HandlerInstall>>,
    templates: HashMap<String, Arc<HandlerInstall>>,
    handlers: HashMap<String, EventHandler>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    subscriptions_by_tab: HashMap<TabId, Vec<SubscriptionId>>,
}

struct RouterInner {
    policy: Arc<dyn TrustPolicy>,
    events: EventEmitter<EventListener>,
    state: Mutex<RouterState>,
    next_subscription: AtomicU64,
}

/// Routes domain events to subscribed UI connections.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

/// Builds the internal event name for an action.
pub fn event_name(event_type: &str, action: &str, tab: Option<TabId>) -> String {
    match tab {
        Some(tab) => format!("{event_type}.{action}:{tab}"),
        None => format!("{event_type}.{action}"),
    }
}

impl EventRouter {
    pub fn new(policy: Arc<dyn TrustPolicy>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                policy,
                events: EventEmitter::new(),
                state: Mutex::new(RouterState::default()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Registers how to start forwarding `"<type>.<action>"` events.
    ///
    /// With `action = None` the registration is a template used for every
    /// action of `event_type` that has no registration of its own.
    pub fn install_handler<F>(&self, event_type: &str, action: Option<&str>, install: F)
    where
        F: Fn(Emit, &str, Option<TabId>) -> Uninstall + Send + Sync + 'static,
    {
        let install: Arc<HandlerInstall> = Arc::new(install);
        let mut state = self.inner.state.lock();
        match action {
            Some(action) => {
                state
                    .installers
                    .insert(event_name(event_type, action, None), install);
            }
            None => {
                state.templates.insert(event_type.to_string(), install);
            }
        }
    }

    /// Accepts a new connection if it is a trusted UI connection.
    ///
    /// Returns `false` for connections that will be ignored.
    pub fn on_connect(&self, connection: Arc<dyn Connection>) -> bool {
        if !self.inner.policy.is_trusted_sender(connection.sender()) {
            debug!("Ignoring connection {} from untrusted sender", connection.id());
            return false;
        }
        if connection.name() != UI_CONNECTION_NAME {
            debug!("Ignoring connection {} named '{}'", connection.id(), connection.name());
            return false;
        }

        let id = connection.id();
        self.inner.state.lock().connections.insert(
            id,
            ConnectionEntry {
                connection,
                subscriptions: Vec::new(),
            },
        );
        debug!("Accepted UI connection {}", id);
        true
    }

    /// Handles a message received over a connection.
    ///
    /// Only `"<type>.listen"` control messages are understood; everything
    /// else, and anything from connections that weren't accepted, is ignored.
    pub fn on_connection_message(&self, connection_id: ConnectionId, message: &Value) {
        let connection = {
            let state = self.inner.state.lock();
            match state.connections.get(&connection_id) {
                Some(entry) => entry.connection.clone(),
                None => return,
            }
        };

        let Some(listen) = ListenMessage::parse(message) else {
            return;
        };

        self.listen(listen.event_type(), &listen.filter, connection, listen.tab_id);
    }

    /// Tears down every subscription of a closed connection.
    pub fn on_disconnect(&self, connection_id: ConnectionId) {
        let subscriptions = {
            let mut state = self.inner.state.lock();
            match state.connections.remove(&connection_id) {
                Some(entry) => entry.subscriptions,
                None => return,
            }
        };

        debug!(
            "Connection {} closed, removing {} subscription(s)",
            connection_id,
            subscriptions.len()
        );
        self.inner.cleanup(subscriptions);
    }

    /// Tears down every subscription that targeted a closed tab.
    pub fn on_tab_removed(&self, tab: TabId) {
        let subscriptions = self
            .inner
            .state
            .lock()
            .subscriptions_by_tab
            .remove(&tab)
            .unwrap_or_default();

        if !subscriptions.is_empty() {
            debug!("Tab {} removed, removing {} subscription(s)", tab, subscriptions.len());
        }
        self.inner.cleanup(subscriptions);
    }

    /// Subscribes `connection` to `actions` of `event_type`.
    ///
    /// Connections that weren't accepted by [`on_connect`](Self::on_connect)
    /// are ignored, since nothing would ever clean their subscriptions up.
    pub fn listen(
        &self,
        event_type: &str,
        actions: &[String],
        connection: Arc<dyn Connection>,
        tab: Option<TabId>,
    ) {
        let subscription_id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut relays = Vec::with_capacity(actions.len());
        let mut pending_installs = Vec::new();

        {
            let mut state = self.inner.state.lock();
            if !state.connections.contains_key(&connection.id()) {
                debug!("Ignoring listen request from unknown connection {}", connection.id());
                return;
            }

            for action in actions {
                let name = event_name(event_type, action, tab);

                let relay_connection = connection.clone();
                let relay_type = event_type.to_string();
                let relay_action = action.clone();
                let relay: Arc<EventListener> = Arc::new(move |args: &[Value]| {
                    relay_connection
                        .post_message(RespondMessage::new(&relay_type, &relay_action, args.to_vec()).to_value());
                });
                relays.push((name.clone(), self.inner.events.on(&name, relay)));

                if !state.handlers.contains_key(&name) {
                    let install = state
                        .installers
                        .get(&event_name(event_type, action, None))
                        .or_else(|| state.templates.get(event_type))
                        .cloned();
                    match install {
                        Some(install) => {
                            state.handlers.insert(name.clone(), EventHandler::new(install));
                        }
                        None => debug!("No handler for '{}', relaying only", name),
                    }
                }

                if let Some(handler) = state.handlers.get_mut(&name) {
                    match &mut handler.state {
                        HandlerState::Idle => {
                            handler.state = HandlerState::Installing { cancelled: false };
                            pending_installs.push((name, action.clone(), handler.install.clone()));
                        }
                        HandlerState::Installing { cancelled } => *cancelled = false,
                        HandlerState::Installed(_) => {}
                    }
                }
            }

            state.subscriptions.insert(
                subscription_id,
                Subscription {
                    connection: connection.id(),
                    tab,
                    relays,
                },
            );
            if let Some(entry) = state.connections.get_mut(&connection.id()) {
                entry.subscriptions.push(subscription_id);
            }
            if let Some(tab) = tab {
                state
                    .subscriptions_by_tab
                    .entry(tab)
                    .or_default()
                    .push(subscription_id);
            }
        }

        for (name, action, install) in pending_installs {
            self.inner.install(&name, &action, tab, install);
        }
    }

    /// Emits an event to everyone listening to it.
    pub fn emit(&self, event_type: &str, action: &str, tab: Option<TabId>, args: Vec<Value>) {
        self.inner.events.emit(&event_name(event_type, action, tab), &args);
    }

    /// Whether the handler behind an event is currently installed.
    pub fn is_installed(&self, event_type: &str, action: &str, tab: Option<TabId>) -> bool {
        self.inner
            .state
            .lock()
            .handlers
            .get(&event_name(event_type, action, tab))
            .is_some_and(|handler| !matches!(handler.state, HandlerState::Idle))
    }

    /// Number of relays currently attached to an event.
    pub fn listener_count(&self, event_type: &str, action: &str, tab: Option<TabId>) -> usize {
        self.inner
            .events
            .listener_count(&event_name(event_type, action, tab))
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Number of handler instances that are installed or installing.
    pub fn handler_count(&self) -> usize {
        self.inner.state.lock().handlers.len()
    }
}

/// Runs an uninstall function, containing any panic.
fn run_uninstall(name: &str, uninstall: Uninstall) {
    if catch_unwind(AssertUnwindSafe(uninstall)).is_err() {
        error!("Uninstalling handler for '{}' panicked", name);
    }
}

impl RouterInner {
    fn emit_fn(self: &Arc<Self>, name: &str) -> Emit {
        let router = Arc::downgrade(self);
        let name = name.to_string();
        Arc::new(move |args: Vec<Value>| {
            if let Some(router) = Weak::upgrade(&router) {
                router.events.emit(&name, &args);
            }
        })
    }

    /// Runs a handler's install callback outside the lock.
    fn install(self: &Arc<Self>, name: &str, action: &str, tab: Option<TabId>, install: Arc<HandlerInstall>) {
        let emit = self.emit_fn(name);
        let uninstall = match catch_unwind(AssertUnwindSafe(|| install(emit, action, tab))) {
            Ok(uninstall) => uninstall,
            Err(_) => {
                error!("Installing handler for '{}' panicked", name);
                let mut state = self.state.lock();
                let installing = matches!(
                    state.handlers.get(name).map(|handler| &handler.state),
                    Some(HandlerState::Installing { .. })
                );
                if installing {
                    state.handlers.remove(name);
                }
                return;
            }
        };

        let leftover = {
            let mut state = self.state.lock();
            let cancelled = match state.handlers.get(name).map(|handler| &handler.state) {
                Some(HandlerState::Installing { cancelled }) => *cancelled,
                Some(_) => {
                    warn!("Handler for '{}' changed state during install", name);
                    true
                }
                None => true,
            };

            if cancelled {
                let installing = matches!(
                    state.handlers.get(name).map(|handler| &handler.state),
                    Some(HandlerState::Installing { .. })
                );
                if installing {
                    state.handlers.remove(name);
                }
                Some(uninstall)
            } else {
                if let Some(handler) = state.handlers.get_mut(name) {
                    handler.state = HandlerState::Installed(uninstall);
                }
                debug!("Installed handler for '{}'", name);
                None
            }
        };

        if let Some(uninstall) = leftover {
            run_uninstall(name, uninstall);
        }
    }

    /// Removes the given subscriptions and uninstalls handlers left without
    /// listeners. Unknown or already removed subscriptions are skipped.
    fn cleanup(&self, subscriptions: Vec<SubscriptionId>) {
        if subscriptions.is_empty() {
            return;
        }

        let mut uninstalls = Vec::new();
        {
            let mut state = self.state.lock();
            for subscription_id in subscriptions {
                let Some(subscription) = state.subscriptions.remove(&subscription_id) else {
                    continue;
                };

                if let Some(entry) = state.connections.get_mut(&subscription.connection) {
                    entry.subscriptions.retain(|id| *id != subscription_id);
                }
                if let Some(tab) = subscription.tab {
                    if let Some(list) = state.subscriptions_by_tab.get_mut(&tab) {
                        list.retain(|id| *id != subscription_id);
                        if list.is_empty() {
                            state.subscriptions_by_tab.remove(&tab);
                        }
                    }
                }

                for (name, relay) in subscription.relays {
                    self.events.off(&name, relay);
                    if self.events.has_listeners(&name) {
                        continue;
                    }

                    let Some(handler) = state.handlers.get_mut(&name) else {
                        continue;
                    };
                    if let HandlerState::Installing { cancelled } = &mut handler.state {
                        // Undone by `install` once the callback returns
                        *cancelled = true;
                        continue;
                    }

                    // Rebuilt from its registration on the next listen
                    if let Some(handler) = state.handlers.remove(&name) {
                        if let HandlerState::Installed(uninstall) = handler.state {
                            debug!("Uninstalling handler for '{}'", name);
                            uninstalls.push((name, uninstall));
                        }
                    }
                }
            }
        }

        for (name, uninstall) in uninstalls {
            run_uninstall(&name, uninstall);
        }
    }
}
