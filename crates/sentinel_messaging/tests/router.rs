use parking_lot::Mutex;
use sentinel_messaging::{
    Connection, ConnectionId, EventEmitter, EventListener, EventRouter, MessageSender,
    OriginTrustPolicy, TabId,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const EXTENSION: &str = "chrome-extension://sentinel/";

/// Connection that records everything posted to it.
struct MockConnection {
    id: ConnectionId,
    name: String,
    sender: MessageSender,
    posted: Mutex<Vec<Value>>,
}

impl MockConnection {
    fn ui(id: ConnectionId) -> Arc<Self> {
        Self::named(id, "ui", "chrome-extension://sentinel/popup.html")
    }

    fn named(id: ConnectionId, name: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.to_string(),
            sender: MessageSender::from_url(url),
            posted: Mutex::new(Vec::new()),
        })
    }

    fn posted(&self) -> Vec<Value> {
        self.posted.lock().clone()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> &MessageSender {
        &self.sender
    }

    fn post_message(&self, message: Value) {
        self.posted.lock().push(message);
    }
}

/// Domain event source plus install/uninstall counters.
struct FilterNotifier {
    events: Arc<EventEmitter<EventListener>>,
    installs: Arc<AtomicUsize>,
    uninstalls: Arc<AtomicUsize>,
}

impl FilterNotifier {
    fn new() -> Self {
        Self {
            events: Arc::new(EventEmitter::new()),
            installs: Arc::new(AtomicUsize::new(0)),
            uninstalls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers a template for `filters` that forwards domain events named
    /// after the action, optionally only for one tab.
    fn register(&self, router: &EventRouter) {
        let events = self.events.clone();
        let installs = self.installs.clone();
        let uninstalls = self.uninstalls.clone();

        router.install_handler("filters", None, move |emit, action, tab| {
            installs.fetch_add(1, Ordering::SeqCst);
            let source = match tab {
                Some(tab) => format!("{action}:{tab}"),
                None => action.to_string(),
            };
            let id = events.on(&source, Arc::new(move |args: &[Value]| emit(args.to_vec())));

            let events = events.clone();
            let uninstalls = uninstalls.clone();
            Box::new(move || {
                events.off(&source, id);
                uninstalls.fetch_add(1, Ordering::SeqCst);
            })
        });
    }

    fn emit(&self, action: &str, tab: Option<TabId>, payload: Value) {
        let name = match tab {
            Some(tab) => format!("{action}:{tab}"),
            None => action.to_string(),
        };
        self.events.emit(&name, &[payload]);
    }

    fn counts(&self) -> (usize, usize) {
        (
            self.installs.load(Ordering::SeqCst),
            self.uninstalls.load(Ordering::SeqCst),
        )
    }
}

fn router() -> EventRouter {
    EventRouter::new(Arc::new(OriginTrustPolicy::new(EXTENSION)))
}

fn listen(router: &EventRouter, connection: &Arc<MockConnection>, message: Value) {
    router.on_connection_message(connection.id, &message);
}

#[test]
fn relays_events_until_disconnect() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let c1 = MockConnection::ui(1);
    assert!(router.on_connect(c1.clone()));
    listen(&router, &c1, json!({"type": "filters.listen", "filter": ["added"]}));
    assert_eq!(notifier.counts(), (1, 0));

    let filter = json!({"text": "||ads.example^"});
    notifier.emit("added", None, filter.clone());
    assert_eq!(
        c1.posted(),
        vec![json!({"type": "filters.respond", "action": "added", "args": [filter]})]
    );

    router.on_disconnect(1);
    assert_eq!(notifier.counts(), (1, 1));

    notifier.emit("added", None, json!({"text": "late"}));
    assert_eq!(c1.posted().len(), 1);
    assert!(!router.is_installed("filters", "added", None));
}

#[test]
fn install_and_uninstall_happen_once_per_transition() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let connections: Vec<_> = (1..=4).map(MockConnection::ui).collect();
    for connection in &connections {
        router.on_connect(connection.clone());
        listen(&router, connection, json!({"type": "filters.listen", "filter": ["added"]}));
    }
    assert_eq!(notifier.counts(), (1, 0));
    assert_eq!(router.listener_count("filters", "added", None), 4);

    // Disconnect out of registration order, including a repeated disconnect
    for id in [3, 1, 3, 4] {
        router.on_disconnect(id);
    }
    assert_eq!(notifier.counts(), (1, 0));

    router.on_disconnect(2);
    assert_eq!(notifier.counts(), (1, 1));

    // A new first subscriber installs again
    let late = MockConnection::ui(5);
    router.on_connect(late.clone());
    listen(&router, &late, json!({"type": "filters.listen", "filter": ["added"]}));
    assert_eq!(notifier.counts(), (2, 1));
}

#[test]
fn tab_scoped_listeners_are_isolated() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let first = MockConnection::ui(1);
    let second = MockConnection::ui(2);
    router.on_connect(first.clone());
    router.on_connect(second.clone());
    listen(&router, &first, json!({"type": "filters.listen", "filter": ["added"], "tabId": 10}));
    listen(&router, &second, json!({"type": "filters.listen", "filter": ["added"], "tabId": 20}));

    // One handler instance per tab
    assert_eq!(notifier.counts(), (2, 0));

    notifier.emit("added", Some(10), json!("ten"));
    notifier.emit("added", Some(20), json!("twenty"));
    notifier.emit("added", None, json!("global"));

    assert_eq!(
        first.posted(),
        vec![json!({"type": "filters.respond", "action": "added", "args": ["ten"]})]
    );
    assert_eq!(
        second.posted(),
        vec![json!({"type": "filters.respond", "action": "added", "args": ["twenty"]})]
    );
}

#[test]
fn removing_a_tab_cleans_up_all_its_subscriptions() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let connection = MockConnection::ui(1);
    router.on_connect(connection.clone());
    listen(&router, &connection, json!({"type": "filters.listen", "filter": ["added"], "tabId": 7}));
    listen(&router, &connection, json!({"type": "filters.listen", "filter": ["removed"], "tabId": 7}));
    assert_eq!(notifier.counts(), (2, 0));

    router.on_tab_removed(7);
    assert_eq!(notifier.counts(), (2, 2));

    // Connection stays open, disconnecting later doesn't uninstall twice
    assert_eq!(router.connection_count(), 1);
    router.on_disconnect(1);
    assert_eq!(notifier.counts(), (2, 2));
}

#[test]
fn exact_registration_wins_over_template() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let exact_installs = Arc::new(AtomicUsize::new(0));
    let counter = exact_installs.clone();
    router.install_handler("filters", Some("added"), move |emit, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        emit(vec![json!("installed")]);
        Box::new(|| {})
    });

    let connection = MockConnection::ui(1);
    router.on_connect(connection.clone());
    listen(&router, &connection, json!({"type": "filters.listen", "filter": ["added", "removed"]}));

    assert_eq!(exact_installs.load(Ordering::SeqCst), 1);
    // Only "removed" went through the template
    assert_eq!(notifier.counts(), (1, 0));
    assert_eq!(
        connection.posted(),
        vec![json!({"type": "filters.respond", "action": "added", "args": ["installed"]})]
    );
}

#[test]
fn untrusted_or_misnamed_connections_are_ignored() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let foreign = MockConnection::named(1, "ui", "https://evil.example/");
    let misnamed = MockConnection::named(2, "devtools", "chrome-extension://sentinel/devtools.html");
    assert!(!router.on_connect(foreign.clone()));
    assert!(!router.on_connect(misnamed.clone()));

    listen(&router, &foreign, json!({"type": "filters.listen", "filter": ["added"]}));
    listen(&router, &misnamed, json!({"type": "filters.listen", "filter": ["added"]}));
    assert_eq!(notifier.counts(), (0, 0));
    assert_eq!(router.connection_count(), 0);
}

#[test]
fn events_without_handler_are_still_relayed() {
    let router = router();
    let connection = MockConnection::ui(1);
    router.on_connect(connection.clone());

    // Malformed control messages are dropped
    listen(&router, &connection, json!({"type": "prefs.listen"}));
    listen(&router, &connection, json!({"type": "prefs.get", "filter": ["x"]}));
    assert_eq!(router.listener_count("prefs", "changed", None), 0);

    listen(&router, &connection, json!({"type": "prefs.listen", "filter": ["changed"]}));
    router.emit("prefs", "changed", None, vec![json!("subscriptions_autoupdate")]);
    assert_eq!(
        connection.posted(),
        vec![json!({"type": "prefs.respond", "action": "changed", "args": ["subscriptions_autoupdate"]})]
    );
}

#[test]
fn panicking_uninstall_does_not_stop_the_others() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);
    router.install_handler("filters", Some("added"), |_, _, _| {
        Box::new(|| panic!("uninstall failed"))
    });

    let connection = MockConnection::ui(1);
    router.on_connect(connection.clone());
    listen(&router, &connection, json!({"type": "filters.listen", "filter": ["added", "removed"]}));
    assert_eq!(notifier.counts(), (1, 0));

    router.on_disconnect(1);
    assert_eq!(notifier.counts(), (1, 1));
    assert!(!router.is_installed("filters", "added", None));
    assert!(!router.is_installed("filters", "removed", None));
    assert_eq!(router.handler_count(), 0);

    // Nothing is left attached to the domain source
    notifier.emit("removed", None, json!("late"));
    assert!(connection.posted().is_empty());
}

#[test]
fn subscriber_leaving_during_install_uninstalls_once() {
    let router = router();
    let installs = Arc::new(AtomicUsize::new(0));
    let uninstalls = Arc::new(AtomicUsize::new(0));

    let handle = router.clone();
    let (install_count, uninstall_count) = (installs.clone(), uninstalls.clone());
    router.install_handler("filters", None, move |_, _, _| {
        install_count.fetch_add(1, Ordering::SeqCst);
        handle.on_disconnect(1);
        let uninstall_count = uninstall_count.clone();
        Box::new(move || {
            uninstall_count.fetch_add(1, Ordering::SeqCst);
        })
    });

    let connection = MockConnection::ui(1);
    router.on_connect(connection.clone());
    listen(&router, &connection, json!({"type": "filters.listen", "filter": ["added"]}));

    assert_eq!(installs.load(Ordering::SeqCst), 1);
    assert_eq!(uninstalls.load(Ordering::SeqCst), 1);
    assert!(!router.is_installed("filters", "added", None));
    assert_eq!(router.handler_count(), 0);
    assert_eq!(router.listener_count("filters", "added", None), 0);
}

#[test]
fn listener_arriving_during_cancelled_install_keeps_it() {
    let router = router();
    let notifier = FilterNotifier::new();
    let late = MockConnection::ui(2);

    let handle = router.clone();
    let replacement = late.clone();
    let handed_over = Arc::new(AtomicBool::new(false));
    let events = notifier.events.clone();
    let (installs, uninstalls) = (notifier.installs.clone(), notifier.uninstalls.clone());
    router.install_handler("filters", None, move |emit, action, _| {
        installs.fetch_add(1, Ordering::SeqCst);
        if !handed_over.swap(true, Ordering::SeqCst) {
            // The first subscriber leaves and another one arrives mid-install
            handle.on_disconnect(1);
            handle.on_connect(replacement.clone());
            handle.on_connection_message(2, &json!({"type": "filters.listen", "filter": ["added"]}));
        }

        let source = action.to_string();
        let id = events.on(&source, Arc::new(move |args: &[Value]| emit(args.to_vec())));
        let events = events.clone();
        let uninstalls = uninstalls.clone();
        Box::new(move || {
            events.off(&source, id);
            uninstalls.fetch_add(1, Ordering::SeqCst);
        })
    });

    let first = MockConnection::ui(1);
    router.on_connect(first.clone());
    listen(&router, &first, json!({"type": "filters.listen", "filter": ["added"]}));

    assert_eq!(notifier.counts(), (1, 0));
    assert!(router.is_installed("filters", "added", None));
    assert_eq!(router.listener_count("filters", "added", None), 1);

    notifier.emit("added", None, json!("relayed"));
    assert!(first.posted().is_empty());
    assert_eq!(
        late.posted(),
        vec![json!({"type": "filters.respond", "action": "added", "args": ["relayed"]})]
    );

    router.on_disconnect(2);
    assert_eq!(notifier.counts(), (1, 1));
    assert!(!router.is_installed("filters", "added", None));
}

#[test]
fn panicking_install_can_be_retried() {
    let router = router();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    router.install_handler("filters", None, move |_, _, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("source not ready");
        }
        Box::new(|| {})
    });

    let first = MockConnection::ui(1);
    router.on_connect(first.clone());
    listen(&router, &first, json!({"type": "filters.listen", "filter": ["added"]}));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!router.is_installed("filters", "added", None));
    assert_eq!(router.handler_count(), 0);

    let second = MockConnection::ui(2);
    router.on_connect(second.clone());
    listen(&router, &second, json!({"type": "filters.listen", "filter": ["added"]}));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(router.is_installed("filters", "added", None));
}

#[test]
fn closed_tabs_leave_no_handlers_behind() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let panel = MockConnection::ui(1);
    router.on_connect(panel.clone());
    for tab in 1..=50 {
        listen(&router, &panel, json!({"type": "filters.listen", "filter": ["added"], "tabId": tab}));
    }
    assert_eq!(router.handler_count(), 50);

    for tab in 1..=50 {
        router.on_tab_removed(tab);
    }
    assert_eq!(notifier.counts(), (50, 50));
    assert_eq!(router.handler_count(), 0);

    // Handlers are rebuilt on demand
    listen(&router, &panel, json!({"type": "filters.listen", "filter": ["added"], "tabId": 3}));
    assert!(router.is_installed("filters", "added", Some(3)));
    assert_eq!(router.handler_count(), 1);
}

#[test]
fn listen_ignores_connections_that_were_never_accepted() {
    let router = router();
    let notifier = FilterNotifier::new();
    notifier.register(&router);

    let stray = MockConnection::ui(9);
    router.listen("filters", &["added".to_string()], stray.clone(), None);
    assert_eq!(router.listener_count("filters", "added", None), 0);
    assert_eq!(router.handler_count(), 0);
    assert_eq!(notifier.counts(), (0, 0));

    router.on_connect(stray.clone());
    router.listen("filters", &["added".to_string()], stray.clone(), None);
    assert_eq!(notifier.counts(), (1, 0));
    router.on_disconnect(9);
    assert_eq!(notifier.counts(), (1, 1));
}
