//! # Sentinel Messaging
//!
//! Messaging core of the Sentinel background process. Everything the UI
//! pages and content scripts say to the background goes through here:
//!
//! - [`MessageGateway`] accepts raw one-shot messages, drops foreign and
//!   untrusted traffic and hands the rest to a [`MessageEmitter`]
//! - [`Port`] dispatches messages to per-type listeners and reduces their
//!   results into a single [`Reply`]
//! - [`EventRouter`] relays domain events to UI connections that asked for
//!   them, installing event sources only while someone listens
//!
//! Sender trust is injected through the [`TrustPolicy`] trait.
//!
//! ## Example
//!
//! ```rust
//! use sentinel_messaging::{Message, MessageEmitter, MessageSender, Port, Reply};
//! use std::sync::Arc;
//!
//! let emitter = Arc::new(MessageEmitter::new());
//! let port = Port::new(emitter.clone());
//! port.on("app.get", |_, _| Ok(Some(Reply::value("sentinel"))));
//!
//! let reply = port.dispatch(&Message::new("app.get"), &MessageSender::default());
//! assert!(reply.is_some_and(|reply| reply.is_ready()));
//! ```

pub mod emitter;
pub mod error;
pub mod gateway;
pub mod port;
pub mod response;
pub mod router;
pub mod trust;
pub mod types;

pub use emitter::{EventEmitter, EventListener, ListenerId, MessageEmitter, MessageHandler};
pub use error::MessagingError;
pub use gateway::MessageGateway;
pub use port::{MessageListener, Port};
pub use response::{get_message_response, Reply};
pub use router::{
    event_name, Connection, ConnectionId, Emit, EventRouter, HandlerInstall, Uninstall,
    UI_CONNECTION_NAME,
};
pub use trust::{origin_of, sender_origin, OriginTrustPolicy, TrustPolicy, TrustedMessageTypes};
pub use types::{ListenMessage, Message, MessageSender, RespondMessage, Tab, TabId};
