//! Sender trust checks.
//!
//! Whether a sender may talk to the background process is a policy decision
//! that differs per platform, so it is injected as a [`TrustPolicy`] instead
//! of being hard-wired into the gateway or the router.

use crate::types::MessageSender;
use parking_lot::RwLock;
use std::collections::HashMap;
use url::Url;

/// Decides whether a message sender is part of the extension itself.
pub trait TrustPolicy: Send + Sync {
    fn is_trusted_sender(&self, sender: &MessageSender) -> bool;
}

/// Trusts senders whose origin equals the extension's own origin.
#[derive(Debug, Clone)]
pub struct OriginTrustPolicy {
    self_origin: String,
}

impl OriginTrustPolicy {
    /// Creates a policy from the extension's base URL or origin,
    /// e.g. `chrome-extension://abcdef/`.
    pub fn new(extension_url: &str) -> Self {
        let self_origin = origin_of(extension_url).unwrap_or_else(|| extension_url.to_string());
        Self { self_origin }
    }

    pub fn self_origin(&self) -> &str {
        &self.self_origin
    }
}

impl TrustPolicy for OriginTrustPolicy {
    fn is_trusted_sender(&self, sender: &MessageSender) -> bool {
        sender_origin(sender).as_deref() == Some(self.self_origin.as_str())
    }
}

/// Serializes the origin of a URL as `scheme://host[:port]`.
///
/// Unlike [`url::Origin`], non-special schemes such as `chrome-extension:`
/// keep their host instead of collapsing into an opaque origin.
pub fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Determines the origin of a sender.
///
/// Prefers the explicit `origin` field; some browsers only report the URL.
pub fn sender_origin(sender: &MessageSender) -> Option<String> {
    if let Some(origin) = sender.origin.as_deref().filter(|origin| !origin.is_empty()) {
        return Some(origin.to_string());
    }
    sender.url.as_deref().and_then(origin_of)
}

/// Message types that are allowed from otherwise untrusted origins.
///
/// The `None` origin entry applies to every origin.
#[derive(Debug, Default)]
pub struct TrustedMessageTypes {
    by_origin: RwLock<HashMap<Option<String>, Vec<String>>>,
}

impl TrustedMessageTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `types` for senders from `origin` (any origin if `None`).
    pub fn add<I, S>(&self, origin: Option<&str>, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_origin
            .write()
            .entry(origin.map(str::to_string))
            .or_default()
            .extend(types.into_iter().map(Into::into));
    }

    pub fn is_trusted(&self, origin: Option<&str>, message_type: &str) -> bool {
        self.by_origin
            .read()
            .get(&origin.map(str::to_string))
            .is_some_and(|types| types.iter().any(|trusted| trusted == message_type))
    }
}
