use thiserror::Error;

/// Errors raised inside the messaging core.
///
/// None of these ever reach a UI page: listener failures are logged by the
/// dispatcher and the affected listener simply contributes no reply.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// A message listener reported a failure
    #[error("Listener for '{message_type}' failed: {reason}")]
    ListenerFailed {
        message_type: String,
        reason: String,
    },
    /// A message listener panicked
    #[error("Listener for '{0}' panicked")]
    ListenerPanicked(String),
    /// The message did not have the shape a listener expected
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    /// Serialization failed when converting a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Shorthand for listeners that reject a message.
    pub fn listener(message_type: &str, reason: impl Into<String>) -> Self {
        Self::ListenerFailed {
            message_type: message_type.to_string(),
            reason: reason.into(),
        }
    }
}
