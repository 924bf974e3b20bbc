//! Reply values and the reducer that turns listener results into one reply.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::fmt;

/// What a single listener contributes to the reply of a message.
///
/// Listeners return `Option<Reply>`; `None` means "no opinion" and is
/// ignored by [`get_message_response`].
pub enum Reply {
    /// A reply that is available immediately
    Value(Value),
    /// A reply that becomes available once the future resolves
    Pending(BoxFuture<'static, Value>),
}

impl Reply {
    /// Wraps an immediate value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Wraps a future producing the reply.
    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Value> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }

    /// Whether the reply is already resolved.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Waits for the reply value.
    pub async fn resolve(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Reduces the results of all listeners of a message into the reply.
///
/// * no defined result: no reply
/// * exactly one defined result: that result
/// * several defined results: an array of them, in registration order
///
/// When any of several results is still pending, the array is produced by
/// a future that waits for all of them.
pub fn get_message_response(responses: Vec<Option<Reply>>) -> Option<Reply> {
    let mut defined: Vec<Reply> = responses.into_iter().flatten().collect();

    match defined.len() {
        0 => None,
        1 => defined.pop(),
        _ if defined.iter().all(Reply::is_ready) => Some(Reply::Value(Value::Array(
            defined
                .into_iter()
                .filter_map(|reply| match reply {
                    Reply::Value(value) => Some(value),
                    Reply::Pending(_) => None,
                })
                .collect(),
        ))),
        _ => Some(Reply::pending(async move {
            Value::Array(join_all(defined.into_iter().map(Reply::resolve)).await)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_defined_results_means_no_reply() {
        assert!(get_message_response(vec![]).is_none());
        assert!(get_message_response(vec![None, None]).is_none());
    }

    #[tokio::test]
    async fn single_result_is_passed_through() {
        let reply = get_message_response(vec![None, Some(Reply::value(42)), None]).unwrap();
        assert_eq!(reply.resolve().await, json!(42));

        let reply = get_message_response(vec![Some(Reply::pending(async { json!("later") }))]).unwrap();
        assert!(!reply.is_ready());
        assert_eq!(reply.resolve().await, json!("later"));
    }

    #[tokio::test]
    async fn several_results_become_an_ordered_array() {
        let reply = get_message_response(vec![
            Some(Reply::value("a")),
            None,
            Some(Reply::value(Value::Null)),
            Some(Reply::value("c")),
        ])
        .unwrap();
        assert!(reply.is_ready());
        assert_eq!(reply.resolve().await, json!(["a", null, "c"]));
    }

    #[tokio::test]
    async fn pending_results_are_joined_in_order() {
        let reply = get_message_response(vec![
            Some(Reply::pending(async {
                tokio::task::yield_now().await;
                json!(1)
            })),
            Some(Reply::value(2)),
        ])
        .unwrap();
        assert!(!reply.is_ready());
        assert_eq!(reply.resolve().await, json!([1, 2]));
    }
}
