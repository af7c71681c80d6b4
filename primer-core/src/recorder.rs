//! Call recording scopes.
//!
//! [`watching`] runs a future inside a task-local recording scope. Any
//! [`Observable`](crate::Observable) collaborator that reports a call while
//! the future runs has the call appended to the scope's log, in invocation
//! order. The log is closed as soon as the future completes, so calls made
//! after that point are dropped. Tasks spawned from inside the scope do not
//! inherit it unless the spawned future is wrapped with [`carry_scope`].
//!
//! Scopes nest: the innermost scope receives the calls.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::attribute::Token;

tokio::task_local! {
    static CALL_LOG: Arc<CallLog>;
}

/// One observed call: `(receiver identity, operation, arguments, return value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub receiver: Vec<String>,
    pub operation: String,
    pub arguments: Vec<Token>,
    pub returned: Option<serde_json::Value>,
}

/// Append-only log backing a single recording scope.
#[derive(Debug, Default)]
struct CallLog {
    calls: Mutex<Vec<Call>>,
    closed: AtomicBool,
}

impl CallLog {
    fn push(&self, call: Call) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        true
    }

    fn close(&self) -> Vec<Call> {
        self.closed.store(true, Ordering::Release);
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Run `fut` inside a fresh recording scope and return its output together
/// with the calls observed while it ran.
pub async fn watching<F>(fut: F) -> (F::Output, Vec<Call>)
where
    F: Future,
{
    let log = Arc::new(CallLog::default());
    let output = CALL_LOG.scope(Arc::clone(&log), fut).await;
    let calls = log.close();
    (output, calls)
}

/// Bind `fut` to the recording scope active where this is called.
///
/// Wrap futures handed to `tokio::spawn` with this so their calls land in the
/// spawning computation's log. Calls made after that scope has closed are
/// still dropped. Outside any scope `fut` runs unchanged.
pub fn carry_scope<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let log = CALL_LOG.try_with(Arc::clone).ok();
    async move {
        match log {
            Some(log) => CALL_LOG.scope(log, fut).await,
            None => fut.await,
        }
    }
}

/// Append `call` to the innermost active scope.
///
/// Returns false when no scope is active (or it has already closed).
pub fn record_call(call: Call) -> bool {
    CALL_LOG.try_with(|log| log.push(call)).unwrap_or(false)
}

/// Returns true when called from inside an open recording scope.
pub fn is_recording() -> bool {
    CALL_LOG
        .try_with(|log| !log.closed.load(Ordering::Acquire))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(operation: &str, argument: i64) -> Call {
        Call {
            receiver: vec!["db".to_string()],
            operation: operation.to_string(),
            arguments: vec![Token::Int(argument)],
            returned: None,
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let ((), calls) = watching(async {
            assert!(record_call(call("find", 1)));
            assert!(record_call(call("find", 2)));
            assert!(record_call(call("count", 3)));
        })
        .await;

        let operations: Vec<_> = calls.iter().map(|c| (c.operation.as_str(), c.arguments[0].clone())).collect();
        assert_eq!(
            operations,
            vec![("find", Token::Int(1)), ("find", Token::Int(2)), ("count", Token::Int(3))]
        );
    }

    #[tokio::test]
    async fn test_no_scope_means_no_recording() {
        assert!(!is_recording());
        assert!(!record_call(call("find", 1)));
    }

    #[tokio::test]
    async fn test_nested_calls_inside_helpers_are_recorded() {
        async fn helper() {
            record_call(call("inner", 1));
        }

        let ((), calls) = watching(async {
            helper().await;
            record_call(call("outer", 2));
        })
        .await;

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "inner");
    }

    #[tokio::test]
    async fn test_nested_scopes_record_innermost() {
        let (inner_calls, outer_calls) = watching(async {
            record_call(call("outer", 1));
            let ((), inner) = watching(async {
                record_call(call("inner", 2));
            })
            .await;
            inner
        })
        .await;

        assert_eq!(inner_calls.len(), 1);
        assert_eq!(inner_calls[0].operation, "inner");
        assert_eq!(outer_calls.len(), 1);
        assert_eq!(outer_calls[0].operation, "outer");
    }

    #[tokio::test]
    async fn test_spawned_tasks_do_not_inherit_scope() {
        let (recorded_in_spawn, calls) = watching(async {
            tokio::spawn(async { record_call(call("leak", 1)) })
                .await
                .expect("spawned task should complete")
        })
        .await;

        assert!(!recorded_in_spawn);
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn test_carried_scope_records_spawned_calls() {
        let (recorded_in_spawn, calls) = watching(async {
            tokio::spawn(carry_scope(async { record_call(call("spawned", 1)) }))
                .await
                .expect("spawned task should complete")
        })
        .await;

        assert!(recorded_in_spawn);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "spawned");
    }

    #[tokio::test]
    async fn test_carried_scope_drops_calls_after_close() {
        let (pending, calls) = watching(async {
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            let handle = tokio::spawn(carry_scope(async move {
                let _ = rx.await;
                record_call(call("late", 1))
            }));
            (tx, handle)
        })
        .await;
        assert!(calls.is_empty());

        let (tx, handle) = pending;
        let _ = tx.send(());
        let recorded = handle.await.expect("spawned task should complete");
        assert!(!recorded);
    }

    #[tokio::test]
    async fn test_carry_scope_outside_scope_is_transparent() {
        let recorded = carry_scope(async { record_call(call("free", 1)) }).await;
        assert!(!recorded);
    }

    #[tokio::test]
    async fn test_scope_ends_with_future() {
        let ((), calls) = watching(async {
            assert!(is_recording());
        })
        .await;
        assert!(calls.is_empty());
        assert!(!is_recording());
    }
}
