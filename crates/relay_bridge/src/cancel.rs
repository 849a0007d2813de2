//! Cooperative cancellation for in-flight job execution (§5 "every
//! execution is driven by a context that is cancelled on worker shutdown,
//! client-initiated cancel, or node failure").
//!
//! Built on a `watch` channel rather than a bare `AtomicBool` so that
//! waiters can `.await` the transition instead of polling it, and so a
//! cancellation that races the first `cancelled().await` call is never
//! missed.

use tokio::sync::watch;

/// Why a cancellation happened. The Worker Pool reads this to decide
/// whether a job lands in `cancelled` (explicit client request) or
/// `failed` with kind `transport` (its assigned node dropped out from
/// under it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserRequested,
    NodeFailure,
}

/// Cheaply cloneable cancellation flag shared between the Worker Pool and
/// the Execution Driver running a single job.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: watch::Sender<Option<CancelReason>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.tx.borrow()
    }

    /// First call wins: a node failure racing a user cancel does not
    /// overwrite whichever reason was recorded first.
    pub fn cancel(&self, reason: CancelReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone
    /// of this token; resolves immediately if it already has been.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.borrow().is_some() {
            return;
        }
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches_once_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel(CancelReason::UserRequested);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::UserRequested));
    }

    #[test]
    fn first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::NodeFailure);
        token.cancel(CancelReason::UserRequested);
        assert_eq!(token.reason(), Some(CancelReason::NodeFailure));
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::UserRequested);
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should not block once already cancelled");
    }

    #[tokio::test]
    async fn cancelled_wakes_a_waiting_task() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel(CancelReason::NodeFailure);
        tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }
}
