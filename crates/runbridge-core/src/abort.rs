//! Abort controller and signal
//!
//! A controller owns the abort state; signals are cheap clones handed to
//! whoever needs to observe cancellation.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Owner of an abort signal
#[derive(Debug, Clone)]
pub struct AbortController {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Abort with a reason. Only the first call has an effect.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of an [`AbortController`]
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.receiver.borrow().clone()
    }

    pub fn throw_if_aborted(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(Error::Aborted(reason)),
            None => Ok(()),
        }
    }

    /// Resolve once the controller aborts
    ///
    /// Never resolves if the controller is dropped without aborting.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let aborted = receiver.wait_for(Option::is_some).await.is_ok();
        if !aborted {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_sets_reason_once() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());
        assert!(signal.throw_if_aborted().is_ok());

        controller.abort("client disconnected");
        controller.abort("second reason");

        assert!(controller.is_aborted());
        assert!(signal.is_aborted());
        assert_eq!(signal.reason().as_deref(), Some("client disconnected"));
        assert!(matches!(signal.throw_if_aborted(), Err(Error::Aborted(_))));
    }

    #[test]
    fn test_signal_created_after_abort_observes_it() {
        let controller = AbortController::new();
        controller.abort("early");
        assert!(controller.signal().is_aborted());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort("timeout");

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_cancelled_pending_without_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let result =
            tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
        drop(controller);
    }
}
