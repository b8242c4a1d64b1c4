//! Single-fire completion signal carrying a process exit code.

use crate::util::UNKNOWN_EXIT_CODE;
use tokio::sync::watch;

/// Create a linked sender/signal pair.
pub(crate) fn completion_channel() -> (CompletionSender, CompletionSignal) {
    let (tx, rx) = watch::channel(None);
    (CompletionSender { tx }, CompletionSignal { rx })
}

/// Producer half, owned by the reaper.
///
/// `fulfill` consumes the sender, so the exit code is delivered at most once.
#[derive(Debug)]
pub(crate) struct CompletionSender {
    tx: watch::Sender<Option<i32>>,
}

impl CompletionSender {
    pub(crate) fn fulfill(self, exit_code: i32) {
        self.tx.send_replace(Some(exit_code));
    }
}

/// Notification that a supervised process has exited.
///
/// Cheap to clone; every clone observes the same single fulfillment, and
/// reads after fulfillment return immediately with the same exit code.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<Option<i32>>,
}

impl CompletionSignal {
    /// Exit code if the process has already exited.
    pub fn exit_code(&self) -> Option<i32> {
        *self.rx.borrow()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Wait for the exit code.
    ///
    /// If the reaper went away without reporting (its runtime shut down),
    /// resolves to [`UNKNOWN_EXIT_CODE`].
    pub async fn wait(&self) -> i32 {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(UNKNOWN_EXIT_CODE),
            Err(_) => UNKNOWN_EXIT_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reads_after_fulfillment_are_idempotent() {
        let (sender, signal) = completion_channel();
        assert_eq!(signal.exit_code(), None);

        sender.fulfill(3);

        for _ in 0..5 {
            assert_eq!(signal.wait().await, 3);
            assert_eq!(signal.exit_code(), Some(3));
        }
        let clone = signal.clone();
        assert_eq!(clone.wait().await, 3);
        assert!(clone.is_fulfilled());
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_same_code() {
        let (sender, signal) = completion_channel();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.fulfill(0);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_to_unknown() {
        let (sender, signal) = completion_channel();
        drop(sender);

        assert_eq!(signal.wait().await, UNKNOWN_EXIT_CODE);
        assert_eq!(signal.exit_code(), None);
    }
}
