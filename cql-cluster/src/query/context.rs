use std::future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::error::Error;

/// Cancellation and deadline of a query. Cloned into every attempt.
#[derive(Clone, Debug)]
pub struct QueryContext {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Cancels the associated [`QueryContext`]. Dropping the canceller doesn't cancel anything.
#[derive(Debug)]
pub struct Canceller {
    sender: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::background()
    }
}

impl QueryContext {
    /// Context which is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (_, cancelled) = watch::channel(false);
        QueryContext {
            cancelled,
            deadline: None,
        }
    }

    /// Creates a cancellable context.
    pub fn with_cancel() -> (Self, Canceller) {
        let (sender, cancelled) = watch::channel(false);
        (
            QueryContext {
                cancelled,
                deadline: None,
            },
            Canceller { sender },
        )
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is done, if it is.
    pub fn error(&self) -> Option<Error> {
        if *self.cancelled.borrow() {
            Some(Error::Cancelled)
        } else if self
            .deadline
            .map(|deadline| deadline <= Instant::now())
            .unwrap_or(false)
        {
            Some(Error::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context gets cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        let mut cancelled = self.cancelled.clone();
        let cancellation = async move {
            loop {
                if *cancelled.borrow_and_update() {
                    return Error::Cancelled;
                }

                if cancelled.changed().await.is_err() && !*cancelled.borrow() {
                    // nobody can cancel anymore
                    future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                error = cancellation => error,
                _ = sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => cancellation.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn should_never_finish_background() {
        let context = QueryContext::background();

        assert!(context.error().is_none());
        assert!(timeout(Duration::from_millis(20), context.done())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn should_cancel() {
        let (context, canceller) = QueryContext::with_cancel();
        let attempt_context = context.clone();

        tokio::spawn(async move { canceller.cancel() });

        let error = timeout(Duration::from_secs(1), attempt_context.done())
            .await
            .unwrap();
        assert!(matches!(error, Error::Cancelled));
        assert!(matches!(context.error(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn should_not_cancel_on_drop() {
        let (context, canceller) = QueryContext::with_cancel();
        drop(canceller);

        assert!(context.error().is_none());
        assert!(timeout(Duration::from_millis(20), context.done())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn should_expire() {
        let context = QueryContext::background().with_timeout(Duration::from_millis(10));

        let error = timeout(Duration::from_secs(1), context.done()).await.unwrap();
        assert!(matches!(error, Error::DeadlineExceeded));
        assert!(matches!(context.error(), Some(Error::DeadlineExceeded)));
    }
}
