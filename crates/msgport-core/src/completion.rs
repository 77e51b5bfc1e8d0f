use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, GenericErrorCode, Result};

/// Create a linked completer / completion pair.
pub fn pair<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx },
        Completion {
            state: State::Pending(rx),
        },
    )
}

/// Producer side of a one-shot operation result.
///
/// Consuming `complete` guarantees the result is delivered at most once.
/// Dropping an unfired completer resolves the paired [`Completion`] as
/// `OperationAborted`.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Completer<T> {
    /// Deliver the result. A completion nobody is awaiting is ignored.
    pub fn complete(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }

    /// Deliver the result, handing it back if nobody is awaiting it.
    pub fn try_complete(self, result: Result<T>) -> std::result::Result<(), Result<T>> {
        self.tx.send(result)
    }

    /// Whether the awaiting side has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Awaitable result of an operation submitted to a port.
#[derive(Debug)]
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    state: State<T>,
}

#[derive(Debug)]
enum State<T> {
    Pending(oneshot::Receiver<Result<T>>),
    Ready(Option<Result<T>>),
}

impl<T> Completion<T> {
    /// A completion that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }
}

impl<T> Unpin for Completion<T> {}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::new(
                    GenericErrorCode::OperationAborted,
                    "operation dropped before completion",
                ))),
                Poll::Pending => Poll::Pending,
            },
            State::Ready(slot) => match slot.take() {
                Some(result) => Poll::Ready(result),
                None => Poll::Ready(Err(GenericErrorCode::OperationAborted.into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcErrorCode;

    #[tokio::test]
    async fn completes_with_delivered_value() {
        let (completer, completion) = pair::<u32>();
        completer.complete(Ok(7));
        assert_eq!(completion.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_completer_aborts() {
        let (completer, completion) = pair::<()>();
        drop(completer);
        let err = completion.await.unwrap_err();
        assert!(err.is(GenericErrorCode::OperationAborted));
    }

    #[tokio::test]
    async fn ready_resolves_immediately() {
        let err = Completion::<()>::ready(Err(IpcErrorCode::Disconnected.into()))
            .await
            .unwrap_err();
        assert!(err.is(IpcErrorCode::Disconnected));
    }

    #[test]
    fn try_complete_returns_undelivered_result() {
        let (completer, completion) = pair::<u32>();
        drop(completion);
        let returned = completer.try_complete(Ok(9)).unwrap_err();
        assert_eq!(returned.unwrap(), 9);
    }

    #[test]
    fn completer_sees_abandoned_receiver() {
        let (completer, completion) = pair::<()>();
        assert!(!completer.is_abandoned());
        drop(completion);
        assert!(completer.is_abandoned());
    }
}
