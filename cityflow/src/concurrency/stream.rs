use core::pin::Pin;
use core::task::{Context, Poll};

use futures::{Future, Stream};
use pin_project_lite::pin_project;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};

pin_project! {
    /// A stream adapter that terminates when the shutdown signal fires.
    ///
    /// The shutdown channel is polled before the inner stream on every poll,
    /// so a task suspended on a slow row fetch is woken and stopped as soon
    /// as an interrupt is requested, not when the next row arrives. After
    /// yielding [`ShutdownResult::Shutdown`] once, the stream is terminated
    /// and never polls the inner stream again.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct InterruptibleStream<S> {
        #[pin]
        stream: S,
        shutdown_rx: ShutdownRx,
        stopped: bool,
    }
}

impl<S: Stream> InterruptibleStream<S> {
    /// Creates a new [`InterruptibleStream`] wrapping `stream`.
    pub fn wrap(stream: S, shutdown_rx: ShutdownRx) -> Self {
        Self {
            stream,
            shutdown_rx,
            stopped: false,
        }
    }
}

impl<S: Stream> Stream for InterruptibleStream<S> {
    type Item = ShutdownResult<S::Item, ()>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.stopped {
            return Poll::Ready(None);
        }

        // A fresh `changed()` future re-registers the waker each poll; its
        // readiness depends only on the channel version, not on the future
        // instance. A closed channel counts as shutdown.
        {
            let changed = this.shutdown_rx.changed();
            let mut changed = core::pin::pin!(changed);
            if changed.as_mut().poll(cx).is_ready() {
                *this.stopped = true;
                return Poll::Ready(Some(ShutdownResult::Shutdown(())));
            }
        }

        match this.stream.poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(ShutdownResult::Ok(item))),
            Poll::Ready(None) => {
                *this.stopped = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use futures::StreamExt;
    use futures::future::poll_fn;

    struct NeverReady;

    impl Stream for NeverReady {
        type Item = i32;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn passes_items_through_until_inner_ends() {
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let mut stream = Box::pin(InterruptibleStream::wrap(
            futures::stream::iter(vec![1, 2]),
            shutdown_rx,
        ));

        assert_eq!(stream.next().await, Some(ShutdownResult::Ok(1)));
        assert_eq!(stream.next().await, Some(ShutdownResult::Ok(2)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn shutdown_preempts_available_items() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let mut stream = Box::pin(InterruptibleStream::wrap(
            futures::stream::iter(vec![1, 2]),
            shutdown_rx,
        ));

        shutdown_tx.shutdown().unwrap();

        assert_eq!(stream.next().await, Some(ShutdownResult::Shutdown(())));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_a_suspended_poll() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let mut stream = Box::pin(InterruptibleStream::wrap(NeverReady, shutdown_rx));

        poll_fn(|cx| match stream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Ready(()),
            _ => panic!("expected pending before shutdown"),
        })
        .await;

        let waiter = tokio::spawn(async move { stream.next().await });
        shutdown_tx.shutdown().unwrap();

        let item = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("stream must wake after shutdown")
            .expect("stream task must not panic");
        assert_eq!(item, Some(ShutdownResult::Shutdown(())));
    }
}
