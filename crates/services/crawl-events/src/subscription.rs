//! Subscription lifecycle and the read loop that drives it.
//!
//! Every subscription is one tokio task that owns its decoder and both
//! handlers. The end handler is moved into that task and called once, after
//! the last event, whatever ended the stream.

use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::decoder::EventDecoder;
use crate::error::{Result, StreamError};
use crate::event::StreamEvent;

/// Where a subscription is in its lifecycle.
///
/// `Connecting -> Streaming -> Draining -> Closed`. A failed connect goes
/// straight to `Closed`, as does a read error or cancellation while
/// streaming. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Request sent, waiting for the response head
    Connecting,
    /// Body open, events flowing
    Streaming,
    /// Body ended, flushing what is buffered
    Draining,
    /// End handler has run
    Closed,
}

/// Why a subscription ended.
#[derive(Debug, Clone)]
pub enum EndReason {
    /// The server closed the body normally.
    Completed,
    /// [`Subscription::cancel`] was called (or the handle was dropped).
    Cancelled,
    /// Connecting or reading failed.
    Failed(Arc<StreamError>),
}

impl EndReason {
    /// True for a normal end of body.
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The failure, if the stream failed.
    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Counters for one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Events handed to the event handler
    pub events_delivered: u64,
    /// `data:` lines dropped because their payload did not parse
    pub records_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    skipped: AtomicU64,
}

/// Handle to an active subscription.
///
/// Dropping this handle cancels the subscription unless it was
/// [detached](Self::detach).
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    state: watch::Receiver<SubscriptionState>,
    counters: Arc<Counters>,
    task: Option<JoinHandle<EndReason>>,
    cancel_on_drop: bool,
}

impl Subscription {
    /// Run the read loop over a caller-supplied byte stream.
    ///
    /// This is the transport-agnostic entry point: anything that yields byte
    /// chunks (a socket reader, a file, a test fixture) can feed a
    /// subscription. The stream is treated as already connected.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NoRuntime`] when called outside a tokio runtime.
    pub fn from_byte_stream<T, S, B, E, F, G>(stream: S, on_event: F, on_end: G) -> Result<Self>
    where
        T: DeserializeOwned + Send + 'static,
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: Into<Bytes> + Send,
        E: Display + Send,
        F: FnMut(StreamEvent<T>) + Send + 'static,
        G: FnOnce(EndReason) + Send + 'static,
    {
        let bytes = stream.map(|item| {
            item.map(Into::into)
                .map_err(|e| StreamError::Transport(e.to_string()))
        });
        spawn(async move { Ok(bytes) }, on_event, on_end)
    }

    /// Request cancellation.
    ///
    /// The read loop stops at its next suspension point or before the next
    /// event, whichever comes first, and the end handler receives
    /// [`EndReason::Cancelled`] unless the stream had already ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// True once the end handler has run.
    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Snapshot of the subscription counters.
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            events_delivered: self.counters.delivered.load(Ordering::Relaxed),
            records_skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Wait until the subscription reaches [`SubscriptionState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.state.clone();
        // An Err means the task is gone, which also means closed.
        let _ = rx.wait_for(|s| *s == SubscriptionState::Closed).await;
    }

    /// Wait for the subscription to end and return why it ended.
    pub async fn wait(mut self) -> EndReason {
        let Some(task) = self.task.take() else {
            return EndReason::Cancelled;
        };
        match task.await {
            Ok(reason) => reason,
            Err(e) if e.is_cancelled() => EndReason::Cancelled,
            Err(e) => EndReason::Failed(Arc::new(StreamError::Transport(format!(
                "subscription task failed: {e}"
            )))),
        }
    }

    /// Let the subscription run to its natural end without a handle.
    pub fn detach(mut self) {
        self.cancel_on_drop = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            self.cancel.cancel();
        }
    }
}

/// Channel-backed view of a subscription.
///
/// Events are buffered without bound: the read loop never waits for the
/// receiver.
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: mpsc::UnboundedReceiver<StreamEvent<T>>,
    subscription: Subscription,
}

impl<T: DeserializeOwned + Send + 'static> EventReceiver<T> {
    #[cfg_attr(not(feature = "http"), expect(dead_code))]
    pub(crate) fn spawn<C, S>(connect: C) -> Result<Self>
    where
        C: Future<Output = Result<S>> + Send + 'static,
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = spawn(
            connect,
            move |event| {
                // Receiver gone: nobody is listening, keep draining quietly.
                let _ = tx.send(event);
            },
            |_| {},
        )?;
        Ok(Self { rx, subscription })
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the stream has ended and every event was received.
    pub async fn recv(&mut self) -> Option<StreamEvent<T>> {
        self.rx.recv().await
    }

    /// Close the subscription explicitly.
    pub fn close(&self) {
        self.subscription.cancel();
    }

    /// The underlying subscription handle.
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Stop receiving and wait for the end reason.
    pub async fn finish(self) -> EndReason {
        self.subscription.wait().await
    }
}

/// Spawn the read loop for a connect future.
///
/// `connect` resolves to the body stream once the response head was accepted.
pub(crate) fn spawn<T, C, S, F, G>(connect: C, on_event: F, on_end: G) -> Result<Subscription>
where
    T: DeserializeOwned + Send + 'static,
    C: Future<Output = Result<S>> + Send + 'static,
    S: Stream<Item = Result<Bytes>> + Send + 'static,
    F: FnMut(StreamEvent<T>) + Send + 'static,
    G: FnOnce(EndReason) + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;

    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(SubscriptionState::Connecting);
    let counters = Arc::new(Counters::default());

    let task = runtime.spawn({
        let cancel = cancel.clone();
        let counters = Arc::clone(&counters);
        async move {
            let reason = AssertUnwindSafe(read_loop(
                connect, &cancel, &state_tx, &counters, on_event,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                EndReason::Failed(Arc::new(StreamError::Transport(format!(
                    "event handler panicked: {}",
                    panic_message(&*panic)
                ))))
            });
            match &reason {
                EndReason::Completed => tracing::debug!(
                    events = counters.delivered.load(Ordering::Relaxed),
                    "event stream completed"
                ),
                EndReason::Cancelled => tracing::debug!("event stream cancelled"),
                EndReason::Failed(e) => tracing::warn!(error = %e, "event stream failed"),
            }
            on_end(reason.clone());
            state_tx.send_replace(SubscriptionState::Closed);
            reason
        }
    });

    Ok(Subscription {
        cancel,
        state: state_rx,
        counters,
        task: Some(task),
        cancel_on_drop: true,
    })
}

async fn read_loop<T, C, S, F>(
    connect: C,
    cancel: &CancellationToken,
    state: &watch::Sender<SubscriptionState>,
    counters: &Counters,
    mut on_event: F,
) -> EndReason
where
    T: DeserializeOwned,
    C: Future<Output = Result<S>>,
    S: Stream<Item = Result<Bytes>>,
    F: FnMut(StreamEvent<T>),
{
    let body = tokio::select! {
        biased;
        () = cancel.cancelled() => return EndReason::Cancelled,
        res = connect => match res {
            Ok(body) => body,
            Err(e) => return EndReason::Failed(Arc::new(e)),
        },
    };
    state.send_replace(SubscriptionState::Streaming);

    let mut body = std::pin::pin!(body);
    let mut decoder = EventDecoder::<T>::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return EndReason::Cancelled,
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                let events = decoder.push(&chunk);
                counters.skipped.store(decoder.skipped(), Ordering::Relaxed);
                if !deliver(events, cancel, counters, &mut on_event) {
                    return EndReason::Cancelled;
                }
            }
            Some(Err(e)) => {
                if !decoder.pending().is_empty() {
                    tracing::debug!(
                        bytes = decoder.pending().len(),
                        "dropping unterminated line after read error"
                    );
                }
                return EndReason::Failed(Arc::new(e));
            }
            None => break,
        }
    }

    state.send_replace(SubscriptionState::Draining);
    let events = decoder.finish();
    counters.skipped.store(decoder.skipped(), Ordering::Relaxed);
    if !deliver(events, cancel, counters, &mut on_event) {
        return EndReason::Cancelled;
    }
    EndReason::Completed
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Hand events to the handler in order. Returns false if cancelled midway.
fn deliver<T, F>(
    events: Vec<StreamEvent<T>>,
    cancel: &CancellationToken,
    counters: &Counters,
    on_event: &mut F,
) -> bool
where
    F: FnMut(StreamEvent<T>),
{
    for event in events {
        if cancel.is_cancelled() {
            return false;
        }
        on_event(event);
        counters.delivered.fetch_add(1, Ordering::Relaxed);
    }
    true
}
