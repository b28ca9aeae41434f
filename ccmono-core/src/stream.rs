//! Typed event streams for LLM responses
//!
//! An [`EventStream`] carries a bounded sequence of events plus a one-shot
//! terminal result. The sender half lives in the provider adapter; the
//! consumer half is owned by the agent loop. Closing either half cancels the
//! stream's token, so adapters blocked on the wire unwind promptly.
//!
//! Tool-call arguments arrive from vendors as concatenated JSON fragments;
//! adapters buffer them (see [`crate::provider::ToolCallBuffer`]) and surface
//! completed calls in the terminal result rather than as per-chunk events.

use crate::types::{AssistantMessage, StopReason, ToolCall, Usage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Default bound of the event channel.
pub const DEFAULT_STREAM_BUFFER: usize = 100;

/// Errors observable on a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The stream was closed before a terminal result was delivered.
    #[error("stream is closed")]
    Closed,
    /// The stream's cancellation token fired.
    #[error("stream cancelled")]
    Cancelled,
    /// The sender reported a failure.
    #[error("stream error: {0}")]
    Failed(String),
}

/// A normalized event in an assistant response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmEvent {
    /// Stream opened.
    Start,
    /// Incremental text output.
    TextDelta { delta: String },
    /// Incremental thinking output.
    ThinkingDelta { delta: String },
    /// A complete tool call. Only emitted mid-stream when the adapter can
    /// attest the arguments are complete; normally tool calls appear in the
    /// terminal result instead.
    ToolCall(ToolCall),
    /// Token usage update.
    Usage(Usage),
    /// Logical end of content. The stream stays open until closed.
    End { stop_reason: StopReason },
    /// Stream-level failure.
    Error { error: String },
}

/// Stream of [`LlmEvent`]s terminating in a completed [`AssistantMessage`].
pub type AssistantEventStream = EventStream<LlmEvent, AssistantMessage>;
/// Sender half of an [`AssistantEventStream`].
pub type AssistantStreamSender = StreamSender<LlmEvent, AssistantMessage>;

struct Shared {
    cancel: CancellationToken,
    closed: AtomicBool,
    error: Mutex<Option<String>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn error(&self) -> Option<String> {
        self.error.lock().map(|g| g.clone()).unwrap_or(None)
    }
}

/// Producer half of an event stream.
pub struct StreamSender<T, R> {
    events: Mutex<Option<mpsc::Sender<T>>>,
    result: Mutex<Option<oneshot::Sender<R>>>,
    shared: Arc<Shared>,
}

/// Consumer half of an event stream.
pub struct EventStream<T, R> {
    events: mpsc::Receiver<T>,
    result: Option<oneshot::Receiver<R>>,
    shared: Arc<Shared>,
    buffer: usize,
}

/// Create a linked sender/stream pair bound to `cancel`.
pub fn channel<T, R>(
    cancel: CancellationToken,
    buffer: usize,
) -> (StreamSender<T, R>, EventStream<T, R>) {
    let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
    let (result_tx, result_rx) = oneshot::channel();
    let shared = Arc::new(Shared {
        cancel,
        closed: AtomicBool::new(false),
        error: Mutex::new(None),
    });
    let sender = StreamSender {
        events: Mutex::new(Some(event_tx)),
        result: Mutex::new(Some(result_tx)),
        shared: Arc::clone(&shared),
    };
    let stream = EventStream {
        events: event_rx,
        result: Some(result_rx),
        shared,
        buffer: buffer.max(1),
    };
    (sender, stream)
}

/// Create an assistant stream pair with the default buffer.
pub fn assistant_channel(
    cancel: CancellationToken,
) -> (AssistantStreamSender, AssistantEventStream) {
    channel(cancel, DEFAULT_STREAM_BUFFER)
}

impl<T, R> StreamSender<T, R> {
    /// Send one event, waiting for buffer space.
    ///
    /// Fails once the stream is closed or cancelled.
    pub async fn send_event(&self, event: T) -> Result<(), StreamError> {
        if self.shared.is_closed() {
            return Err(StreamError::Closed);
        }
        let tx = self
            .events
            .lock()
            .ok()
            .and_then(|g| g.clone())
            .ok_or(StreamError::Closed)?;
        // Biased toward delivery: buffered capacity beats a racing cancel,
        // so consumers observe every event sent before the terminal.
        tokio::select! {
            biased;
            sent = tx.send(event) => sent.map_err(|_| StreamError::Closed),
            _ = self.shared.cancel.cancelled() => Err(StreamError::Cancelled),
        }
    }

    /// Deliver the terminal result and close the stream.
    ///
    /// The result is delivered at most once.
    pub fn send_result(&self, result: R) -> Result<(), StreamError> {
        if self.shared.is_closed() {
            return Err(StreamError::Closed);
        }
        let tx = self
            .result
            .lock()
            .ok()
            .and_then(|mut g| g.take())
            .ok_or(StreamError::Closed)?;
        // The receiver may already be gone; the stream still closes.
        let _ = tx.send(result);
        self.close();
        Ok(())
    }

    /// Record a failure and close the stream. After this, the consumer
    /// observes channel close and `error()` returns the cause.
    pub fn send_error(&self, error: impl Into<String>) {
        if let Ok(mut guard) = self.shared.error.lock() {
            guard.get_or_insert(error.into());
        }
        self.close();
    }

    /// Close the stream. Idempotent; cancels the bound token.
    pub fn close(&self) {
        self.shared.close();
        if let Ok(mut guard) = self.events.lock() {
            guard.take();
        }
        if let Ok(mut guard) = self.result.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Token the stream is bound to; adapters select on it while reading the wire.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

impl<T, R> EventStream<T, R> {
    /// Receive the next event.
    ///
    /// Buffered events are always delivered. The stream ends (`None`) once
    /// the sender is gone and the buffer is drained, or after an explicit
    /// close of this stream.
    pub async fn recv(&mut self) -> Option<T> {
        if self.shared.is_closed() {
            return self.events.try_recv().ok();
        }
        tokio::select! {
            biased;
            event = self.events.recv() => event,
            _ = self.shared.cancel.cancelled() => {
                if self.shared.is_closed() {
                    return self.events.try_recv().ok();
                }
                // The context was cancelled out from under a live sender;
                // it observes the cancel and drops, which ends the channel.
                self.events.recv().await
            }
        }
    }

    /// Await the terminal result.
    pub async fn result(&mut self) -> Result<R, StreamError> {
        let rx = self.result.take().ok_or(StreamError::Closed)?;
        match rx.await {
            Ok(result) => Ok(result),
            Err(_) => match self.shared.error() {
                Some(cause) => Err(StreamError::Failed(cause)),
                None if self.shared.cancel.is_cancelled() && !self.shared.is_closed() => {
                    Err(StreamError::Cancelled)
                }
                None => Err(StreamError::Closed),
            },
        }
    }

    /// Failure recorded by the sender, if any.
    pub fn error(&self) -> Option<String> {
        self.shared.error()
    }

    /// Close the stream from the consumer side. Idempotent; the sender's
    /// next send fails.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Token the stream is bound to.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

impl<T, R> EventStream<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Derive a stream with each event transformed by `f`.
    pub fn map<U, F>(mut self, f: F) -> EventStream<U, R>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        let (sender, stream) = channel(self.shared.cancel.child_token(), self.buffer);
        tokio::spawn(async move {
            while let Some(event) = self.recv().await {
                if sender.send_event(f(event)).await.is_err() {
                    return;
                }
            }
            forward_terminal(self, &sender).await;
        });
        stream
    }

    /// Derive a stream containing only events passing `pred`.
    pub fn filter<F>(mut self, pred: F) -> EventStream<T, R>
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        let (sender, stream) = channel(self.shared.cancel.child_token(), self.buffer);
        tokio::spawn(async move {
            while let Some(event) = self.recv().await {
                if pred(&event) && sender.send_event(event).await.is_err() {
                    return;
                }
            }
            forward_terminal(self, &sender).await;
        });
        stream
    }

    /// Broadcast this stream to `n` derived consumers. Every consumer sees
    /// every event and the terminal result.
    pub fn tee(mut self, n: usize) -> Vec<EventStream<T, R>>
    where
        T: Clone,
        R: Clone,
    {
        let mut senders = Vec::with_capacity(n);
        let mut streams = Vec::with_capacity(n);
        for _ in 0..n {
            let (sender, stream) =
                channel(self.shared.cancel.child_token(), self.buffer);
            senders.push(sender);
            streams.push(stream);
        }
        tokio::spawn(async move {
            while let Some(event) = self.recv().await {
                for sender in &senders {
                    let _ = sender.send_event(event.clone()).await;
                }
            }
            match self.result().await {
                Ok(result) => {
                    for sender in &senders {
                        let _ = sender.send_result(result.clone());
                    }
                }
                Err(err) => {
                    for sender in &senders {
                        propagate_error(&err, sender);
                    }
                }
            }
        });
        streams
    }

    /// Interleave events from several streams into one. The first terminal
    /// result to arrive wins; the merged stream closes once all sources are
    /// drained.
    pub fn merge(sources: Vec<EventStream<T, R>>) -> EventStream<T, R> {
        let cancel = CancellationToken::new();
        let (sender, stream) = channel(cancel, DEFAULT_STREAM_BUFFER);
        let sender = Arc::new(sender);
        let mut tasks = Vec::with_capacity(sources.len());
        for mut source in sources {
            let sender = Arc::clone(&sender);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = source.recv().await {
                    if sender.send_event(event).await.is_err() {
                        return None;
                    }
                }
                source.result().await.ok()
            }));
        }
        // Deliver a result only once every source has drained, so no
        // source's events are cut off by an early terminal.
        tokio::spawn(async move {
            let mut merged_result = None;
            for task in tasks {
                if let Ok(Some(result)) = task.await {
                    merged_result.get_or_insert(result);
                }
            }
            match merged_result {
                Some(result) => {
                    let _ = sender.send_result(result);
                }
                None => sender.close(),
            }
        });
        stream
    }

    /// Fold all events into an accumulator. Fails if the sender reported an
    /// error.
    pub async fn reduce<A, F>(mut self, init: A, mut f: F) -> Result<A, StreamError>
    where
        F: FnMut(A, T) -> A,
    {
        let mut acc = init;
        while let Some(event) = self.recv().await {
            acc = f(acc, event);
        }
        match self.shared.error() {
            Some(cause) => Err(StreamError::Failed(cause)),
            None => Ok(acc),
        }
    }

    /// Discard all events and await the terminal result.
    pub async fn drain(mut self) -> Result<R, StreamError> {
        while self.recv().await.is_some() {}
        self.result().await
    }

    /// Apply `f` to each event, then await the terminal result.
    pub async fn for_each<F>(mut self, mut f: F) -> Result<R, StreamError>
    where
        F: FnMut(&T),
    {
        while let Some(event) = self.recv().await {
            f(&event);
        }
        self.result().await
    }
}

async fn forward_terminal<T, U, R>(mut source: EventStream<T, R>, sender: &StreamSender<U, R>) {
    match source.result().await {
        Ok(result) => {
            let _ = sender.send_result(result);
        }
        Err(err) => propagate_error(&err, sender),
    }
}

fn propagate_error<T, R>(err: &StreamError, sender: &StreamSender<T, R>) {
    match err {
        StreamError::Failed(cause) => sender.send_error(cause.clone()),
        StreamError::Cancelled | StreamError::Closed => sender.close(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Content;

    fn assistant(text: &str) -> AssistantMessage {
        AssistantMessage::new(
            vec![Content::text(text)],
            "mock",
            "mock-1",
            Usage::new(1, 1),
            StopReason::EndTurn,
        )
    }

    #[tokio::test]
    async fn events_then_result_in_order() {
        let (tx, mut rx) = assistant_channel(CancellationToken::new());
        tx.send_event(LlmEvent::Start).await.unwrap();
        tx.send_event(LlmEvent::TextDelta {
            delta: "Hi".into(),
        })
        .await
        .unwrap();
        tx.send_result(assistant("Hi")).unwrap();

        assert_eq!(rx.recv().await, Some(LlmEvent::Start));
        assert!(matches!(rx.recv().await, Some(LlmEvent::TextDelta { .. })));
        assert_eq!(rx.recv().await, None);
        let result = rx.result().await.unwrap();
        assert_eq!(crate::types::extract_text(&result.content), "Hi");
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (tx, rx) = assistant_channel(CancellationToken::new());
        rx.close();
        let err = tx.send_event(LlmEvent::Start).await.unwrap_err();
        assert!(matches!(err, StreamError::Closed | StreamError::Cancelled));
        assert!(tx.send_result(assistant("x")).is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (tx, rx) = assistant_channel(CancellationToken::new());
        tx.close();
        tx.close();
        rx.close();
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn error_surfaces_after_channel_close() {
        let (tx, mut rx) = assistant_channel(CancellationToken::new());
        tx.send_error("connection reset");
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.error().as_deref(), Some("connection reset"));
        assert_eq!(
            rx.result().await,
            Err(StreamError::Failed("connection reset".into()))
        );
    }

    #[tokio::test]
    async fn closing_stream_cancels_token() {
        let token = CancellationToken::new();
        let (tx, _rx) = assistant_channel(token.clone());
        tx.close();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn map_transforms_events_and_forwards_result() {
        let (tx, rx) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        let mut doubled = rx.map(|n| n * 2);
        tx.send_event(2).await.unwrap();
        tx.send_event(3).await.unwrap();
        tx.send_result(assistant("done")).unwrap();

        assert_eq!(doubled.recv().await, Some(4));
        assert_eq!(doubled.recv().await, Some(6));
        assert_eq!(doubled.recv().await, None);
        assert!(doubled.result().await.is_ok());
    }

    #[tokio::test]
    async fn filter_drops_events() {
        let (tx, rx) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        let mut odd = rx.filter(|n| n % 2 == 1);
        for n in 1..=4 {
            tx.send_event(n).await.unwrap();
        }
        tx.send_result(assistant("done")).unwrap();

        assert_eq!(odd.recv().await, Some(1));
        assert_eq!(odd.recv().await, Some(3));
        assert_eq!(odd.recv().await, None);
    }

    #[tokio::test]
    async fn tee_duplicates_to_all_consumers() {
        let (tx, rx) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        let mut outs = rx.tee(2);
        tx.send_event(7).await.unwrap();
        tx.send_result(assistant("done")).unwrap();

        let mut b = outs.pop().unwrap();
        let mut a = outs.pop().unwrap();
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert!(a.result().await.is_ok());
        assert!(b.result().await.is_ok());
    }

    #[tokio::test]
    async fn merge_interleaves_sources() {
        let (tx1, rx1) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        let (tx2, rx2) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        let mut merged = EventStream::merge(vec![rx1, rx2]);

        tx1.send_event(1).await.unwrap();
        tx2.send_event(2).await.unwrap();
        tx1.send_result(assistant("one")).unwrap();
        tx2.close();

        let mut seen = Vec::new();
        while let Some(n) = merged.recv().await {
            seen.push(n);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        assert!(merged.result().await.is_ok());
    }

    #[tokio::test]
    async fn reduce_folds_events() {
        let (tx, rx) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        tokio::spawn(async move {
            for n in 1..=4 {
                tx.send_event(n).await.unwrap();
            }
            tx.send_result(assistant("done")).unwrap();
        });
        let sum = rx.reduce(0u32, |acc, n| acc + n).await.unwrap();
        assert_eq!(sum, 10);
    }

    #[tokio::test]
    async fn drain_returns_result() {
        let (tx, rx) = assistant_channel(CancellationToken::new());
        tokio::spawn(async move {
            tx.send_event(LlmEvent::Start).await.unwrap();
            tx.send_result(assistant("final")).unwrap();
        });
        let result = rx.drain().await.unwrap();
        assert_eq!(crate::types::extract_text(&result.content), "final");
    }

    #[tokio::test]
    async fn for_each_visits_every_event() {
        let (tx, rx) = channel::<u32, AssistantMessage>(CancellationToken::new(), 8);
        tokio::spawn(async move {
            for n in [1u32, 2, 3] {
                tx.send_event(n).await.unwrap();
            }
            tx.send_result(assistant("done")).unwrap();
        });
        let mut seen = Vec::new();
        let result = rx.for_each(|n| seen.push(*n)).await.unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(crate::types::extract_text(&result.content), "done");
    }

    #[tokio::test]
    async fn result_is_delivered_at_most_once() {
        let (tx, mut rx) = assistant_channel(CancellationToken::new());
        tx.send_result(assistant("first")).unwrap();
        assert!(tx.send_result(assistant("second")).is_err());
        assert!(rx.result().await.is_ok());
        assert_eq!(rx.result().await, Err(StreamError::Closed));
    }
}
