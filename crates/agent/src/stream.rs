//! Lazy, single-pass event stream over a run.
//!
//! The driver task is spawned on first poll, feeds a bounded channel, and
//! hands the aggregate back over a oneshot once the run ends. Dropping the
//! stream closes the channel, which stops the driver before its next
//! dispatch or tool batch.

use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use toolloop_core::message::Conversation;
use toolloop_core::{Error, Result};

use crate::loop_runner::{EventSink, ToolLoop};
use crate::request::GenerateRequest;
use crate::step::GenerateResult;
use crate::stream_event::StreamEvent;

/// Capacity of the event channel between the driver and the consumer.
const EVENT_BUFFER: usize = 64;

type Starter = Box<dyn FnOnce() + Send>;

/// The streaming result of [`ToolLoop::stream`].
///
/// Iterate it for incremental [`StreamEvent`]s, then call
/// [`TextStream::finish`] for the aggregate.
///
/// The first poll spawns the driver task, so the stream must be polled
/// from within a Tokio runtime.
pub struct TextStream {
    events: ReceiverStream<StreamEvent>,
    outcome: oneshot::Receiver<Result<GenerateResult>>,
    start: Option<Starter>,
}

impl TextStream {
    pub(crate) fn new(
        tool_loop: ToolLoop,
        mut conversation: Conversation,
        request: GenerateRequest,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let start: Starter = Box::new(move || {
            tokio::spawn(async move {
                let sink = EventSink::new(tx);
                let result = tool_loop.drive(&mut conversation, &request, Some(&sink)).await;

                // Best effort: the consumer may already be gone
                match &result {
                    Ok(r) => {
                        let _ = sink
                            .emit(StreamEvent::Finish {
                                finish_reason: r.finish_reason.clone(),
                                usage: r.usage,
                                termination: r.termination,
                                steps: r.steps.len(),
                            })
                            .await;
                    }
                    Err(Error::Cancelled) => {}
                    Err(e) => {
                        let _ = sink
                            .emit(StreamEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }

                let _ = outcome_tx.send(result);
            });
        });

        Self {
            events: ReceiverStream::new(rx),
            outcome: outcome_rx,
            start: Some(start),
        }
    }

    fn ensure_started(&mut self) {
        if let Some(start) = self.start.take() {
            start();
        }
    }

    /// Drain any remaining events and return the aggregate result.
    pub async fn finish(mut self) -> Result<GenerateResult> {
        self.ensure_started();
        while self.events.next().await.is_some() {}
        self.outcome
            .await
            .map_err(|_| Error::Internal("stream driver ended without a result".into()))?
    }
}

impl Stream for TextStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.ensure_started();
        Pin::new(&mut this.events).poll_next(cx)
    }
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream")
            .field("started", &self.start.is_none())
            .finish()
    }
}
