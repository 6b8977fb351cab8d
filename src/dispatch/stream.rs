//! Streaming answers.
//!
//! A producer task drives the model and tools and pushes text fragments
//! through a bounded channel. The producer waits when the consumer is slow and
//! stops at its next send once the consumer has dropped the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Dispatcher, Query, Turn, upstream};
use crate::chat::{GenerationDelta, ToolCallAccumulator};
use crate::error::DispatchError;

/// Fragments buffered between producer and consumer.
const CHANNEL_CAPACITY: usize = 16;

type Fragment = Result<String, DispatchError>;

/// Ordered, single-consumer stream of answer fragments.
///
/// A failure is delivered as a final `Err` item, after which the stream ends.
/// Dropping the stream cancels the remaining work; a tool call that is
/// already running still completes.
pub struct AnswerStream {
    rx: mpsc::Receiver<Fragment>,
}

impl AnswerStream {
    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String, DispatchError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for AnswerStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub(super) fn spawn(dispatcher: Dispatcher, query: Query, turn: Turn) -> AnswerStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        dispatcher.produce(query, turn, tx).await;
    });
    AnswerStream { rx }
}

/// How a producer run ended without error.
enum Outcome {
    Answered(String),
    Cancelled,
}

impl Dispatcher {
    async fn produce(self, query: Query, mut turn: Turn, tx: mpsc::Sender<Fragment>) {
        match self.stream_rounds(&query, &mut turn, &tx).await {
            Ok(Outcome::Answered(answer)) => self.remember(&query, &answer).await,
            Ok(Outcome::Cancelled) => debug!("Answer stream dropped by consumer"),
            Err(e) => {
                // Nobody to tell if the consumer is gone.
                let _ = tx.send(Err(e)).await;
            }
        }
    }

    async fn stream_rounds(
        &self,
        query: &Query,
        turn: &mut Turn,
        tx: &mpsc::Sender<Fragment>,
    ) -> Result<Outcome, DispatchError> {
        let mut answer = String::new();

        for round in 0..=self.max_tool_rounds {
            if tx.is_closed() {
                return Ok(Outcome::Cancelled);
            }

            let mut deltas = self.model.stream(turn.request()).await.map_err(upstream)?;
            let mut content = String::new();
            let mut calls = ToolCallAccumulator::new();

            while let Some(delta) = deltas.next().await {
                match delta.map_err(upstream)? {
                    GenerationDelta::Text(text) if text.is_empty() => {}
                    GenerationDelta::Text(text) => {
                        content.push_str(&text);
                        if tx.send(Ok(text)).await.is_err() {
                            return Ok(Outcome::Cancelled);
                        }
                    }
                    GenerationDelta::ToolCall {
                        index,
                        id,
                        name,
                        arguments,
                    } => calls.push(index, id, name, &arguments),
                }
            }
            answer.push_str(&content);

            if calls.is_empty() {
                return Ok(Outcome::Answered(answer));
            }
            if round == self.max_tool_rounds {
                break;
            }
            if tx.is_closed() {
                return Ok(Outcome::Cancelled);
            }

            let calls = calls.finish();
            let results = self.run_tool_calls(&calls, turn, query).await?;
            turn.push_tool_round(content, calls, results);
        }

        Err(self.round_limit_exceeded())
    }
}
