//! The per-turn stream aggregation state machine.
//!
//! Consumes the backend chunk stream, accumulates content into the current
//! assistant message, splits the turn into further messages on `NewMessage`
//! chunks (when the backend is flagged for it), and finalizes every message
//! exactly once. Conceptually the turn moves
//! `Starting -> Streaming -> Finalizing -> Done`; the aggregator owns all of
//! the mutable state for that walk, so there are no shared-closure cycles.

use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{Chunk, ChunkStream};
use crate::models::{new_message_id, AssistantMetadata, Message};
use crate::store::MessageStore;
use crate::transport::{SignalSink, StreamSignal};

use super::codes;

/// What a finished turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Finalized assistant messages, in emission order.
    pub messages: Vec<Message>,
    /// Durable writes that failed and were swallowed.
    pub persist_failures: usize,
    /// The turn stopped early (client disconnect or external cancel).
    pub cancelled: bool,
}

pub struct TurnAggregator {
    current: Message,
    buffer: String,
    finished: Vec<Message>,
    agent_type: String,
    multi_message: bool,
    started_at: Instant,
    persist_failures: usize,
}

impl TurnAggregator {
    /// `first_message` is the pending assistant message already announced to
    /// the client in `STREAM_START`.
    pub fn new(first_message: Message, agent_type: impl Into<String>, multi_message: bool) -> Self {
        Self {
            current: first_message,
            buffer: String::new(),
            finished: Vec::new(),
            agent_type: agent_type.into(),
            multi_message,
            started_at: Instant::now(),
            persist_failures: 0,
        }
    }

    /// Drive the stream to completion.
    ///
    /// Always finalizes: whatever path exits the read loop, the current
    /// message is persisted (success with accumulated content, or error) and
    /// `End` is offered to the sink.
    pub async fn run(
        mut self,
        mut stream: ChunkStream,
        sink: &dyn SignalSink,
        store: &dyn MessageStore,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let mut fatal: Option<String> = None;
        let mut stopped_early = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(message_id = %self.current.id, "turn cancelled, finalizing");
                    stopped_early = true;
                    break;
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(message_id = %self.current.id, error = %e, "backend stream failed");
                    let detail = e.to_string();
                    let _ = sink
                        .send(StreamSignal::Error {
                            code: codes::STREAM_ERROR.to_string(),
                            message: "backend stream interrupted".to_string(),
                            detail: detail.clone(),
                        })
                        .await;
                    fatal = Some(detail);
                    break;
                }
            };

            match chunk {
                Chunk::Content(text) => {
                    self.buffer.push_str(&text);
                    if sink
                        .send(StreamSignal::Text { content: text })
                        .await
                        .is_err()
                    {
                        stopped_early = true;
                        break;
                    }
                }
                Chunk::Metadata(map) => {
                    self.current.apply_backend_metadata(&map);
                }
                Chunk::NewMessage(metadata) => {
                    if !self.multi_message {
                        warn!(
                            message_id = %self.current.id,
                            "backend sent new-message split without the capability, ignoring"
                        );
                        continue;
                    }
                    self.rotate(store).await;
                    if sink.send(StreamSignal::NewMessage).await.is_err() {
                        stopped_early = true;
                        break;
                    }
                    // Any metadata on the split chunk seeds the fresh message.
                    if let Some(map) = metadata {
                        self.current.apply_backend_metadata(&map);
                    }
                    // The client learns the new message id the same way it
                    // learned the first one.
                    if sink
                        .send(StreamSignal::Start {
                            message_id: self.current.id.clone(),
                            conversation_id: self.current.conversation_id.clone(),
                        })
                        .await
                        .is_err()
                    {
                        stopped_early = true;
                        break;
                    }
                }
                Chunk::Done(metadata) => {
                    if let Some(map) = metadata {
                        self.current.apply_backend_metadata(&map);
                    }
                    // Trailing metadata may still arrive; keep reading.
                }
                Chunk::Error(message) => {
                    warn!(message_id = %self.current.id, error = %message, "backend chunk error");
                    if sink
                        .send(StreamSignal::Error {
                            code: codes::CHUNK_ERROR.to_string(),
                            message: "backend reported an error".to_string(),
                            detail: message,
                        })
                        .await
                        .is_err()
                    {
                        stopped_early = true;
                        break;
                    }
                }
            }
        }

        // Cancellation must also stop the backend read; dropping the stream
        // tears the connection down.
        drop(stream);

        self.finalize(fatal, store).await;
        let _ = sink.send(StreamSignal::End).await;

        TurnOutcome {
            messages: self.finished,
            persist_failures: self.persist_failures,
            cancelled: stopped_early,
        }
    }

    /// Finalize the current message mid-stream and start the next one.
    /// A segment with no content is dropped rather than persisted.
    async fn rotate(&mut self, store: &dyn MessageStore) {
        if self.buffer.is_empty() {
            debug!(message_id = %self.current.id, "dropping empty message segment");
        } else {
            let content = std::mem::take(&mut self.buffer);
            self.stamp_metadata();
            self.current.set_success(content);
            self.persist(store).await;
        }

        let next = Message::assistant(
            new_message_id(),
            self.current.tenant_id.clone(),
            self.current.conversation_id.clone(),
            self.current.application_id.clone(),
            self.current
                .user_message_id
                .clone()
                .unwrap_or_default(),
        );
        self.current = next;
        self.buffer.clear();
    }

    async fn finalize(&mut self, fatal: Option<String>, store: &dyn MessageStore) {
        self.stamp_metadata();
        match fatal {
            Some(detail) => self.current.set_error(detail),
            None => {
                let content = std::mem::take(&mut self.buffer);
                self.current.set_success(content);
            }
        }
        self.persist(store).await;
    }

    /// Persist the current message and move it to the finished list.
    /// Persistence failures never abort the stream.
    async fn persist(&mut self, store: &dyn MessageStore) {
        if let Err(e) = store.add(&self.current).await {
            warn!(message_id = %self.current.id, error = %e, "failed to persist message");
            self.persist_failures += 1;
        }
        self.finished.push(self.current.clone());
    }

    fn stamp_metadata(&mut self) {
        let meta = self
            .current
            .metadata
            .get_or_insert_with(AssistantMetadata::default);
        meta.latency_ms = self.started_at.elapsed().as_millis() as i64;
        if meta.agent_type.is_empty() {
            meta.agent_type = self.agent_type.clone();
        }
    }
}
