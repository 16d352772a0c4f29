//! AI room pipeline: per-room message buffering and single-flight dispatch
//! to the text-generation backend.
//!
//! A burst of chat lines must not turn into one backend call per line. Each
//! incoming line is appended to the room's pending buffer; whoever flips the
//! `busy` flag from false to true becomes the worker and drains the buffer in
//! batches until it is empty, one backend call per batch. Lines arriving
//! while a call is in flight are picked up by the next drain iteration, so a
//! room never has more than one call in flight.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::rooms::RoomRegistry;

/// Errors from the text-generation backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request could not be sent or the backend answered with an error
    /// status
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a body the client could not interpret
    #[error("backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Port to the external text-generation backend.
///
/// Implementations must be safe to share between rooms; the pipeline
/// guarantees at most one in-flight call per room but different rooms may
/// call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce one reply for the assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

struct AiState {
    /// Full in-memory room history: user lines and bot replies in order
    transcript: Vec<String>,
    /// Lines waiting for the next batch, in arrival order
    pending: Vec<String>,
    /// True iff a dispatch worker currently owns the buffer
    busy: bool,
}

/// Per-room AI state: system prompt, transcript, pending buffer and the
/// single-flight flag, all guarded by one lock so the busy transition and the
/// buffer are checked atomically.
pub struct AiRoom {
    system_prompt: String,
    state: Mutex<AiState>,
}

impl AiRoom {
    pub fn new(system_prompt: String) -> Self {
        Self {
            system_prompt,
            state: Mutex::new(AiState {
                transcript: Vec::new(),
                pending: Vec::new(),
                busy: false,
            }),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Snapshot of the room transcript.
    pub async fn transcript(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.transcript.clone()
    }

    /// Append a line to the pending buffer and try to claim the worker role.
    ///
    /// # Returns
    ///
    /// `true` iff the caller flipped `busy` and must now run the drain loop;
    /// `false` means an existing worker will pick the line up.
    async fn enqueue(&self, line: String) -> bool {
        let mut state = self.state.lock().await;
        state.pending.push(line);
        if state.busy {
            false
        } else {
            state.busy = true;
            true
        }
    }

    /// Take the whole pending buffer, or release the worker role.
    ///
    /// Checking emptiness and clearing `busy` happen under the same lock as
    /// `enqueue`, so a line racing with the release either lands in the batch
    /// or claims a new worker; nothing is stranded.
    async fn take_batch(&self) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            state.busy = false;
            return None;
        }
        Some(std::mem::take(&mut state.pending))
    }

    /// Record a completed batch and its reply in the transcript.
    async fn record(&self, batch: Vec<String>, reply: &str) {
        let mut state = self.state.lock().await;
        state.transcript.extend(batch);
        state.transcript.push(format!("Bot: {reply}"));
    }
}

/// Concatenate the system prompt and a batch into a single prompt, newline
/// separated, preserving arrival order.
pub fn build_prompt(system_prompt: &str, batch: &[String]) -> String {
    let mut prompt = String::from(system_prompt);
    for line in batch {
        prompt.push('\n');
        prompt.push_str(line);
    }
    prompt
}

/// Feed one chat line into an AI room.
///
/// If the line claims the worker role, the drain loop runs on its own task:
/// it must survive the submitter's connection closing, since there is no
/// cross-task cancellation of a claimed worker.
pub async fn submit(
    ai: Arc<AiRoom>,
    rooms: Arc<RoomRegistry>,
    generator: Arc<dyn TextGenerator>,
    room: String,
    line: String,
) {
    if ai.enqueue(line).await {
        tokio::spawn(run_worker(ai, rooms, generator, room));
    }
}

/// Drain loop of the single-flight worker: one backend call per batch until
/// the buffer stays empty.
async fn run_worker(
    ai: Arc<AiRoom>,
    rooms: Arc<RoomRegistry>,
    generator: Arc<dyn TextGenerator>,
    room: String,
) {
    while let Some(batch) = ai.take_batch().await {
        let prompt = build_prompt(ai.system_prompt(), &batch);
        tracing::debug!("Dispatching batch of {} line(s) for room '{}'", batch.len(), room);
        let reply = match generator.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Backend call for room '{}' failed: {}", room, e);
                format!("[AI Error: {e}]")
            }
        };
        ai.record(batch, &reply).await;
        rooms.broadcast(&room, &format!("Bot: {reply}"), None).await;
    }
}
