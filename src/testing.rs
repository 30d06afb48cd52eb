//! Mock implementations for testing
//!
//! In-memory stand-ins for the storage, completion and delivery seams.

use crate::llm::{CompletionService, LlmError, Message, OnProgress, Progress};
use crate::router::{EventSink, OutboundEvent, RouterError};
use crate::store::{KvStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Key-value store
// ============================================================================

/// Key-value store backed by a map
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Copy of every stored entry
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Completion service
// ============================================================================

enum MockResponse {
    Reply(Vec<String>),
    Error(LlmError),
    Panic,
}

/// Completion service that replays queued responses
#[derive(Default)]
pub struct MockCompletionService {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<Vec<Message>>>,
    /// When set, each dispatch waits for one permit before answering
    gate: Mutex<Option<Arc<Semaphore>>>,
    started: AtomicUsize,
    started_notify: Notify,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful streamed reply made of `fragments`
    pub fn queue_reply(&self, fragments: &[&str]) {
        let fragments = fragments.iter().map(ToString::to_string).collect();
        self.responses
            .lock()
            .push_back(MockResponse::Reply(fragments));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().push_back(MockResponse::Error(error));
    }

    /// Make the next dispatch panic
    pub fn queue_panic(&self) {
        self.responses.lock().push_back(MockResponse::Panic);
    }

    pub fn recorded_requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    /// Hold every following dispatch until a permit is added to the
    /// returned semaphore. Cancellation still ends a held dispatch.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Wait until `count` dispatches have started
    pub async fn wait_for_in_flight(&self, count: usize) {
        loop {
            let notified = self.started_notify.notified();
            if self.started.load(Ordering::SeqCst) >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    async fn dispatch(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
        on_progress: &OnProgress<'_>,
    ) -> Result<String, LlmError> {
        self.requests.lock().push(messages.to_vec());
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_notify.notify_waiters();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::cancelled()),
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(LlmError::cancelled());
        }

        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockResponse::Error(LlmError::network("No mock response queued")));
        let fragments = match response {
            MockResponse::Reply(fragments) => fragments,
            MockResponse::Error(e) => return Err(e),
            MockResponse::Panic => panic!("mock completion panicked"),
        };

        let mut text = String::new();
        for fragment in &fragments {
            text.push_str(fragment);
            on_progress(Progress::Delta(fragment));
        }
        on_progress(Progress::Done);
        Ok(text)
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Event sink
// ============================================================================

/// Event sink that records deliveries to a fixed set of targets
pub struct RecordingSink {
    targets: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<(String, OutboundEvent)>>,
}

impl RecordingSink {
    pub fn with_targets(targets: &[&str]) -> Self {
        Self {
            targets: Mutex::new(targets.iter().map(ToString::to_string).collect()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Events delivered to `target`, in order
    pub fn events_for(&self, target: &str) -> Vec<OutboundEvent> {
        self.delivered
            .lock()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn is_available(&self, target: &str) -> bool {
        self.targets.lock().contains(target)
    }

    fn deliver(&self, target: &str, event: OutboundEvent) -> Result<(), RouterError> {
        if !self.is_available(target) {
            return Err(RouterError::TargetUnavailable);
        }
        self.delivered.lock().push((target.to_string(), event));
        Ok(())
    }
}
