//! Deterministic in-memory fakes for the store, provider, and continuity
//! seams, shared by the unit tests in this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use mirror_llm::{
    LlmProvider, ProviderResult, ProviderStreamHandle, ProviderWorker, StreamEvent, StreamRequest,
    make_event_stream,
};
use mirror_storage::{
    ClientId, ConversationStore, SessionDocument, SessionId, StorageError, StorageResult,
    StoredTurn,
};

use super::identity::ContinuitySignals;

/// In-memory conversation store with switchable read/write failure.
#[derive(Default)]
pub(crate) struct MemoryStore {
    documents: Mutex<HashMap<String, SessionDocument>>,
    clock: AtomicU64,
    reads_fail: AtomicBool,
    writes_fail: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn fail_reads(&self, fail: bool) {
        self.reads_fail.store(fail, Ordering::Relaxed);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::Relaxed);
    }

    pub(crate) fn document_count(&self) -> usize {
        self.documents.lock().len()
    }

    fn outage(stage: &'static str) -> StorageError {
        StorageError::InvariantViolation {
            stage,
            details: "simulated store outage".to_string(),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn fetch(&self, session_id: &SessionId) -> StorageResult<Option<SessionDocument>> {
        if self.reads_fail.load(Ordering::Relaxed) {
            return Err(Self::outage("memory-store-fetch"));
        }

        Ok(self.documents.lock().get(session_id.as_str()).cloned())
    }

    async fn upsert(
        &self,
        session_id: &SessionId,
        owner_id: &ClientId,
        turns: &[StoredTurn],
    ) -> StorageResult<SessionDocument> {
        if self.writes_fail.load(Ordering::Relaxed) {
            return Err(Self::outage("memory-store-upsert"));
        }

        let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        let mut documents = self.documents.lock();
        let created_at = documents
            .get(session_id.as_str())
            .map_or(now, |existing| existing.created_at_unix_seconds);

        let document = SessionDocument {
            session_id: session_id.clone(),
            owner_id: owner_id.clone(),
            turns: turns.to_vec(),
            message_count: turns.len() as u64,
            created_at_unix_seconds: created_at,
            last_updated_unix_seconds: now,
        };
        documents.insert(session_id.as_str().to_string(), document.clone());

        Ok(document)
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<bool> {
        if self.writes_fail.load(Ordering::Relaxed) {
            return Err(Self::outage("memory-store-delete"));
        }

        Ok(self.documents.lock().remove(session_id.as_str()).is_some())
    }

    async fn list_by_owner(
        &self,
        owner_id: &ClientId,
        limit: u32,
    ) -> StorageResult<Vec<SessionDocument>> {
        if self.reads_fail.load(Ordering::Relaxed) {
            return Err(Self::outage("memory-store-list"));
        }

        let mut owned: Vec<SessionDocument> = self
            .documents
            .lock()
            .values()
            .filter(|document| document.owner_id == *owner_id)
            .cloned()
            .collect();

        owned.sort_by(|left, right| {
            right
                .last_updated_unix_seconds
                .cmp(&left.last_updated_unix_seconds)
                .then_with(|| right.session_id.cmp(&left.session_id))
        });
        owned.truncate(limit as usize);

        Ok(owned)
    }
}

/// Continuity fake backed by two plain maps, with write counters.
#[derive(Default)]
pub(crate) struct RecordingSignals {
    address: Mutex<HashMap<String, String>>,
    durable: Mutex<HashMap<String, String>>,
    address_writes: AtomicUsize,
    durable_writes: AtomicUsize,
}

impl RecordingSignals {
    pub(crate) fn seed_address(&self, key: &str, value: &str) {
        self.address.lock().insert(key.to_string(), value.to_string());
    }

    pub(crate) fn clear_address(&self, key: &str) {
        self.address.lock().remove(key);
    }

    pub(crate) fn seed_token(&self, key: &str, value: &str) {
        self.durable.lock().insert(key.to_string(), value.to_string());
    }

    pub(crate) fn address_value(&self, key: &str) -> Option<String> {
        self.address.lock().get(key).cloned()
    }

    pub(crate) fn token_value(&self, key: &str) -> Option<String> {
        self.durable.lock().get(key).cloned()
    }

    pub(crate) fn address_write_count(&self) -> usize {
        self.address_writes.load(Ordering::Relaxed)
    }

    pub(crate) fn durable_write_count(&self) -> usize {
        self.durable_writes.load(Ordering::Relaxed)
    }
}

impl ContinuitySignals for RecordingSignals {
    fn address_param(&self, key: &str) -> Option<String> {
        self.address.lock().get(key).cloned()
    }

    fn set_address_param(&self, key: &str, value: &str) {
        self.address_writes.fetch_add(1, Ordering::Relaxed);
        self.address.lock().insert(key.to_string(), value.to_string());
    }

    fn read_token(&self, key: &str) -> Option<String> {
        self.durable.lock().get(key).cloned()
    }

    fn write_token(&self, key: &str, value: &str) {
        self.durable_writes.fetch_add(1, Ordering::Relaxed);
        self.durable.lock().insert(key.to_string(), value.to_string());
    }
}

/// Provider fake that replays scripted event sequences and records every
/// request it receives.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().push_back(events);
    }

    pub(crate) fn recorded_requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted fake"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        self.requests.lock().push(request);

        // An unscripted call replays nothing: the stream ends without a
        // terminal event, which consumers treat as a provider failure.
        let events = self.scripts.lock().pop_front().unwrap_or_default();
        let (event_tx, stream, _cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(async move {
            for event in events {
                let _ = event_tx.send(event);
            }
        });

        Ok(ProviderStreamHandle { stream, worker })
    }
}
