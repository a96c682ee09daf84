//! Session stores: an in-memory map and a RocksDB-backed store.
//!
//! Both implement `try_transition` as one conditional write on `status`, so
//! concurrent resolvers of the same session see exactly one `true`.

use crate::{
    common::traits::SessionStore,
    errors::{StakeError, StakeResult, StorageError},
    games::types::{
        GameSession, NewSession, Outcome, Selection, SelectionUpdate, SessionId, SessionStatus,
    },
    storage::OptimizedStorage,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NEXT_ID_KEY: &[u8] = b"session:next_id";
const RECORD_PREFIX: &str = "session:record:";
const OWNER_INDEX_PREFIX: &[u8] = b"session:owner:";
const OPEN_INDEX_PREFIX: &[u8] = b"session:open:";

/// Reject transitions that would break the lifecycle before touching storage
fn check_transition(expected: SessionStatus, next: SessionStatus, outcome: &Option<Outcome>) -> StakeResult<()> {
    let outcome_matches = outcome.is_some() == (next == SessionStatus::Finished);
    if !expected.can_transition_to(next) || !outcome_matches {
        return Err(StorageError::InvalidTransition { from: expected, to: next }.into());
    }
    Ok(())
}

/// Sessions held in a concurrent map; nothing survives a restart
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, GameSession>,
    next_id: AtomicU64,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, request: NewSession) -> StakeResult<GameSession> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let session = GameSession::open(id, request, Utc::now());
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: SessionId) -> StakeResult<Option<GameSession>> {
        Ok(self.sessions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_selection(&self, id: SessionId, selection: Selection) -> StakeResult<SelectionUpdate> {
        let Some(mut entry) = self.sessions.get_mut(&id) else {
            return Ok(SelectionUpdate::Missing);
        };
        if entry.status != SessionStatus::Open {
            return Ok(SelectionUpdate::NotOpen(entry.status));
        }
        entry.select(selection, Utc::now());
        Ok(SelectionUpdate::Applied)
    }

    async fn try_transition(
        &self,
        id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        outcome: Option<Outcome>,
    ) -> StakeResult<bool> {
        check_transition(expected, next, &outcome)?;

        // The shard write lock held by `get_mut` makes compare and swap one step
        let Some(mut entry) = self.sessions.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }
        entry.settle(next, outcome, Utc::now());
        Ok(true)
    }

    async fn list_by_owner(&self, owner_key: &str, limit: usize) -> StakeResult<Vec<GameSession>> {
        let mut sessions: Vec<GameSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.owner_key == owner_key)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn list_open(&self, limit: usize) -> StakeResult<Vec<GameSession>> {
        let mut sessions: Vec<GameSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.status == SessionStatus::Open)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|session| session.id);
        sessions.truncate(limit);
        Ok(sessions)
    }
}

fn record_key(id: SessionId) -> Vec<u8> {
    format!("{}{:020}", RECORD_PREFIX, id.0).into_bytes()
}

fn owner_prefix(owner_key: &str) -> Vec<u8> {
    // Length-prefixed so one owner key can never be a prefix of another
    let mut key = Vec::with_capacity(OWNER_INDEX_PREFIX.len() + 4 + owner_key.len());
    key.extend_from_slice(OWNER_INDEX_PREFIX);
    key.extend_from_slice(&(owner_key.len() as u32).to_be_bytes());
    key.extend_from_slice(owner_key.as_bytes());
    key
}

fn owner_index_key(owner_key: &str, id: SessionId) -> Vec<u8> {
    // Newest first: inverted id as the sort key
    let mut key = owner_prefix(owner_key);
    key.extend_from_slice(&(u64::MAX - id.0).to_be_bytes());
    key
}

fn open_index_key(id: SessionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(OPEN_INDEX_PREFIX.len() + 8);
    key.extend_from_slice(OPEN_INDEX_PREFIX);
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

fn trailing_u64(key: &[u8]) -> StakeResult<u64> {
    let Some(tail) = key.len().checked_sub(8).map(|off| &key[off..]) else {
        return Err(StorageError::CorruptedData("Index key too short".to_string()).into());
    };
    let bytes: [u8; 8] = tail
        .try_into()
        .map_err(|_| StorageError::CorruptedData("Index key too short".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_session(id: SessionId, bytes: &[u8]) -> StakeResult<GameSession> {
    serde_json::from_slice(bytes).map_err(|e| {
        StakeError::Storage(StorageError::CorruptedData(format!(
            "Failed to decode session {}: {}",
            id, e
        )))
    })
}

fn encode_session(session: &GameSession) -> StakeResult<Vec<u8>> {
    serde_json::to_vec(session).map_err(|e| {
        StakeError::Storage(StorageError::WriteFailed(format!(
            "Failed to encode session {}: {}",
            session.id, e
        )))
    })
}

/// Durable store. Every mutation runs in a RocksDB transaction that holds
/// the record's row lock from read to commit.
#[derive(Clone)]
pub struct RocksSessionStore {
    storage: Arc<OptimizedStorage>,
}

impl RocksSessionStore {
    pub fn new(storage: Arc<OptimizedStorage>) -> Self {
        Self { storage }
    }

    /// Run a RocksDB call off the async workers; row-lock waits can block
    /// for up to the configured lock timeout.
    async fn blocking<T, F>(&self, op: F) -> StakeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(RocksSessionStore) -> StakeResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| StorageError::ReadFailed(format!("Storage task failed: {}", e)))?
    }

    fn load(&self, id: SessionId) -> StakeResult<Option<GameSession>> {
        match self.storage.get(&record_key(id))? {
            Some(bytes) => Ok(Some(decode_session(id, &bytes)?)),
            None => Ok(None),
        }
    }

    fn load_indexed(&self, prefix: &[u8], limit: usize, decode_id: impl Fn(u64) -> u64) -> StakeResult<Vec<GameSession>> {
        let rows = self.storage.scan_prefix(prefix, limit)?;
        let mut sessions = Vec::with_capacity(rows.len());
        for (key, _value) in rows {
            let id = SessionId(decode_id(trailing_u64(&key)?));
            match self.load(id)? {
                Some(session) => sessions.push(session),
                None => tracing::warn!(session_id = %id, "Session index points at a missing record"),
            }
        }
        Ok(sessions)
    }

    fn create_sync(&self, request: NewSession) -> StakeResult<GameSession> {
        let txn = self.storage.transaction();

        let last_id = match txn.get_for_update(NEXT_ID_KEY, true)? {
            Some(bytes) => trailing_u64(&bytes)?,
            None => 0,
        };
        let id = SessionId(last_id + 1);
        let session = GameSession::open(id, request, Utc::now());

        txn.put(NEXT_ID_KEY, id.0.to_be_bytes())?;
        txn.put(record_key(id), encode_session(&session)?)?;
        txn.put(owner_index_key(&session.owner_key, id), b"")?;
        txn.put(open_index_key(id), b"")?;
        txn.commit()?;

        Ok(session)
    }

    fn update_selection_sync(&self, id: SessionId, selection: Selection) -> StakeResult<SelectionUpdate> {
        let txn = self.storage.transaction();
        let Some(bytes) = txn.get_for_update(record_key(id), true)? else {
            return Ok(SelectionUpdate::Missing);
        };
        let mut session = decode_session(id, &bytes)?;
        if session.status != SessionStatus::Open {
            return Ok(SelectionUpdate::NotOpen(session.status));
        }

        session.select(selection, Utc::now());
        txn.put(record_key(id), encode_session(&session)?)?;
        txn.commit()?;
        Ok(SelectionUpdate::Applied)
    }

    fn try_transition_sync(
        &self,
        id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        outcome: Option<Outcome>,
    ) -> StakeResult<bool> {
        check_transition(expected, next, &outcome)?;

        let txn = self.storage.transaction();
        let Some(bytes) = txn.get_for_update(record_key(id), true)? else {
            return Ok(false);
        };
        let mut session = decode_session(id, &bytes)?;
        if session.status != expected {
            return Ok(false);
        }

        session.settle(next, outcome, Utc::now());
        txn.put(record_key(id), encode_session(&session)?)?;
        txn.delete(open_index_key(id))?;
        txn.commit()?;
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for RocksSessionStore {
    async fn create(&self, request: NewSession) -> StakeResult<GameSession> {
        self.blocking(move |store| store.create_sync(request)).await
    }

    async fn get(&self, id: SessionId) -> StakeResult<Option<GameSession>> {
        self.blocking(move |store| store.load(id)).await
    }

    async fn update_selection(&self, id: SessionId, selection: Selection) -> StakeResult<SelectionUpdate> {
        self.blocking(move |store| store.update_selection_sync(id, selection)).await
    }

    async fn try_transition(
        &self,
        id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        outcome: Option<Outcome>,
    ) -> StakeResult<bool> {
        self.blocking(move |store| store.try_transition_sync(id, expected, next, outcome))
            .await
    }

    async fn list_by_owner(&self, owner_key: &str, limit: usize) -> StakeResult<Vec<GameSession>> {
        let prefix = owner_prefix(owner_key);
        self.blocking(move |store| store.load_indexed(&prefix, limit, |inverted| u64::MAX - inverted))
            .await
    }

    async fn list_open(&self, limit: usize) -> StakeResult<Vec<GameSession>> {
        self.blocking(move |store| store.load_indexed(OPEN_INDEX_PREFIX, limit, |id| id))
            .await
    }
}
