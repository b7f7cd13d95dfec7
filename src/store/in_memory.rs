use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{ClaimRequest, OutboxStore, UnitOfWork};
use crate::error::PersistenceError;
use crate::outbox::{specifications, OutboxMessage};
use crate::specification::Specification;

#[derive(Default)]
struct State {
    /// Rows keyed by insertion sequence.
    messages: BTreeMap<u64, OutboxMessage>,
    index: HashMap<Uuid, u64>,
    next_sequence: u64,
    /// Opaque business rows written through the same units of work.
    documents: HashMap<String, Vec<u8>>,
}

impl State {
    fn get(&self, id: &Uuid) -> Option<&OutboxMessage> {
        self.index.get(id).and_then(|seq| self.messages.get(seq))
    }

    fn get_mut(&mut self, id: &Uuid) -> Option<&mut OutboxMessage> {
        match self.index.get(id) {
            Some(seq) => self.messages.get_mut(seq),
            None => None,
        }
    }
}

/// In-memory outbox store.
///
/// Cloning gives another handle to the same storage, so a clone can be moved
/// into a worker task while the original keeps serving writes.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<State>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection: every operation fails with
    /// [`PersistenceError::Unavailable`] until brought back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Read a business row committed through a unit of work.
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.ensure_online()?;
        let state = self
            .state
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("read"))?;
        Ok(state.documents.get(key).cloned())
    }

    /// Number of committed outbox rows.
    pub fn len(&self) -> Result<usize, PersistenceError> {
        let state = self
            .state
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("read"))?;
        Ok(state.messages.len())
    }

    pub fn is_empty(&self) -> Result<bool, PersistenceError> {
        Ok(self.len()? == 0)
    }

    fn ensure_online(&self) -> Result<(), PersistenceError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("in-memory store is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, PersistenceError> {
        self.ensure_online()?;
        Ok(InMemoryUnitOfWork {
            store: self.clone(),
            changes: Vec::new(),
        })
    }

    async fn find(
        &self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        self.ensure_online()?;
        let state = self
            .state
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("read"))?;
        Ok(spec.apply(state.messages.values()))
    }

    async fn claim_pending(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        self.ensure_online()?;
        let mut state = self
            .state
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("claim"))?;

        let now = Utc::now();
        let max_retries = request.max_retries;
        let exclude: HashSet<Uuid> = request.exclude.iter().copied().collect();
        let claimable = specifications::pending()
            .and(Specification::new(move |m: &OutboxMessage| {
                m.is_claimable_at(now, max_retries) && !exclude.contains(&m.id)
            }))
            .take(request.limit);

        let mut claimed = claimable.apply(state.messages.values());
        for message in claimed.iter_mut() {
            message.claim(request.worker_id.as_str(), request.lease, now);
            message.version += 1;
            if let Some(stored) = state.get_mut(&message.id) {
                *stored = message.clone();
            }
        }

        Ok(claimed)
    }

    async fn release(&self, worker_id: &str, ids: &[Uuid]) -> Result<usize, PersistenceError> {
        self.ensure_online()?;
        let mut state = self
            .state
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("release"))?;

        let mut released = 0;
        for id in ids {
            if let Some(message) = state.get_mut(id) {
                if !message.processed && message.locked_by.as_deref() == Some(worker_id) {
                    message.release();
                    message.version += 1;
                    released += 1;
                }
            }
        }
        Ok(released)
    }
}

enum Change {
    Insert(OutboxMessage),
    Update(OutboxMessage),
    Upsert { key: String, bytes: Vec<u8> },
}

/// Unit of work over an [`InMemoryOutboxStore`].
///
/// Changes are buffered locally and applied under a single write lock in
/// [`UnitOfWork::save_changes`]. Constraints are checked for the whole batch
/// before anything is applied.
pub struct InMemoryUnitOfWork {
    store: InMemoryOutboxStore,
    changes: Vec<Change>,
}

impl InMemoryUnitOfWork {
    /// Stage a business row alongside the outbox writes.
    pub fn upsert_raw(&mut self, key: impl Into<String>, bytes: Vec<u8>) {
        self.changes.push(Change::Upsert {
            key: key.into(),
            bytes,
        });
    }

    /// Number of staged mutations.
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    /// Throw away everything staged so far.
    pub fn rollback(&mut self) {
        self.changes.clear();
    }

    fn check(state: &State, changes: &[Change]) -> Result<(), PersistenceError> {
        let mut inserted = HashSet::new();
        for change in changes {
            match change {
                Change::Insert(message) => {
                    if state.index.contains_key(&message.id) || !inserted.insert(message.id) {
                        return Err(PersistenceError::DuplicateId(message.id));
                    }
                }
                Change::Update(message) => {
                    let stored = state
                        .get(&message.id)
                        .ok_or(PersistenceError::NotFound(message.id))?;
                    if stored.version != message.version {
                        return Err(PersistenceError::ConcurrentWrite {
                            id: message.id,
                            expected: message.version,
                            actual: stored.version,
                        });
                    }
                }
                Change::Upsert { .. } => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert(&mut self, message: OutboxMessage) -> Result<(), PersistenceError> {
        self.changes.push(Change::Insert(message));
        Ok(())
    }

    async fn update(&mut self, message: OutboxMessage) -> Result<(), PersistenceError> {
        self.changes.push(Change::Update(message));
        Ok(())
    }

    async fn find(
        &mut self,
        spec: &Specification<OutboxMessage>,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        self.store.ensure_online()?;
        let state = self
            .store
            .state
            .read()
            .map_err(|_| PersistenceError::LockPoisoned("read"))?;

        let mut view: Vec<OutboxMessage> = state.messages.values().cloned().collect();
        for change in &self.changes {
            match change {
                Change::Insert(message) => view.push(message.clone()),
                Change::Update(message) => {
                    if let Some(row) = view.iter_mut().find(|row| row.id == message.id) {
                        *row = message.clone();
                    }
                }
                Change::Upsert { .. } => {}
            }
        }

        Ok(spec.apply(view.iter()))
    }

    async fn save_changes(&mut self) -> Result<usize, PersistenceError> {
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return Ok(0);
        }

        self.store.ensure_online()?;
        let mut state = self
            .store
            .state
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("commit"))?;

        Self::check(&state, &changes)?;

        let affected = changes.len();
        for change in changes {
            match change {
                Change::Insert(mut message) => {
                    state.next_sequence += 1;
                    let sequence = state.next_sequence;
                    message.sequence = sequence;
                    message.version = 0;
                    state.index.insert(message.id, sequence);
                    state.messages.insert(sequence, message);
                }
                Change::Update(mut message) => {
                    if let Some(stored) = state.get_mut(&message.id) {
                        message.sequence = stored.sequence;
                        message.version = stored.version + 1;
                        *stored = message;
                    }
                }
                Change::Upsert { key, bytes } => {
                    state.documents.insert(key, bytes);
                }
            }
        }

        Ok(affected)
    }
}
