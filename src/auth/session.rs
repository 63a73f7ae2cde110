use actix_session::Session;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::auth::entropy::{EntropySource, random_hex};
use crate::errors::AppError;

pub const SESSION_ID_KEY: &str = "session_id";
const SESSION_ID_BYTES: usize = 16;
const PRUNE_THRESHOLD: usize = 1024;

/// Named-field access to a per-user session.
pub trait SessionStore {
    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;
    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError>;
    fn remove(&self, key: &str);
    fn purge(&self);
}

/// The request's `actix_session` view. Loaded once per request, so it only
/// carries the session id; token state lives in [`SessionData`].
impl SessionStore for Session {
    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        self.get::<T>(key)
            .map_err(|e| AppError::SessionUnavailable(format!("reading {key}: {e}")))
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        self.insert(key, value)
            .map_err(|e| AppError::SessionUnavailable(format!("writing {key}: {e}")))
    }

    fn remove(&self, key: &str) {
        Session::remove(self, key);
    }

    fn purge(&self) {
        Session::purge(self);
    }
}

/// Read the carrier's session id, stamping a fresh one on first touch.
pub fn ensure_session_id(carrier: &impl SessionStore, entropy: &dyn EntropySource) -> Result<String, AppError> {
    match carrier.read::<String>(SESSION_ID_KEY)? {
        Some(id) if !id.is_empty() => Ok(id),
        _ => {
            let id = random_hex(entropy, SESSION_ID_BYTES)?;
            carrier.write(SESSION_ID_KEY, &id)?;
            log::debug!("Started session {id}");
            Ok(id)
        }
    }
}

struct SessionEntry {
    fields: HashMap<String, serde_json::Value>,
    touched: Instant,
}

/// Server-side fields of every session, keyed by session id.
///
/// Reads are live: a request sees writes made by any request that held the
/// session lock before it.
#[derive(Clone, Default)]
pub struct SessionData {
    entries: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self, session_id: &str) -> LiveSession {
        LiveSession {
            id: session_id.to_string(),
            data: self.clone(),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions untouched for longer than `max_idle`.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.touched.elapsed() <= max_idle);
        before - entries.len()
    }
}

/// One session's slice of [`SessionData`].
#[derive(Clone)]
pub struct LiveSession {
    id: String,
    data: SessionData,
}

impl SessionStore for LiveSession {
    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let mut entries = self.data.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(&self.id) else {
            return Ok(None);
        };
        entry.touched = Instant::now();
        match entry.fields.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| AppError::SessionUnavailable(format!("reading {key}: {e}"))),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let value = serde_json::to_value(value)
            .map_err(|e| AppError::SessionUnavailable(format!("writing {key}: {e}")))?;
        let mut entries = self.data.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(self.id.clone()).or_insert_with(|| SessionEntry {
            fields: HashMap::new(),
            touched: Instant::now(),
        });
        entry.touched = Instant::now();
        entry.fields.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut entries = self.data.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&self.id) {
            entry.fields.remove(key);
        }
    }

    fn purge(&self) {
        let mut entries = self.data.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&self.id);
    }
}

impl LiveSession {
    pub fn keys(&self) -> Vec<String> {
        let entries = self.data.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&self.id)
            .map(|entry| entry.fields.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A session that has been attached and carries an opaque id.
///
/// Every CSRF operation takes one, so nothing touches the token state of a
/// session that failed to start.
pub struct SessionContext<S: SessionStore> {
    store: S,
    id: String,
}

impl<S: SessionStore> SessionContext<S> {
    pub fn new(store: S, id: String) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Destroy the session's state, then release its lock.
    ///
    /// The guard is dropped before the lock entry is released so that a
    /// waiter already queued on it is not split from later arrivals.
    pub fn teardown(self, guard: OwnedMutexGuard<()>, locks: &SessionLocks) {
        log::debug!("Destroying session {}", self.id);
        self.store.purge();
        drop(guard);
        locks.release(&self.id);
    }
}

/// Per-session-id async locks serialising read-modify-write of session state.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`. Held until the guard drops.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() >= PRUNE_THRESHOLD {
                prune_idle(&mut map);
            }
            map.entry(session_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget the lock of `session_id` unless someone still holds or awaits it.
    pub fn release(&self, session_id: &str) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(session_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(session_id);
        }
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        prune_idle(&mut map);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune_idle(map: &mut HashMap<String, Arc<AsyncMutex<()>>>) {
    map.retain(|_, lock| Arc::strong_count(lock) > 1);
}
