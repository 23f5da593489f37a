use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use rand::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{identity::Principal, Error};

pub(crate) const PRINCIPAL_KEY: &str = "latch.principal";

/// Opaque, unguessable session identifier: 256 random bits, base64url encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        thread_rng().fill(&mut bytes);

        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Identifiers are bearer secrets; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(..)")
    }
}

/// Server-side session record: an identifier plus a bag of JSON attributes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    attributes: HashMap<String, serde_json::Value>,
    created_at: OffsetDateTime,
    last_access: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();

        Self {
            id: SessionId::generate(),
            attributes: HashMap::new(),
            created_at: now,
            last_access: now,
            expires_at: now + ttl,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.attributes
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Error::from)
    }

    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), Error> {
        self.attributes
            .insert(key.into(), serde_json::to_value(value)?);

        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.attributes.remove(key)
    }

    /// The authenticated principal, if any.
    pub fn principal(&self) -> Result<Option<Principal>, Error> {
        self.get(PRINCIPAL_KEY)
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn last_access(&self) -> OffsetDateTime {
        self.last_access
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub(crate) fn touch(&mut self, ttl: Duration) {
        let now = OffsetDateTime::now_utc();
        self.last_access = now;
        self.expires_at = now + ttl;
    }

    /// Same attributes under a fresh identifier.
    pub(crate) fn rotated(&self) -> Self {
        let mut next = self.clone();
        next.id = SessionId::generate();
        next.last_access = OffsetDateTime::now_utc();

        next
    }
}

/// Backend holding sessions. Implement this over a shared store (Redis, SQL, ...)
/// to let several server processes see the same sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a live session. Unknown and expired identifiers both yield `None`.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, Error>;

    /// Allocate and persist an empty session.
    async fn create(&self) -> Result<Session, Error>;

    /// Write back a session that still exists. Saving a deleted session is a no-op.
    async fn save(&self, session: &Session) -> Result<(), Error>;

    async fn delete(&self, id: &SessionId) -> Result<(), Error>;

    /// Atomically replace `old` with `next`.
    ///
    /// Returns `false`, without storing `next`, when `old` no longer exists; of
    /// two racing cycles of the same session exactly one wins.
    async fn cycle(&self, old: &SessionId, next: &Session) -> Result<bool, Error>;
}

/// In-process session store with a sliding time-to-live.
///
/// Expired sessions are dropped when loaded, and swept from the whole map on
/// [`create`](SessionStore::create) at most once per sweep interval (one minute
/// by default). Clones share the same underlying map.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    last_sweep: Arc<Mutex<OffsetDateTime>>,
    ttl: Duration,
    sweep_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            sessions: Arc::default(),
            last_sweep: Arc::new(Mutex::new(OffsetDateTime::now_utc())),
            ttl: Duration::minutes(30),
            sweep_interval: Duration::minutes(1),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;

        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;

        self
    }

    /// Drops every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        *self.last_sweep.lock() = now;

        sweep(&mut self.sessions.lock(), now)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

fn sweep(sessions: &mut HashMap<SessionId, Session>, now: OffsetDateTime) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired(now));

    before - sessions.len()
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, Error> {
        let mut sessions = self.sessions.lock();

        let Some(session) = sessions.get_mut(id) else {
            return Ok(None);
        };

        if session.is_expired(OffsetDateTime::now_utc()) {
            sessions.remove(id);
            return Ok(None);
        }

        session.touch(self.ttl);

        Ok(Some(session.clone()))
    }

    async fn create(&self) -> Result<Session, Error> {
        let now = OffsetDateTime::now_utc();
        let session = Session::new(self.ttl);
        let mut sessions = self.sessions.lock();

        {
            let mut last_sweep = self.last_sweep.lock();
            if now - *last_sweep >= self.sweep_interval {
                *last_sweep = now;
                let removed = sweep(&mut sessions, now);
                if removed > 0 {
                    tracing::debug!(removed, "swept expired sessions");
                }
            }
        }

        sessions.insert(session.id().clone(), session.clone());

        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<(), Error> {
        if let Some(existing) = self.sessions.lock().get_mut(session.id()) {
            *existing = session.clone();
        }

        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), Error> {
        self.sessions.lock().remove(id);

        Ok(())
    }

    async fn cycle(&self, old: &SessionId, next: &Session) -> Result<bool, Error> {
        let mut sessions = self.sessions.lock();

        if sessions.remove(old).is_none() {
            return Ok(false);
        }

        sessions.insert(next.id().clone(), next.clone());

        Ok(true)
    }
}
