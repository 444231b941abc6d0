//! In-memory session store with per-shard locking.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{Channel, SessionRecord, SessionStore};
use crate::clock::{IdGenerator, TimeProvider};
use crate::error::{WorkflowError, WorkflowResult};

const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<String, SessionRecord>>;

/// Sharded in-memory implementation.
///
/// Records are sharded by `session_id`; the `(subscriber, channel)`
/// secondary index lives behind its own mutex. Lock order is always
/// index before shard, so paths that need both cannot deadlock.
pub struct InMemorySessionStore {
    shards: Vec<Shard>,
    index: Mutex<HashMap<(String, Channel), String>>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemorySessionStore {
    pub fn new(time: Arc<dyn TimeProvider>, ids: Arc<dyn IdGenerator>) -> Self {
        InMemorySessionStore {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            index: Mutex::new(HashMap::new()),
            time,
            ids,
        }
    }

    fn shard(&self, session_id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Insert a fresh record, evicting any stale index entry first.
    /// Caller supplies the id; the index mutex is the linearization point.
    fn insert(
        &self,
        session_id: String,
        channel: Channel,
        subscriber: &str,
        initial_data: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> WorkflowResult<SessionRecord> {
        let now = self.time.now_millis();
        let key = (subscriber.to_string(), channel);
        let mut index = self.index.lock();

        if let Some(existing_id) = index.get(&key).cloned() {
            let mut shard = self.shard(&existing_id).write();
            match shard.get_mut(&existing_id) {
                Some(existing) if existing.active && !existing.is_expired(now) => {
                    return Err(WorkflowError::SessionConflict {
                        subscriber: subscriber.to_string(),
                        channel: channel.to_string(),
                    });
                }
                Some(existing) => {
                    existing.active = false;
                    index.remove(&key);
                }
                None => {
                    index.remove(&key);
                }
            }
        }

        let record = SessionRecord {
            session_id: session_id.clone(),
            channel,
            subscriber: subscriber.to_string(),
            data: initial_data,
            created_at: now,
            last_activity_at: now,
            expires_at: ttl.map(|t| now + t.as_millis() as i64),
            active: true,
        };
        self.shard(&session_id).write().insert(session_id.clone(), record.clone());
        index.insert(key, session_id);
        Ok(record)
    }

    /// Flag an expired record inactive and drop its index entry.
    fn expire(&self, session_id: &str) {
        let mut index = self.index.lock();
        let mut shard = self.shard(session_id).write();
        if let Some(record) = shard.get_mut(session_id) {
            record.active = false;
            let key = (record.subscriber.clone(), record.channel);
            if index.get(&key).map(String::as_str) == Some(session_id) {
                index.remove(&key);
            }
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        channel: Channel,
        subscriber: &str,
        initial_data: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> WorkflowResult<SessionRecord> {
        let session_id = self.ids.next_id();
        self.insert(session_id, channel, subscriber, initial_data, ttl)
    }

    async fn create_with_id(
        &self,
        session_id: &str,
        channel: Channel,
        subscriber: &str,
        initial_data: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> WorkflowResult<SessionRecord> {
        self.insert(session_id.to_string(), channel, subscriber, initial_data, ttl)
    }

    async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let now = self.time.now_millis();
        let record = self.shard(session_id).read().get(session_id).cloned()?;
        if !record.active {
            return None;
        }
        if record.is_expired(now) {
            self.expire(session_id);
            return None;
        }
        Some(record)
    }

    async fn find_active(&self, subscriber: &str, channel: Channel) -> Option<SessionRecord> {
        let session_id = {
            let index = self.index.lock();
            index.get(&(subscriber.to_string(), channel)).cloned()?
        };
        self.get(&session_id).await
    }

    async fn update_data(
        &self,
        session_id: &str,
        partial_data: Map<String, Value>,
    ) -> WorkflowResult<SessionRecord> {
        let now = self.time.now_millis();
        let expired = {
            let mut shard = self.shard(session_id).write();
            match shard.get_mut(session_id) {
                Some(record) if record.active && !record.is_expired(now) => {
                    for (k, v) in partial_data {
                        record.data.insert(k, v);
                    }
                    record.last_activity_at = now;
                    return Ok(record.clone());
                }
                Some(record) => record.active && record.is_expired(now),
                None => false,
            }
        };
        if expired {
            self.expire(session_id);
        }
        Err(WorkflowError::SessionNotFound(session_id.to_string()))
    }

    async fn replace_data(
        &self,
        session_id: &str,
        data: Map<String, Value>,
    ) -> WorkflowResult<SessionRecord> {
        let now = self.time.now_millis();
        {
            let mut shard = self.shard(session_id).write();
            if let Some(record) = shard.get_mut(session_id) {
                if record.active && !record.is_expired(now) {
                    record.data = data;
                    record.last_activity_at = now;
                    return Ok(record.clone());
                }
            }
        }
        Err(WorkflowError::SessionNotFound(session_id.to_string()))
    }

    async fn touch(&self, session_id: &str) {
        let now = self.time.now_millis();
        let mut shard = self.shard(session_id).write();
        if let Some(record) = shard.get_mut(session_id) {
            if record.active && !record.is_expired(now) {
                record.last_activity_at = now;
            }
        }
    }

    async fn end(&self, session_id: &str) -> WorkflowResult<()> {
        let mut index = self.index.lock();
        let mut shard = self.shard(session_id).write();
        let Some(record) = shard.get_mut(session_id) else {
            return Err(WorkflowError::SessionNotFound(session_id.to_string()));
        };
        record.active = false;
        let key = (record.subscriber.clone(), record.channel);
        if index.get(&key).map(String::as_str) == Some(session_id) {
            index.remove(&key);
        }
        Ok(())
    }

    async fn sweep(&self) -> usize {
        let now = self.time.now_millis();
        let mut expired_ids = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            expired_ids.extend(
                guard
                    .values()
                    .filter(|r| r.active && r.is_expired(now))
                    .map(|r| r.session_id.clone()),
            );
        }
        for session_id in &expired_ids {
            self.expire(session_id);
        }
        expired_ids.len()
    }
}
