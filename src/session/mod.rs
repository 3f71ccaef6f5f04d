//! Bounded conversation history keyed by session id.
//!
//! Entries are evicted least-recently-used once `capacity` is reached and expire
//! `ttl` after their last update.

use log::{debug, info};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::llm::ChatMessage;

#[derive(Debug, Clone)]
struct SessionEntry {
    turns: Vec<ChatMessage>,
    touched_at: Instant,
}

#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<Mutex<LruCache<String, SessionEntry>>>,
    ttl: Duration,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(capacity: usize, ttl: Duration, max_turns: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
            max_turns: max_turns.max(1),
        }
    }

    pub fn from_config(config: &SessionConfig, max_turns: usize) -> Self {
        Self::new(config.capacity, config.ttl, max_turns)
    }

    /// Recent turns for the session, oldest first. Expired sessions read as empty.
    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();
        let expired = match cache.get(session_id) {
            Some(entry) if now.duration_since(entry.touched_at) < self.ttl => {
                return entry.turns.clone();
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("[SESSION] {} expired", session_id);
            cache.pop(session_id);
        }
        Vec::new()
    }

    pub async fn record_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let mut turns = match cache.pop(session_id) {
            Some(entry) if now.duration_since(entry.touched_at) < self.ttl => entry.turns,
            _ => Vec::new(),
        };
        turns.push(ChatMessage::user(user));
        turns.push(ChatMessage::assistant(assistant));
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }

        cache.put(
            session_id.to_string(),
            SessionEntry {
                turns,
                touched_at: now,
            },
        );
    }

    pub async fn prune_expired(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.touched_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    /// Periodically drops expired sessions so idle entries do not wait for LRU eviction.
    pub fn spawn_pruner(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                let removed = store.prune_expired().await;
                if removed > 0 {
                    info!("[SESSION] pruned {} expired sessions", removed);
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}
