use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use copilot_core::Session;
use tokio::sync::Mutex;

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

/// Upper bound on the time between idle sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    session: Arc<Mutex<Session>>,
    last_active: Instant,
}

struct Sessions {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

/// Live conversations keyed by thread id.
///
/// Each session sits behind its own async mutex so turns within one thread
/// run one at a time while different threads proceed in parallel. Sessions
/// untouched for longer than the idle TTL are dropped on a later lookup,
/// unless a turn still holds them.
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_ttl(DEFAULT_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            idle_ttl,
        }
    }

    pub async fn get_or_create(&self, key: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        if sessions.last_sweep.elapsed() >= self.idle_ttl.min(MAX_SWEEP_INTERVAL) {
            self.sweep(&mut sessions);
        }

        let entry = sessions.entries.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(session = %key, "New session");
            Entry {
                session: Arc::new(Mutex::new(Session::new(key))),
                last_active: Instant::now(),
            }
        });
        entry.last_active = Instant::now();
        entry.session.clone()
    }

    /// Drop every idle session nobody holds. Returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.sweep(&mut sessions)
    }

    fn sweep(&self, sessions: &mut Sessions) -> usize {
        let before = sessions.entries.len();
        let ttl = self.idle_ttl;
        sessions
            .entries
            .retain(|_, e| e.last_active.elapsed() < ttl || Arc::strong_count(&e.session) > 1);
        sessions.last_sweep = Instant::now();

        let evicted = before - sessions.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.entries.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Forget a session's memory and pending operation. Returns whether it existed.
    pub async fn reset(&self, key: &str) -> bool {
        let removed = self.sessions.lock().await.entries.remove(key);
        match removed {
            Some(entry) => {
                // A turn in flight may still hold the handle
                entry.session.lock().await.reset();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::Turn;

    #[tokio::test]
    async fn same_key_returns_same_session() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("t1").await;
        a.lock().await.memory.append(Turn::user("hi"));

        let b = registry.get_or_create("t1").await;
        assert_eq!(b.lock().await.memory.len(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn reset_removes_existing_session_only() {
        let registry = SessionRegistry::new();
        registry.get_or_create("t1").await.lock().await.memory.append(Turn::user("hi"));

        assert!(registry.reset("t1").await);
        assert!(registry.is_empty().await);
        assert!(!registry.reset("t1").await);
        assert!(!registry.reset("unknown").await);
        assert!(registry.get_or_create("t1").await.lock().await.memory.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_a_held_session() {
        let registry = SessionRegistry::new();
        let held = registry.get_or_create("t1").await;
        held.lock().await.memory.append(Turn::user("hi"));

        assert!(registry.reset("t1").await);
        assert!(held.lock().await.memory.is_empty());
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let registry = SessionRegistry::with_idle_ttl(Duration::ZERO);
        for i in 0..100 {
            registry.get_or_create(&format!("anon-{}", i)).await;
        }
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.evict_idle().await, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn held_sessions_survive_eviction() {
        let registry = SessionRegistry::with_idle_ttl(Duration::ZERO);
        let held = registry.get_or_create("busy").await;
        registry.get_or_create("idle").await;
        assert_eq!(registry.len().await, 2);

        assert_eq!(registry.evict_idle().await, 1);
        assert_eq!(registry.len().await, 1);
        assert!(Arc::ptr_eq(&held, &registry.get_or_create("busy").await));
    }

    #[tokio::test]
    async fn default_ttl_keeps_recent_sessions() {
        let registry = SessionRegistry::new();
        for key in ["a", "b", "c"] {
            registry.get_or_create(key).await;
        }
        assert_eq!(registry.evict_idle().await, 0);
        assert_eq!(registry.len().await, 3);
    }
}
