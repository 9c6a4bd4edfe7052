use super::window::ConversationWindow;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub window: ConversationWindow,
}

struct Slot {
    session: Arc<Mutex<Session>>,
    /// Milliseconds since the store's epoch.
    last_used: AtomicU64,
}

/// Live sessions. Each session sits behind its own async mutex, so requests of
/// one session run one at a time while different sessions proceed in parallel.
///
/// With an idle timeout set, sessions untouched for that long are dropped the
/// next time the store is swept. A session whose handle is still held by a
/// request is never dropped.
pub struct SessionStore {
    sessions: DashMap<String, Slot>,
    window_size: usize,
    idle_timeout: Option<Duration>,
    epoch: Instant,
    last_sweep: AtomicU64,
}

impl SessionStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            window_size,
            idle_timeout: None,
            epoch: Instant::now(),
            last_sweep: AtomicU64::new(0),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout.filter(|d| !d.is_zero());
        self
    }

    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Returns the session, creating it on first use.
    pub fn session(&self, id: &str) -> Arc<Mutex<Session>> {
        self.sweep_if_due();
        let now = self.now_ms();
        if let Some(existing) = self.sessions.get(id) {
            existing.last_used.store(now, Ordering::Relaxed);
            return existing.session.clone();
        }
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Starting session {}", id);
                Slot {
                    session: Arc::new(Mutex::new(Session {
                        id: id.to_string(),
                        window: ConversationWindow::new(self.window_size),
                    })),
                    last_used: AtomicU64::new(now),
                }
            })
            .session
            .clone()
    }

    /// Discards the session's context. Returns whether it existed.
    pub fn end(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!("Ended session {}", id);
        }
        removed
    }

    /// Drops idle sessions now and returns how many went.
    pub fn evict_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let limit = timeout.as_millis() as u64;
        let now = self.now_ms();
        let before = self.sessions.len();
        self.sessions.retain(|id, slot| {
            let idle = now.saturating_sub(slot.last_used.load(Ordering::Relaxed));
            let keep = idle < limit || Arc::strong_count(&slot.session) > 1;
            if !keep {
                info!("Evicting session {} after {}s idle", id, idle / 1000);
            }
            keep
        });
        self.last_sweep.store(now, Ordering::Relaxed);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn sweep_if_due(&self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let interval = (timeout.as_millis() as u64 / 4).max(1);
        if self.now_ms().saturating_sub(self.last_sweep.load(Ordering::Relaxed)) >= interval {
            self.evict_idle();
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new(5);
        store.session("a").lock().await.window.append("q", None, "");
        assert_eq!(store.session("a").lock().await.window.len(), 1);
        assert!(store.session("b").lock().await.window.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_end_discards_context() {
        let store = SessionStore::new(5);
        store.session("a").lock().await.window.append("q", None, "");
        assert!(store.end("a"));
        assert!(!store.end("a"));
        assert!(store.session("a").lock().await.window.is_empty());
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionStore::new_session_id(), SessionStore::new_session_id());
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::new(5).with_idle_timeout(Some(Duration::from_millis(20)));
        for _ in 0..50 {
            store.session(&SessionStore::new_session_id());
        }
        assert_eq!(store.len(), 50);

        tokio::time::sleep(Duration::from_millis(40)).await;
        store.session("fresh");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_session_in_use_is_not_evicted() {
        let store = SessionStore::new(5).with_idle_timeout(Some(Duration::from_millis(20)));
        let held = store.session("busy");
        held.lock().await.window.append("q", Some("SELECT 1".to_string()), "");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.evict_idle(), 0);
        drop(held);
        assert_eq!(store.evict_idle(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_without_timeout_nothing_is_evicted() {
        let store = SessionStore::new(5);
        store.session("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.evict_idle(), 0);
        assert_eq!(store.len(), 1);
    }
}
