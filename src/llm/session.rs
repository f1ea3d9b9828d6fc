//! Conversation → remote thread mapping.
//!
//! ```text
//!   (conversation_key, backend_id)
//!              │
//!              ▼
//!   ┌─────────────────────┐  hit   ┌──────────────┐
//!   │  ThreadSessionStore │──────▶│  thread_id   │
//!   └─────────────────────┘        └──────────────┘
//!              │ miss / expired
//!              ▼
//!      create() (once per key, even under concurrent first use)
//! ```
//!
//! Each key owns an `Arc<OnceCell<ThreadSession>>`. The map lock is only held
//! to look up or replace that cell, never across the creation await, so
//! concurrent callers for the same key wait on the cell while other keys
//! proceed independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A live remote thread for one conversation on one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSession {
    pub conversation_key: String,
    pub backend_id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    conversation_key: String,
    backend_id: String,
}

impl SessionKey {
    fn new(conversation_key: &str, backend_id: &str) -> Self {
        Self {
            conversation_key: conversation_key.to_string(),
            backend_id: backend_id.to_string(),
        }
    }
}

/// Keyed store of thread sessions.
pub struct ThreadSessionStore {
    sessions: Mutex<HashMap<SessionKey, Arc<OnceCell<ThreadSession>>>>,
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
}

impl Default for ThreadSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSessionStore {
    /// Store whose sessions never expire.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), None)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, max_age: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            max_age,
        }
    }

    /// Return the thread for `(conversation_key, backend_id)`, calling
    /// `create` only when none exists yet or the existing one expired.
    ///
    /// A failed `create` stores nothing; the next call tries again.
    pub async fn get_or_create_thread<F, Fut, E>(
        &self,
        conversation_key: &str,
        backend_id: &str,
        create: F,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let key = SessionKey::new(conversation_key, backend_id);
        let cell = self.cell_for(key.clone());

        let result = cell
            .get_or_try_init(|| async {
                let thread_id = create().await?;
                tracing::debug!(
                    conversation = conversation_key,
                    backend = backend_id,
                    thread_id = %thread_id,
                    "Created thread session"
                );
                Ok::<_, E>(ThreadSession {
                    conversation_key: conversation_key.to_string(),
                    backend_id: backend_id.to_string(),
                    thread_id,
                    created_at: self.clock.now(),
                })
            })
            .await;

        match result {
            Ok(session) => Ok(session.thread_id.clone()),
            Err(err) => {
                self.discard_empty(&key, &cell);
                Err(err)
            }
        }
    }

    /// The current session, if one exists and has not expired.
    pub fn get(&self, conversation_key: &str, backend_id: &str) -> Option<ThreadSession> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&SessionKey::new(conversation_key, backend_id))
            .and_then(|cell| cell.get())
            .filter(|session| !self.is_expired(session))
            .cloned()
    }

    /// Forget the session so the next use creates a new thread.
    pub fn invalidate(&self, conversation_key: &str, backend_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .remove(&SessionKey::new(conversation_key, backend_id))
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of established sessions, including expired ones not yet replaced.
    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, key: SessionKey) -> Arc<OnceCell<ThreadSession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let cell = sessions
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()));

        if cell.get().is_some_and(|session| self.is_expired(session)) {
            tracing::debug!("Thread session expired, recreating");
            *cell = Arc::new(OnceCell::new());
        }
        Arc::clone(cell)
    }

    /// Drop `cell` from the map if it is still the entry for `key` and was
    /// never initialized.
    fn discard_empty(&self, key: &SessionKey, cell: &Arc<OnceCell<ThreadSession>>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized())
        {
            sessions.remove(key);
        }
    }

    fn is_expired(&self, session: &ThreadSession) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        let age = self.clock.now().signed_duration_since(session.created_at);
        age.to_std().is_ok_and(|age| age > max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Mutex::new(Utc::now()))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    async fn create_counted(counter: &AtomicUsize) -> Result<String, String> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread_{n}"))
    }

    #[tokio::test]
    async fn second_call_reuses_thread() {
        let store = ThreadSessionStore::new();
        let creations = AtomicUsize::new(0);

        let first = store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        let second = store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();

        assert_eq!(first, "thread_1");
        assert_eq!(second, "thread_1");
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_use_creates_once() {
        let store = ThreadSessionStore::new();
        let creations = AtomicUsize::new(0);

        let calls = (0..8).map(|_| {
            store.get_or_create_thread("chat-1", "assistant", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                create_counted(&creations).await
            })
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "thread_1");
        }
    }

    #[tokio::test]
    async fn keys_and_backends_are_independent() {
        let store = ThreadSessionStore::new();
        let creations = AtomicUsize::new(0);

        let a = store
            .get_or_create_thread("chat-1", "premium", || create_counted(&creations))
            .await
            .unwrap();
        let b = store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        let c = store
            .get_or_create_thread("chat-2", "premium", || create_counted(&creations))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(creations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_creation_is_not_cached() {
        let store = ThreadSessionStore::new();

        let err = store
            .get_or_create_thread("chat-1", "assistant", || async {
                Err::<String, _>("createThread failed".to_string())
            })
            .await
            .unwrap_err();
        assert_eq!(err, "createThread failed");
        assert!(store.is_empty());
        assert!(store.get("chat-1", "assistant").is_none());
        assert!(store.sessions.lock().unwrap().is_empty());

        let thread = store
            .get_or_create_thread("chat-1", "assistant", || async {
                Ok::<_, String>("thread_ok".to_string())
            })
            .await
            .unwrap();
        assert_eq!(thread, "thread_ok");
    }

    #[tokio::test]
    async fn failing_keys_leave_no_entries_behind() {
        let store = ThreadSessionStore::new();

        for i in 0..50 {
            store
                .get_or_create_thread(&format!("chat-{i}"), "assistant", || async {
                    Err::<String, _>("createThread failed".to_string())
                })
                .await
                .unwrap_err();
        }

        assert!(store.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_session_is_recreated() {
        let clock = Arc::new(ManualClock::new());
        let store =
            ThreadSessionStore::with_clock(clock.clone(), Some(Duration::from_secs(3600)));
        let creations = AtomicUsize::new(0);

        store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1800));
        assert!(store.get("chat-1", "assistant").is_some());

        clock.advance(Duration::from_secs(3600));
        assert!(store.get("chat-1", "assistant").is_none());

        let thread = store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        assert_eq!(thread, "thread_2");
        assert_eq!(creations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_new_thread() {
        let store = ThreadSessionStore::new();
        let creations = AtomicUsize::new(0);

        store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        assert!(store.invalidate("chat-1", "assistant"));
        assert!(!store.invalidate("chat-1", "assistant"));

        let thread = store
            .get_or_create_thread("chat-1", "assistant", || create_counted(&creations))
            .await
            .unwrap();
        assert_eq!(thread, "thread_2");
    }
}
