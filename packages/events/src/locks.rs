// ABOUTME: Per-session async mutexes keyed by session id
// ABOUTME: Serializes work within a session; an entry lives only while someone holds or awaits it

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type SessionMutex = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub(crate) struct SessionLocks {
    inner: Mutex<HashMap<String, SessionMutex>>,
}

/// Held for the duration of one session-scoped critical section
pub(crate) struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    mutex: SessionMutex,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    pub(crate) async fn lock(&self, session_id: &str) -> SessionGuard<'_> {
        let mutex = self
            .map()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = mutex.clone().lock_owned().await;

        SessionGuard {
            locks: self,
            session_id: session_id.to_string(),
            mutex,
            guard: Some(guard),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SessionMutex>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        // The map and this guard are the only owners left: nobody is waiting
        if Arc::strong_count(&self.mutex) == 2 {
            map.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_removed_after_last_holder_releases() {
        let locks = SessionLocks::default();
        {
            let _guard = locks.lock("s1").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_entry_kept_while_another_task_waits() {
        let locks = Arc::new(SessionLocks::default());
        let first = locks.lock("s1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("s1").await;
            })
        };
        tokio::task::yield_now().await;

        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
