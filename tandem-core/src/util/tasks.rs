use std::{future::Future, hash::Hash, sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::Id;

/// A group of tasks that are cancelled together, at the latest when the scope is dropped.
#[derive(Debug, Default)]
pub struct TaskScope {
    token: CancellationToken,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task that stops at its next await point once the scope is cancelled.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        })
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.token.cancel()
    }
}

struct TimerMarker;
type TimerId = Id<TimerMarker>;

/// Delayed tasks, at most one per key, that can be cancelled by key until they fire.
pub struct KeyedTimers<K>
where
    K: Eq + Hash,
{
    timers: Arc<DashMap<K, (TimerId, CancellationToken)>>,
}

impl<K> KeyedTimers<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            timers: Default::default(),
        }
    }

    /// Runs `task` after `delay` unless the key is cancelled first.
    ///
    /// Returns false if a timer is already pending for the key, in which case
    /// the pending timer is left as is and `task` is dropped.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = TimerId::new();
        let token = CancellationToken::new();

        match self.timers.entry(key.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(entry) => {
                entry.insert((id, token.clone()));
            }
        }

        let timers = self.timers.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }

            // Once fired, the timer is no longer cancellable by key.
            timers.remove_if(&key, |_, (current, _)| *current == id);
            task.await;
        });

        true
    }

    /// Cancels the pending timer for the key. Returns false if there was none.
    pub fn cancel(&self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn cancel_all(&self) {
        self.timers.retain(|_, (_, token)| {
            token.cancel();
            false
        });
    }
}

impl<K> Default for KeyedTimers<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for KeyedTimers<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.value().1.cancel();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_task(counter: &Arc<AtomicU32>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let timers = KeyedTimers::new();
        let counter = Arc::new(AtomicU32::new(0));

        assert!(timers.schedule("a", Duration::from_secs(1), counting_task(&counter)));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "not fired before delay");
        assert!(timers.is_scheduled(&"a"));

        sleep(Duration::from_millis(600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "fired after delay");
        assert!(!timers.is_scheduled(&"a"), "fired timer is forgotten");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timers = KeyedTimers::new();
        let counter = Arc::new(AtomicU32::new(0));

        timers.schedule("a", Duration::from_secs(1), counting_task(&counter));
        timers.schedule("b", Duration::from_secs(1), counting_task(&counter));

        assert!(timers.cancel(&"a"));
        assert!(!timers.cancel(&"a"), "second cancel is a no-op");

        sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "only b fired");
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_keeps_pending_timer() {
        let timers = KeyedTimers::new();
        let counter = Arc::new(AtomicU32::new(0));

        assert!(timers.schedule("a", Duration::from_secs(1), counting_task(&counter)));
        sleep(Duration::from_millis(800)).await;
        assert!(!timers.schedule("a", Duration::from_secs(1), counting_task(&counter)));

        sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "original deadline holds");

        sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "rejected task never runs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_scope() {
        let timers = KeyedTimers::new();
        let counter = Arc::new(AtomicU32::new(0));

        timers.schedule(1, Duration::from_secs(1), counting_task(&counter));
        timers.schedule(2, Duration::from_secs(1), counting_task(&counter));
        timers.cancel_all();

        let scope = TaskScope::new();
        let task_counter = counter.clone();

        scope.spawn(async move {
            sleep(Duration::from_secs(1)).await;
            task_counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(scope);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "nothing ran");
    }
}
