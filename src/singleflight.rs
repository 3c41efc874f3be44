//! Coalescing of concurrent loads of the same key.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::trace;

type Slot<T, E> = Option<Result<T, E>>;

struct Call<T, E> {
    id: u64,
    rx: watch::Receiver<Slot<T, E>>,
}

enum Role<T, E> {
    Leader(watch::Sender<Slot<T, E>>, u64),
    Waiter(watch::Receiver<Slot<T, E>>),
}

/// Makes sure that only one load per key is executing at any moment.
///
/// The first caller for a key becomes the leader and runs the load on its own task. Everybody arriving while the load
/// is in flight waits for it and receives a clone of the very same result, be it a value or an error. The call record
/// is dropped as soon as the leader is done, so the next caller triggers a fresh load.
///
/// If the leader's future is dropped before it completes then its waiters don't get a result; one of them takes over
/// and runs its own load.
pub struct CallGroup<T, E> {
    calls:   Mutex<HashMap<String, Call<T, E>>>,
    next_id: AtomicU64,
}

// Removes the leader's record when the leader finishes, fails, panics or gets cancelled.
struct Deregister<'a, T, E> {
    calls: &'a Mutex<HashMap<String, Call<T, E>>>,
    key:   &'a str,
    id:    u64,
}

impl<T, E> Drop for Deregister<'_, T, E> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        if calls.get(self.key).is_some_and(|call| call.id == self.id) {
            calls.remove(self.key);
        }
    }
}

impl<T, E> CallGroup<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            calls:   Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a load in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut f = Some(f);

        loop {
            // The map lock must not outlive this block: nothing below should be awaited with it held.
            let role = {
                let mut calls = self.calls.lock();
                if let Some(call) = calls.get(key) {
                    Role::Waiter(call.rx.clone())
                }
                else {
                    let (tx, rx) = watch::channel(None);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    calls.insert(key.to_string(), Call { id, rx });
                    Role::Leader(tx, id)
                }
            };

            match role {
                Role::Waiter(mut rx) => {
                    let outcome = rx.wait_for(Option::is_some).await.ok().and_then(|slot| slot.clone());
                    if let Some(result) = outcome {
                        return result;
                    }
                    trace!("in-flight load of '{key}' was abandoned, retrying");
                }
                Role::Leader(tx, id) => {
                    let _deregister = Deregister {
                        calls: &self.calls,
                        key,
                        id,
                    };
                    let Some(f) = f.take()
                    else {
                        unreachable!("Internal error: load function of '{key}' is used twice");
                    };
                    let result = f().await;
                    tx.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }
}

impl<T, E> Default for CallGroup<T, E>
where
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Debug for CallGroup<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGroup")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn single_call() {
        let group = CallGroup::<String, String>::new();
        let v = group.run("key", || async { Ok("bar".to_string()) }).await;
        assert_eq!(v, Ok("bar".to_string()));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_share_one_execution() {
        const CALLERS: usize = 16;
        let group = Arc::new(CallGroup::<String, String>::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let mut handles = Vec::with_capacity(CALLERS);
        for _ in 0..CALLERS {
            let group = group.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                group
                    .run("x", || async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(format!("value-{n}"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("value-1".to_string()));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn errors_are_shared_but_not_remembered() {
        let group = Arc::new(CallGroup::<u32, String>::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let group = group.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                group
                    .run("bad", || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Err("boom".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("boom".to_string()));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let retry = group.run("bad", || async { Ok(7) }).await;
        assert_eq!(retry, Ok(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_takes_over_cancelled_leader() {
        let group = Arc::new(CallGroup::<u32, String>::new());

        let leader = {
            let group = group.clone();
            tokio::spawn(async move {
                group
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        while group.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.run("k", || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();

        assert_eq!(waiter.await.unwrap(), Ok(2));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_wait_for_each_other() {
        let group = Arc::new(CallGroup::<&'static str, ()>::new());
        let slow = {
            let group = group.clone();
            tokio::spawn(async move {
                group
                    .run("slow", || async {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok("slow")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(Duration::from_millis(100), group.run("fast", || async { Ok("fast") })).await;
        assert_eq!(fast, Ok(Ok("fast")));
        assert_eq!(slow.await.unwrap(), Ok("slow"));
    }
}
