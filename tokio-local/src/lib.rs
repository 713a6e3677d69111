//! A small pool of dedicated OS threads, each driving its own single-threaded
//! tokio runtime plus a [`LocalSet`], so that `!Send` futures (mediasoup's
//! transport/producer/consumer creation futures capture non-`Send` FFI
//! handles) can still be awaited from a `Send` caller.
//!
//! Usage mirrors `tokio::task::spawn_blocking`: hand `spawn_pinned` a
//! closure that *produces* the future (so the future itself is built on the
//! worker thread, where it's allowed to be `!Send`), and await the returned
//! receiver to get the (`Send`) output back.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

type BoxedSpawn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct LocalPoolHandle {
    inner: Arc<Inner>,
}

struct Inner {
    senders: Vec<mpsc::UnboundedSender<BoxedSpawn>>,
    next: AtomicUsize,
}

/// Spawn `num_threads` worker threads, each running a `LocalSet`.
pub fn new_local_pool(num_threads: usize) -> LocalPoolHandle {
    assert!(num_threads > 0, "tokio-local pool needs at least one thread");

    let mut senders = Vec::with_capacity(num_threads);
    for i in 0..num_threads {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedSpawn>();
        std::thread::Builder::new()
            .name(format!("tokio-local-{i}"))
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build tokio-local worker runtime");
                let local = LocalSet::new();
                local.block_on(&rt, async move {
                    while let Some(task) = rx.recv().await {
                        task();
                    }
                });
            })
            .expect("failed to spawn tokio-local worker thread");
        senders.push(tx);
    }

    LocalPoolHandle {
        inner: Arc::new(Inner {
            senders,
            next: AtomicUsize::new(0),
        }),
    }
}

impl LocalPoolHandle {
    /// Run `make_future()` pinned to one worker thread of the pool and
    /// return a receiver that resolves to its output once complete.
    ///
    /// `make_future` itself must be `Send` (it's the closure that crosses
    /// into the worker thread), but the future it returns need not be —
    /// that future is constructed and polled entirely on the worker thread.
    pub fn spawn_pinned<F, Fut>(&self, make_future: F) -> oneshot::Receiver<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + 'static,
        Fut::Output: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.senders.len();

        let task: BoxedSpawn = Box::new(move || {
            tokio::task::spawn_local(async move {
                let output = make_future().await;
                let _ = result_tx.send(output);
            });
        });

        // Worker thread outlives the pool handle for the process lifetime;
        // a send failure only happens if the thread panicked.
        let _ = self.inner.senders[idx].send(task);
        result_rx
    }

    pub fn num_threads(&self) -> usize {
        self.inner.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_on_worker_thread_and_returns_output() {
        let pool = new_local_pool(2);
        let result = pool
            .spawn_pinned(|| async move {
                let not_send = std::rc::Rc::new(5);
                *not_send + 1
            })
            .await
            .unwrap();
        assert_eq!(result, 6);
    }

    #[tokio::test]
    async fn round_robins_across_threads() {
        let pool = new_local_pool(3);
        assert_eq!(pool.num_threads(), 3);
        for _ in 0..9 {
            pool.spawn_pinned(|| async move {}).await.unwrap();
        }
    }
}
