//! The synchronisation thread.
//!
//! Some target state is apartment-bound: it must only be touched from
//! one dedicated thread. Handlers marshal such work here as boxed
//! closures; the thread executes them strictly in arrival order, which
//! also serialises hook callbacks keyed to the same method.

use periscope_types::envelope::Fault;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the dedicated apartment worker.
pub struct SyncThread {
    tx: std::sync::mpsc::Sender<Job>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SyncThread {
    /// Spawn the worker thread.
    pub fn spawn() -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("periscope-sync".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                tracing::debug!("synchronisation thread drained");
            })
            .expect("spawn synchronisation thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Run `f` on the synchronisation thread and await its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R, Fault>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(Box::new(move || {
                let _ = tx.send(f());
            }))
            .map_err(|_| Fault::State("synchronisation thread is gone".to_string()))?;
        rx.await
            .map_err(|_| Fault::State("synchronisation thread dropped the job".to_string()))
    }

    /// Fire-and-forget variant for callers that cannot await.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }
}

impl Drop for SyncThread {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        let (empty_tx, _) = std::sync::mpsc::channel::<Job>();
        self.tx = empty_tx;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_returns_result() {
        let sync = SyncThread::spawn();
        let out = sync.run(|| 21 * 2).await.expect("run");
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_jobs_run_in_arrival_order() {
        let sync = SyncThread::spawn();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            sync.run(move || log.lock().expect("lock").push(i))
                .await
                .expect("run");
        }
        assert_eq!(*log.lock().expect("lock"), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_post_fire_and_forget() {
        let sync = SyncThread::spawn();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        assert!(sync.post(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        // Synchronise behind the posted job.
        sync.run(|| ()).await.expect("run");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_jobs_share_one_thread() {
        let sync = SyncThread::spawn();
        let first = sync.run(|| std::thread::current().id()).await.expect("run");
        let second = sync.run(|| std::thread::current().id()).await.expect("run");
        assert_eq!(first, second);
    }
}
