//! Serial execution contexts: dedicated background threads, each draining
//! a channel of boxed jobs in arrival order. Mirrors the actor-loop shape
//! of `ModuleSubscriptionActor` (a `tokio::sync::mpsc` receiver drained by
//! a single task), adapted to plain OS threads and `crossbeam-channel`
//! since this crate has no async runtime of its own to depend on.
//!
//! The controller pins its diff and consumer work to one [`ThreadContext`]
//! each; the writer context is supplied externally (the host's own serial
//! write queue) and only needs to satisfy [`crate::DatabaseWriter`].

use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A context that runs jobs one at a time, in the order they were handed to
/// it. The writer context (supplied by the embedding database) and the diff
/// and consumer contexts (this crate's own [`ThreadContext`]s) are all
/// instances of this same contract.
pub trait SerialContext: Send + Sync {
    /// Enqueues `job` to run after every job already dispatched to this
    /// context. Never blocks the caller on the job's execution.
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>);

    /// Like [`Self::dispatch`], but blocks the caller until `job` has
    /// finished running on this context. Used sparingly, for the few
    /// operations (like resynchronizing a context-owned field from outside)
    /// that need a synchronous round trip instead of a fire-and-forget
    /// handoff.
    fn dispatch_sync(&self, job: Box<dyn FnOnce() + Send>) {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        self.dispatch(Box::new(move || {
            job();
            let _ = done_tx.send(());
        }));
        let _ = done_rx.recv();
    }
}

/// A single dedicated thread that executes jobs strictly in the order they
/// were dispatched. Dropping the context closes the channel and joins the
/// thread, so no job submitted before the drop is lost.
pub struct ThreadContext {
    sender: crossbeam_channel::Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadContext {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn serial execution context thread");
        ThreadContext { sender, handle: Some(handle) }
    }

    /// Enqueues `job` to run after every job already dispatched to this
    /// context. Never blocks the caller on the job's execution.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        // The receiving thread only ever stops when `sender` (and every
        // clone of it) is dropped, which can't happen while `self` is
        // alive, so this send cannot fail.
        let _ = self.sender.send(Box::new(job));
    }

    /// Like [`Self::dispatch`], but blocks the caller until `job` has run on
    /// this context and returns its result. Used sparingly, for the few
    /// operations (like resynchronizing a context-owned field from outside)
    /// that need a synchronous round trip instead of a fire-and-forget
    /// handoff.
    pub fn dispatch_sync<T: Send + 'static>(&self, job: impl FnOnce() -> T + Send + 'static) -> T {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.dispatch(move || {
            let _ = reply_tx.send(job());
        });
        reply_rx.recv().expect("context thread dropped the reply channel without running the job")
    }
}

impl SerialContext for ThreadContext {
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>) {
        ThreadContext::dispatch(self, job);
    }

    fn dispatch_sync(&self, job: Box<dyn FnOnce() + Send>) {
        ThreadContext::dispatch_sync(self, move || job());
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // Dropping `sender` disconnects the channel, so the loop in the
        // spawned thread exits once it drains whatever was queued.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_run_in_dispatch_order() {
        let ctx = ThreadContext::new("test-context");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = seen.clone();
            ctx.dispatch(move || {
                seen.lock().unwrap().push(i);
            });
        }
        drop(ctx); // joins, so every job has definitely run by the time we check.
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn dispatch_sync_returns_the_jobs_result() {
        let ctx = ThreadContext::new("test-context-sync");
        let result = ctx.dispatch_sync(|| 2 + 2);
        assert_eq!(result, 4);
    }

    #[test]
    fn trait_object_dispatch_sync_blocks_until_job_runs() {
        let ctx = ThreadContext::new("test-context-trait-sync");
        let ctx: &dyn SerialContext = &ctx;
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_job = ran.clone();
        ctx.dispatch_sync(Box::new(move || {
            ran_in_job.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_waits_for_queued_jobs() {
        let ctx = ThreadContext::new("test-context-2");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = count.clone();
            ctx.dispatch(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(ctx);
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
