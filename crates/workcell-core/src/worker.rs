use crate::args::{PayloadArg, WorkArgs};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::flags::WorkerFlags;
use crate::signal::Signal;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Caller-supplied unit of work. Invoked on the background thread with the
/// state lock released, so it may call any [`WorkerHandle`] method without
/// deadlocking. The returned status is logged but not interpreted.
pub type WorkFn = dyn Fn(&WorkerHandle) -> i32 + Send + Sync;

/// Everything mutable lives behind one lock/condvar pair.
struct WorkerState {
    flags: WorkerFlags,
    signal: Signal,
    work_fn: Option<Arc<WorkFn>>,
    args: WorkArgs,
}

impl WorkerState {
    fn new() -> Self {
        WorkerState {
            flags: WorkerFlags::empty(),
            signal: Signal::None,
            work_fn: None,
            args: WorkArgs::new(),
        }
    }

    /// Wake predicate for the dispatch loop's single wait point.
    fn wake_needed(&self) -> bool {
        self.flags.contains(WorkerFlags::WORK_PENDING) || self.signal.is_pending()
    }

    /// Consume the signal slot exactly once, translating Kill into a
    /// pending termination.
    fn consume_signal(&mut self) {
        if self.signal == Signal::Kill {
            self.flags.insert(WorkerFlags::TERMINATE_PENDING);
        }
        self.signal = Signal::None;
    }
}

struct Shared {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: Mutex::new(WorkerState::new()),
            cond: Condvar::new(),
        }
    }

    fn send_signal(&self, signal: Signal) {
        let mut state = self.state.lock();
        state.signal = signal;
        self.cond.notify_all();
    }

    fn request_work(&self) {
        let mut state = self.state.lock();
        state.flags.insert(WorkerFlags::WORK_PENDING);
        self.cond.notify_all();
    }

    fn store_work_fn(&self, work_fn: Option<Arc<WorkFn>>) {
        let mut state = self.state.lock();
        state.work_fn = work_fn;
    }

    fn set_repeat(&self, enable: bool) {
        let mut state = self.state.lock();
        if enable {
            state.flags.insert(WorkerFlags::WORK_REPEAT);
        } else {
            state.flags.remove(WorkerFlags::WORK_REPEAT);
        }
    }

    fn set_detach_on_terminate(&self, enable: bool) {
        let mut state = self.state.lock();
        if enable {
            state.flags.insert(WorkerFlags::DETACH_ON_TERMINATE);
        } else {
            state.flags.remove(WorkerFlags::DETACH_ON_TERMINATE);
        }
    }

    fn flags(&self) -> WorkerFlags {
        self.state.lock().flags
    }

    fn signal(&self) -> Signal {
        self.state.lock().signal
    }

    fn set_payload_arg(&self, index: usize, payload: Option<PayloadArg>) {
        self.state.lock().args.set_payload(index, payload);
    }

    fn payload_arg(&self, index: usize) -> Option<PayloadArg> {
        self.state.lock().args.payload(index)
    }

    fn set_uint_arg(&self, index: usize, value: u64) {
        self.state.lock().args.set_uint(index, value);
    }

    fn uint_arg(&self, index: usize) -> u64 {
        self.state.lock().args.uint(index)
    }

    fn set_int_arg(&self, index: usize, value: i64) {
        self.state.lock().args.set_int(index, value);
    }

    fn int_arg(&self, index: usize) -> i64 {
        self.state.lock().args.int(index)
    }
}

/// A single-thread worker: owns at most one background OS thread running the
/// dispatch loop, one pending-work slot, and the lifecycle flag bitset.
///
/// The thread is created by [`start`](Worker::start), terminated by a
/// [`Signal::Kill`], and reconciled (joined or detached, governed by
/// `DETACH_ON_TERMINATE`) on the next `start`, on drop, or by the stop
/// helpers. The same object may be restarted after a prior thread exits;
/// control bits set between runs are preserved.
pub struct Worker {
    config: WorkerConfig,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Cloneable handle to a worker's guarded state.
///
/// Passed to the work callback and obtainable via [`Worker::handle`]. Exposes
/// every operation that does not require ownership of the thread handle, so a
/// callback can request its own repetition or deliver a kill from inside.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl Worker {
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        Worker {
            config,
            shared: Arc::new(Shared::new()),
            thread: None,
        }
    }

    /// Handle for use outside the work callback, e.g. from another thread.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the background thread if none is active.
    ///
    /// A previous thread's handle is reconciled first: detached when
    /// `DETACH_ON_TERMINATE` is set, otherwise joined (blocking until it
    /// exits). After reconciliation the spawn only happens if
    /// `THREAD_ACTIVE` is clear, so a still-running detached thread makes
    /// this a no-op. Safe to call repeatedly; restarting reuses the
    /// configuration and control bits already on the object.
    pub fn start(&mut self) -> Result<()> {
        self.reconcile();

        if self.shared.flags().contains(WorkerFlags::THREAD_ACTIVE) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let mut builder = std::thread::Builder::new().name(self.config.thread_name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let handle = builder.spawn(move || dispatch_loop(shared))?;
        debug!(thread = %self.config.thread_name, "spawned worker thread");
        self.thread = Some(handle);
        Ok(())
    }

    /// Deliver a kill and detach the current thread; the caller does not
    /// wait. The thread cleans its own flags up when it observes the kill.
    pub fn stop_detach(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.flags.insert(WorkerFlags::DETACH_ON_TERMINATE);
            state.signal = Signal::Kill;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.thread.take() {
            debug!("detaching worker thread");
            drop(handle);
        }
    }

    /// Deliver a kill in join mode. Does not block; the join itself happens
    /// at the next reconciliation (`start` or drop).
    pub fn stop_join(&self) {
        let mut state = self.shared.state.lock();
        state.flags.remove(WorkerFlags::DETACH_ON_TERMINATE);
        state.signal = Signal::Kill;
        self.shared.cond.notify_all();
    }

    /// Terminate the thread, wait until it is actually gone, then clear all
    /// state back to construction-time values.
    ///
    /// Unlike [`stop_detach`](Worker::stop_detach) this always waits for the
    /// thread to exit before wiping: clearing the signal slot under a
    /// still-parked thread would strand it with no kill left to observe.
    pub fn reset(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.flags.insert(WorkerFlags::DETACH_ON_TERMINATE);
            state.signal = Signal::Kill;
            self.shared.cond.notify_all();
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("worker thread panicked before reset");
            }
        } else {
            // Previously detached thread may still be winding down.
            let mut state = self.shared.state.lock();
            self.shared
                .cond
                .wait_while(&mut state, |s| s.flags.contains(WorkerFlags::THREAD_ACTIVE));
        }

        let mut state = self.shared.state.lock();
        *state = WorkerState::new();
        debug!("worker reset to construction state");
    }

    /// Join or drop a previously spawned thread's handle, per the detach
    /// mode bit. Joining blocks until the thread exits.
    fn reconcile(&mut self) {
        if let Some(handle) = self.thread.take() {
            let detach = self
                .shared
                .flags()
                .contains(WorkerFlags::DETACH_ON_TERMINATE);
            if detach {
                drop(handle);
            } else if handle.join().is_err() {
                warn!("worker thread panicked before join");
            }
        }
    }

    pub fn send_signal(&self, signal: Signal) {
        self.shared.send_signal(signal);
    }

    /// Set the pending-work bit and wake the thread. Idempotent: repeated
    /// calls before the slot is consumed coalesce into one execution.
    pub fn request_work(&self) {
        self.shared.request_work();
    }

    /// Assign the work callback, replacing any previous one.
    pub fn set_work_fn<F>(&self, work_fn: F)
    where
        F: Fn(&WorkerHandle) -> i32 + Send + Sync + 'static,
    {
        self.shared.store_work_fn(Some(Arc::new(work_fn)));
    }

    pub fn clear_work_fn(&self) {
        self.shared.store_work_fn(None);
    }

    pub fn enable_work_repeat(&self) {
        self.shared.set_repeat(true);
    }

    pub fn disable_work_repeat(&self) {
        self.shared.set_repeat(false);
    }

    /// Choose how the next termination reconciles the thread: join
    /// (blocking, the default) or detach. A change races benignly with a
    /// termination already in flight; it applies to the next
    /// reconciliation, not necessarily the current one.
    pub fn set_detach_on_terminate(&self, enable: bool) {
        self.shared.set_detach_on_terminate(enable);
    }

    /// Snapshot of the full flag bitset, taken under the state lock.
    pub fn flags(&self) -> WorkerFlags {
        self.shared.flags()
    }

    pub fn is_idle(&self) -> bool {
        self.flags().contains(WorkerFlags::IDLE)
    }

    pub fn is_busy(&self) -> bool {
        self.flags().contains(WorkerFlags::BUSY)
    }

    pub fn is_thread_active(&self) -> bool {
        self.flags().contains(WorkerFlags::THREAD_ACTIVE)
    }

    pub fn signal(&self) -> Signal {
        self.shared.signal()
    }

    pub fn set_payload_arg(&self, index: usize, payload: Option<PayloadArg>) {
        self.shared.set_payload_arg(index, payload);
    }

    pub fn payload_arg(&self, index: usize) -> Option<PayloadArg> {
        self.shared.payload_arg(index)
    }

    pub fn set_uint_arg(&self, index: usize, value: u64) {
        self.shared.set_uint_arg(index, value);
    }

    pub fn uint_arg(&self, index: usize) -> u64 {
        self.shared.uint_arg(index)
    }

    pub fn set_int_arg(&self, index: usize, value: i64) {
        self.shared.set_int_arg(index, value);
    }

    pub fn int_arg(&self, index: usize) -> i64 {
        self.shared.int_arg(index)
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.flags.insert(WorkerFlags::TERMINATE_PENDING);
            state.signal = Signal::Kill;
            self.shared.cond.notify_all();
        }
        self.reconcile();
    }
}

impl WorkerHandle {
    pub fn send_signal(&self, signal: Signal) {
        self.shared.send_signal(signal);
    }

    pub fn request_work(&self) {
        self.shared.request_work();
    }

    pub fn set_work_fn<F>(&self, work_fn: F)
    where
        F: Fn(&WorkerHandle) -> i32 + Send + Sync + 'static,
    {
        self.shared.store_work_fn(Some(Arc::new(work_fn)));
    }

    pub fn clear_work_fn(&self) {
        self.shared.store_work_fn(None);
    }

    pub fn enable_work_repeat(&self) {
        self.shared.set_repeat(true);
    }

    pub fn disable_work_repeat(&self) {
        self.shared.set_repeat(false);
    }

    pub fn set_detach_on_terminate(&self, enable: bool) {
        self.shared.set_detach_on_terminate(enable);
    }

    pub fn flags(&self) -> WorkerFlags {
        self.shared.flags()
    }

    pub fn is_idle(&self) -> bool {
        self.flags().contains(WorkerFlags::IDLE)
    }

    pub fn is_busy(&self) -> bool {
        self.flags().contains(WorkerFlags::BUSY)
    }

    pub fn is_thread_active(&self) -> bool {
        self.flags().contains(WorkerFlags::THREAD_ACTIVE)
    }

    pub fn signal(&self) -> Signal {
        self.shared.signal()
    }

    pub fn set_payload_arg(&self, index: usize, payload: Option<PayloadArg>) {
        self.shared.set_payload_arg(index, payload);
    }

    pub fn payload_arg(&self, index: usize) -> Option<PayloadArg> {
        self.shared.payload_arg(index)
    }

    pub fn set_uint_arg(&self, index: usize, value: u64) {
        self.shared.set_uint_arg(index, value);
    }

    pub fn uint_arg(&self, index: usize) -> u64 {
        self.shared.uint_arg(index)
    }

    pub fn set_int_arg(&self, index: usize, value: i64) {
        self.shared.set_int_arg(index, value);
    }

    pub fn int_arg(&self, index: usize) -> i64 {
        self.shared.int_arg(index)
    }
}

/// Body of the background thread.
///
/// THREAD_ACTIVE is the first bit set on entry and the last cleared on exit,
/// so `is_thread_active()` covers the whole cleanup window. The condvar wait
/// is the only suspension point; its predicate is re-checked on every wake.
fn dispatch_loop(shared: Arc<Shared>) {
    {
        let mut state = shared.state.lock();
        state.flags.insert(WorkerFlags::THREAD_ACTIVE);
    }
    trace!("dispatch loop entered");

    loop {
        let job = {
            let mut state = shared.state.lock();
            state.flags.insert(WorkerFlags::IDLE);
            shared.cond.wait_while(&mut state, |s| !s.wake_needed());
            state.flags.remove(WorkerFlags::IDLE);

            state.consume_signal();
            if state.flags.contains(WorkerFlags::TERMINATE_PENDING) {
                break;
            }

            if state.flags.contains(WorkerFlags::WORK_PENDING) && state.work_fn.is_some() {
                if !state.flags.contains(WorkerFlags::WORK_REPEAT) {
                    state.flags.remove(WorkerFlags::WORK_PENDING);
                }
                state.flags.insert(WorkerFlags::BUSY);
                state.work_fn.clone()
            } else {
                None
            }
        };

        if let Some(work_fn) = job {
            // Lock released: the callback may reach back into the worker.
            let status = work_fn(&WorkerHandle {
                shared: Arc::clone(&shared),
            });
            trace!(status, "work callback returned");
            let mut state = shared.state.lock();
            state.flags.remove(WorkerFlags::BUSY);
        }
    }

    // THREAD_ACTIVE last, then wake joiners waiting on the condvar.
    let mut state = shared.state.lock();
    state.flags.remove(WorkerFlags::TERMINATE_PENDING);
    state.flags.remove(WorkerFlags::WORK_REPEAT);
    state.flags.remove(WorkerFlags::WORK_PENDING);
    state.flags.remove(WorkerFlags::THREAD_ACTIVE);
    shared.cond.notify_all();
    trace!("dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        predicate()
    }

    #[test]
    fn test_request_work_coalesces() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new();
        let counter = runs.clone();
        worker.set_work_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });

        // Five requests before the thread exists coalesce into one slot.
        for _ in 0..5 {
            worker.request_work();
        }
        assert!(worker.flags().contains(WorkerFlags::WORK_PENDING));

        worker.start().unwrap();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 1, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        worker.stop_join();
    }

    #[test]
    fn test_work_repeat_reruns_until_disabled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new();
        let counter = runs.clone();
        worker.set_work_fn(move |handle| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 3 {
                handle.disable_work_repeat();
            }
            0
        });
        worker.enable_work_repeat();
        worker.start().unwrap();
        worker.request_work();

        // Disabling repeat inside run 3 takes effect the following iteration:
        // run 4 consumes the still-pending request, then the loop parks.
        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 4, Duration::from_secs(2)));
        assert!(wait_for(|| worker.is_idle(), Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        worker.stop_join();
    }

    #[test]
    fn test_kill_while_idle_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut worker = Worker::new();
        let counter = runs.clone();
        worker.set_work_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });
        worker.start().unwrap();
        assert!(wait_for(|| worker.is_idle(), Duration::from_secs(2)));

        worker.send_signal(Signal::Kill);
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_active_until_cleanup_completes() {
        let mut worker = Worker::new();
        worker.start().unwrap();
        assert!(wait_for(|| worker.is_thread_active(), Duration::from_secs(2)));

        worker.stop_join();
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));
        // THREAD_ACTIVE clears last: once it reads false, every other
        // lifecycle bit is already gone.
        assert!(worker.flags().is_empty());
    }

    #[test]
    fn test_callback_uses_handle_without_deadlock() {
        let mut worker = Worker::new();
        worker.set_uint_arg(0, 41);
        worker.set_work_fn(|handle| {
            if !handle.is_busy() {
                return 1;
            }
            let value = handle.uint_arg(0);
            handle.set_uint_arg(1, value + 1);
            0
        });
        worker.start().unwrap();
        worker.request_work();

        assert!(wait_for(|| worker.uint_arg(1) == 42, Duration::from_secs(2)));
        worker.stop_join();
    }

    #[test]
    fn test_restart_preserves_control_bits() {
        let mut worker = Worker::new();
        worker.set_work_fn(|_| 0);
        worker.start().unwrap();
        worker.stop_join();
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));

        worker.set_detach_on_terminate(true);
        worker.enable_work_repeat();
        worker.start().unwrap();
        assert!(wait_for(|| worker.is_thread_active(), Duration::from_secs(2)));

        let flags = worker.flags();
        assert!(flags.contains(WorkerFlags::DETACH_ON_TERMINATE));
        assert!(flags.contains(WorkerFlags::WORK_REPEAT));

        worker.stop_join();
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));
    }

    #[test]
    fn test_stop_detach_does_not_wait() {
        let mut worker = Worker::new();
        worker.start().unwrap();
        assert!(wait_for(|| worker.is_idle(), Duration::from_secs(2)));

        worker.stop_detach();
        // The detached thread consumes the kill and cleans up on its own.
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));
        assert_eq!(worker.flags(), WorkerFlags::DETACH_ON_TERMINATE);
    }

    #[test]
    fn test_reset_matches_fresh_worker() {
        let mut worker = Worker::new();
        worker.set_work_fn(|_| 0);
        worker.set_uint_arg(0, 9);
        worker.set_int_arg(1, -9);
        worker.set_payload_arg(0, Some(Arc::new(1u8)));
        worker.enable_work_repeat();
        worker.start().unwrap();
        worker.request_work();
        assert!(wait_for(|| worker.is_thread_active(), Duration::from_secs(2)));

        worker.reset();
        assert!(!worker.is_thread_active());
        assert!(worker.flags().is_empty());
        assert_eq!(worker.signal(), Signal::None);
        assert_eq!(worker.uint_arg(0), 0);
        assert_eq!(worker.int_arg(1), 0);
        assert!(worker.payload_arg(0).is_none());

        // A fresh cycle on the reused object behaves like a new worker.
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        worker.set_work_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        });
        worker.start().unwrap();
        worker.request_work();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 1, Duration::from_secs(2)));
        worker.stop_join();
    }

    #[test]
    fn test_out_of_range_args_via_worker() {
        let worker = Worker::new();
        worker.set_uint_arg(2, 5);
        worker.set_int_arg(2, -5);
        worker.set_payload_arg(2, Some(Arc::new(5u8)));

        assert_eq!(worker.uint_arg(2), 0);
        assert_eq!(worker.int_arg(2), 0);
        assert!(worker.payload_arg(2).is_none());
    }

    #[test]
    fn test_work_pending_without_callback_runs_nothing() {
        let mut worker = Worker::new();
        worker.start().unwrap();
        worker.request_work();
        thread::sleep(Duration::from_millis(50));
        // No callback assigned: the request stays pending and nothing runs.
        assert!(worker.flags().contains(WorkerFlags::WORK_PENDING));
        worker.stop_join();
        assert!(wait_for(|| !worker.is_thread_active(), Duration::from_secs(2)));
    }

    #[test]
    fn test_drop_joins_active_thread() {
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let mut worker = Worker::new();
            let counter = runs.clone();
            worker.set_work_fn(move |_| {
                thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
                0
            });
            worker.start().unwrap();
            worker.request_work();
            assert!(wait_for(|| worker.is_busy(), Duration::from_secs(2)));
            // Drop delivers the kill and joins; the in-flight callback is
            // never interrupted.
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
