use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Lifecycle flag bits for a worker.
    ///
    /// The bitset is the authoritative lifecycle record. While THREAD_ACTIVE
    /// is set and no transition is in progress, exactly one of IDLE and BUSY
    /// holds; the remaining bits are independent mode/control bits.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WorkerFlags: u32 {
        /// A background thread is running the dispatch loop.
        const THREAD_ACTIVE = 1 << 0;
        /// The dispatch loop will exit before its next wait.
        const TERMINATE_PENDING = 1 << 1;
        /// The next termination detaches the thread instead of joining it.
        const DETACH_ON_TERMINATE = 1 << 2;
        /// The dispatch loop is parked waiting for work or a signal.
        const IDLE = 1 << 3;
        /// The work callback is currently executing.
        const BUSY = 1 << 4;
        /// A work request is waiting to be consumed.
        const WORK_PENDING = 1 << 5;
        /// WORK_PENDING survives each execution, re-running the callback.
        const WORK_REPEAT = 1 << 6;
    }
}

impl fmt::Display for WorkerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        Ok(())
    }
}
