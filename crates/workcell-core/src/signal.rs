/// Out-of-band command delivered to the background thread.
///
/// Single slot: a new signal overwrites an unconsumed one. The dispatch loop
/// consumes the slot exactly once per wake, translating `Kill` into a pending
/// termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    /// No command pending.
    #[default]
    None,
    /// Terminate the dispatch loop at the top of its next iteration.
    Kill,
}

impl Signal {
    /// True when a command is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        *self != Signal::None
    }
}
