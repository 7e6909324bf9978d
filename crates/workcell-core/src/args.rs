use std::any::Any;
use std::sync::Arc;

/// Number of argument slots of each kind.
pub const WORK_ARG_SLOTS: usize = 2;

/// Opaque caller-supplied payload stored in a pointer slot.
pub type PayloadArg = Arc<dyn Any + Send + Sync>;

/// Scratch argument storage passed between a caller and its work callback.
///
/// Two opaque payload slots plus two 64-bit words. The words are readable and
/// writable through both an unsigned and a signed view; the views
/// bit-reinterpret the same storage rather than holding independent values.
/// Out-of-range slot indices are defined no-ops for writes and return the
/// zero/empty sentinel for reads.
pub struct WorkArgs {
    payloads: [Option<PayloadArg>; WORK_ARG_SLOTS],
    words: [u64; WORK_ARG_SLOTS],
}

impl WorkArgs {
    pub fn new() -> Self {
        WorkArgs {
            payloads: [None, None],
            words: [0; WORK_ARG_SLOTS],
        }
    }

    pub fn set_payload(&mut self, index: usize, payload: Option<PayloadArg>) {
        if let Some(slot) = self.payloads.get_mut(index) {
            *slot = payload;
        }
    }

    pub fn payload(&self, index: usize) -> Option<PayloadArg> {
        self.payloads.get(index).and_then(Clone::clone)
    }

    pub fn set_uint(&mut self, index: usize, value: u64) {
        if let Some(word) = self.words.get_mut(index) {
            *word = value;
        }
    }

    pub fn uint(&self, index: usize) -> u64 {
        self.words.get(index).copied().unwrap_or(0)
    }

    pub fn set_int(&mut self, index: usize, value: i64) {
        if let Some(word) = self.words.get_mut(index) {
            *word = value as u64;
        }
    }

    pub fn int(&self, index: usize) -> i64 {
        self.words.get(index).map(|w| *w as i64).unwrap_or(0)
    }
}

impl Default for WorkArgs {
    fn default() -> Self {
        Self::new()
    }
}
