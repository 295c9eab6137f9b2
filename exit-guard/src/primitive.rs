//! The process termination primitive and its mutable slot.

use parking_lot::RwLock;
use std::sync::Arc;

/// A process termination primitive.
///
/// Invoking one with a status code ends the process: the real primitive
/// wraps [`std::process::exit`], while harnesses install primitives that
/// record the code instead. Identity is the `Arc` allocation, so a saved
/// primitive can be recognized and restored exactly.
pub type ExitPrimitive = Arc<dyn Fn(i32) + Send + Sync>;

/// Returns a primitive that terminates the process via
/// [`std::process::exit`].
#[must_use]
pub fn real_exit_primitive() -> ExitPrimitive {
    Arc::new(|code| std::process::exit(code))
}

/// The mutable slot holding the active termination primitive for one
/// process-like environment.
///
/// [`install`](Self::install) swaps primitives and returns the previous
/// one, so stacked interceptors compose: whatever replaced the primitive
/// before a capture is exactly what the matching release restores. The
/// process-wide slot lives in [`crate::process`]; harnesses build their own
/// with a recording primitive.
pub struct ExitSlot {
    current: RwLock<ExitPrimitive>,
}

impl ExitSlot {
    /// Creates a slot whose active primitive really terminates the process.
    #[must_use]
    pub fn new() -> Self {
        Self::with_primitive(real_exit_primitive())
    }

    /// Creates a slot with a caller-provided active primitive.
    #[must_use]
    pub fn with_primitive(primitive: ExitPrimitive) -> Self {
        Self {
            current: RwLock::new(primitive),
        }
    }

    /// Requests termination through the active primitive.
    ///
    /// Does not return once a real primitive runs. While an interceptor is
    /// installed the request is deferred and this call returns immediately.
    pub fn exit(&self, code: i32) {
        // Clone out of the lock: the primitive may never return, or may
        // re-enter the slot through a release.
        let primitive = self.current.read().clone();
        primitive(code);
    }

    /// Installs a new active primitive, returning the one it replaces.
    pub fn install(&self, primitive: ExitPrimitive) -> ExitPrimitive {
        let mut current = self.current.write();
        std::mem::replace(&mut *current, primitive)
    }

    /// Returns the active primitive.
    #[must_use]
    pub fn current(&self) -> ExitPrimitive {
        self.current.read().clone()
    }
}

impl Default for ExitSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExitSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitSlot").finish_non_exhaustive()
    }
}
