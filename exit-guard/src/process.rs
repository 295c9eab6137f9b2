//! Process-wide exit capture surface.
//!
//! A host process has one termination primitive, so the crate exposes one
//! shared slot (defaulting to the real [`std::process::exit`]) and one
//! shared [`ExitGuard`] bound to it, with free functions mirroring the
//! guard's surface. Harnesses that want isolation build their own guard
//! with [`ExitGuard::new`] instead of touching the shared one.

use crate::errors::ExitGuardError;
use crate::guard::{ExitGuard, FlushOutcome};
use crate::handler::ExitHandler;
use crate::primitive::ExitSlot;
use std::sync::{Arc, LazyLock};

static PROCESS_SLOT: LazyLock<Arc<ExitSlot>> = LazyLock::new(|| Arc::new(ExitSlot::new()));

static PROCESS_GUARD: LazyLock<ExitGuard> = LazyLock::new(|| ExitGuard::new(process_slot()));

/// Returns the process-wide termination slot.
#[must_use]
pub fn process_slot() -> Arc<ExitSlot> {
    Arc::clone(&PROCESS_SLOT)
}

/// Returns the process-wide exit guard.
#[must_use]
pub fn process_guard() -> &'static ExitGuard {
    &PROCESS_GUARD
}

/// Requests process termination through the active primitive.
///
/// The drop-in replacement for [`std::process::exit`] in hosts that embed
/// the guard: while exit is captured, handlers flush first and this call
/// returns immediately; otherwise the real primitive runs and this call
/// never returns.
pub fn exit(code: i32) {
    PROCESS_SLOT.exit(code);
}

/// Captures process exit. See [`ExitGuard::capture_exit`].
pub fn capture_exit() {
    PROCESS_GUARD.capture_exit();
}

/// Releases process exit. See [`ExitGuard::release_exit`].
pub fn release_exit() {
    PROCESS_GUARD.release_exit();
}

/// Registers a process exit handler. See [`ExitGuard::on_exit`].
///
/// # Errors
///
/// [`NotCapturedError`](crate::errors::NotCapturedError) when exit is not
/// captured, [`ExitInProgressError`](crate::errors::ExitInProgressError)
/// while a flush runs.
pub fn on_exit(handler: Arc<dyn ExitHandler>) -> Result<(), ExitGuardError> {
    PROCESS_GUARD.on_exit(handler)
}

/// Removes a process exit handler. See [`ExitGuard::off_exit`].
pub fn off_exit(handler: &Arc<dyn ExitHandler>) {
    PROCESS_GUARD.off_exit(handler);
}

/// Unconditionally resets the process-wide guard. See [`ExitGuard::reset`].
pub fn reset() {
    PROCESS_GUARD.reset();
}

/// Flushes the process-wide registry. See [`ExitGuard::flush`].
pub async fn flush(code: i32) -> FlushOutcome {
    PROCESS_GUARD.flush(code).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::CaptureState;
    use crate::handler::sync_handler_fn;
    use crate::testing::RecordingExit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_process_slot_is_shared() {
        assert!(Arc::ptr_eq(&process_slot(), &process_slot()));
        assert!(Arc::ptr_eq(process_guard().slot(), &process_slot()));
    }

    // The only test that touches the shared guard: it stubs the primitive
    // before capturing and restores everything afterwards, so it cannot
    // terminate the test process or race another test.
    #[tokio::test]
    async fn test_process_surface_round_trip() {
        let recording = RecordingExit::new();
        let stub = recording.primitive();
        let original = process_slot().current();
        let replaced = process_slot().install(stub.clone());
        assert!(Arc::ptr_eq(&replaced, &original));

        capture_exit();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        on_exit(sync_handler_fn(move |_code| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .expect("registration succeeds while captured");

        exit(5);
        assert!(process_guard().state().is_exiting());

        assert_eq!(recording.called().await, 5);
        assert_eq!(recording.codes(), vec![5]);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // Recover the shared state for the rest of the suite: reset puts
        // the stub back, then the stub is swapped for the real primitive.
        reset();
        assert_eq!(process_guard().state(), CaptureState::NotCaptured);
        let restored = process_slot().install(original.clone());
        assert!(Arc::ptr_eq(&restored, &stub));
        assert!(Arc::ptr_eq(&process_slot().current(), &original));
    }
}
