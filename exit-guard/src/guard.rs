//! Exit capture coordinator.
//!
//! [`ExitGuard`] owns the capture state machine: it saves the active
//! termination primitive, installs an interceptor in its place, and when
//! termination is requested runs every registered [`ExitHandler`] to
//! settlement before invoking the saved primitive with the final status
//! code.

use crate::errors::{ExitGuardError, ExitInProgressError, NotCapturedError};
use crate::handler::ExitHandler;
use crate::primitive::{ExitPrimitive, ExitSlot};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// The status code reported when any exit handler fails.
pub const HANDLER_FAILURE_CODE: i32 = 1;

/// Capture lifecycle of an [`ExitGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// The environment's own termination primitive is active; no handlers
    /// may be registered or run.
    NotCaptured,
    /// The interceptor is installed; handlers may be registered and removed.
    Captured,
    /// An exit sequence has begun; the running flush owns the registry.
    Exiting,
}

impl CaptureState {
    /// Returns true if the interceptor is currently installed.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured | Self::Exiting)
    }

    /// Returns true if an exit sequence has begun.
    #[must_use]
    pub fn is_exiting(&self) -> bool {
        matches!(self, Self::Exiting)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCaptured => write!(f, "not_captured"),
            Self::Captured => write!(f, "captured"),
            Self::Exiting => write!(f, "exiting"),
        }
    }
}

/// Result of one flush: how many handlers ran and which of them failed.
#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    /// Number of handlers invoked by this flush.
    pub handlers_run: usize,
    /// Failure messages, one per handler that panicked or returned an error.
    pub failures: Vec<String>,
}

impl FlushOutcome {
    /// Returns true if every handler settled successfully.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct GuardInner {
    state: CaptureState,
    /// Primitive active at capture time; `Some` exactly while captured.
    previous: Option<ExitPrimitive>,
    /// Insertion-ordered registry; uniqueness by `Arc` identity.
    handlers: Vec<Arc<dyn ExitHandler>>,
    /// Status code of the most recent termination request.
    pending_code: Option<i32>,
    /// Runtime captured alongside the primitive, used to spawn the flush.
    runtime: Option<Handle>,
}

/// Coordinator that captures a termination primitive and defers exit until
/// registered handlers finish their cleanup.
///
/// Cloning is cheap and clones share state; the installed interceptor holds
/// one such clone. The process-wide instance lives in [`crate::process`];
/// harnesses build isolated guards against their own [`ExitSlot`].
#[derive(Clone)]
pub struct ExitGuard {
    slot: Arc<ExitSlot>,
    inner: Arc<Mutex<GuardInner>>,
}

impl ExitGuard {
    /// Creates a guard bound to the given primitive slot.
    #[must_use]
    pub fn new(slot: Arc<ExitSlot>) -> Self {
        Self {
            slot,
            inner: Arc::new(Mutex::new(GuardInner {
                state: CaptureState::NotCaptured,
                previous: None,
                handlers: Vec::new(),
                pending_code: None,
                runtime: None,
            })),
        }
    }

    /// Returns the slot this guard captures.
    #[must_use]
    pub fn slot(&self) -> &Arc<ExitSlot> {
        &self.slot
    }

    /// Captures the slot's active termination primitive.
    ///
    /// Idempotent: a second capture, or a capture while an exit sequence is
    /// running, is a no-op. Whatever primitive is active right now — the
    /// environment's own or a foreign interceptor installed earlier — is
    /// saved and restored verbatim by [`release_exit`](Self::release_exit).
    ///
    /// The ambient tokio runtime handle, if any, is captured alongside the
    /// primitive so a later termination request can spawn the deferred
    /// flush even from a non-async context.
    pub fn capture_exit(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CaptureState::NotCaptured {
            return;
        }
        let previous = self.slot.install(self.interceptor());
        inner.previous = Some(previous);
        inner.runtime = Handle::try_current().ok();
        inner.state = CaptureState::Captured;
        debug!("exit captured");
    }

    /// Releases a captured exit, restoring the primitive saved at capture.
    ///
    /// Idempotent: a no-op when nothing is captured. The handler registry
    /// and any recorded pending code are cleared. Callable from
    /// [`CaptureState::Exiting`] as the explicit way back to
    /// [`CaptureState::NotCaptured`]; a flush already in flight still
    /// invokes the primitive it saved when it started.
    pub fn release_exit(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::NotCaptured {
            return;
        }
        if let Some(previous) = inner.previous.take() {
            self.slot.install(previous);
        }
        inner.handlers.clear();
        inner.pending_code = None;
        inner.runtime = None;
        inner.state = CaptureState::NotCaptured;
        debug!("exit released");
    }

    /// Registers a cleanup handler for the next exit flush.
    ///
    /// Handlers run in registration order. Registering clones of the same
    /// `Arc` again is a silent no-op.
    ///
    /// # Errors
    ///
    /// [`NotCapturedError`] when exit is not captured, and
    /// [`ExitInProgressError`] while an exit flush is running — including
    /// when called from inside a running handler.
    pub fn on_exit(&self, handler: Arc<dyn ExitHandler>) -> Result<(), ExitGuardError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CaptureState::NotCaptured => return Err(NotCapturedError.into()),
            CaptureState::Exiting => return Err(ExitInProgressError.into()),
            CaptureState::Captured => {}
        }
        if inner.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return Ok(());
        }
        inner.handlers.push(handler);
        debug!(handlers = inner.handlers.len(), "exit handler registered");
        Ok(())
    }

    /// Removes a previously registered handler by identity.
    ///
    /// A no-op when the handler is absent or already removed, and ignored
    /// while an exit flush owns the registry. Never errors.
    pub fn off_exit(&self, handler: &Arc<dyn ExitHandler>) {
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Exiting {
            return;
        }
        inner.handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Returns the current capture state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Returns the number of handlers waiting for the next flush.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Runs and drains the registered handlers without touching the
    /// capture state or any primitive.
    ///
    /// Harness support: lets a test drive the flush deterministically
    /// without a termination request. The outcome carries failure messages
    /// rather than clamping any status code.
    pub async fn flush(&self, code: i32) -> FlushOutcome {
        self.run_handlers(code).await
    }

    /// Unconditionally restores the pre-capture state.
    ///
    /// Harness support: after a stubbed exit the state stays
    /// [`CaptureState::Exiting`] until an explicit reset, exactly so a test
    /// can assert on it and then recover for the next test.
    pub fn reset(&self) {
        self.release_exit();
    }

    /// Builds the interceptor installed into the slot in place of the
    /// saved primitive.
    fn interceptor(&self) -> ExitPrimitive {
        let guard = self.clone();
        Arc::new(move |code| guard.request_exit(code))
    }

    /// Entry point behind the intercepted termination primitive.
    ///
    /// Returns immediately: the flush runs on the current runtime (or the
    /// one captured at capture time), and the saved primitive is invoked
    /// only after every handler settles.
    fn request_exit(&self, code: i32) {
        let (previous, runtime) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Exiting => {
                    // Coalesced: no second flush, but the latest requested
                    // code wins when the running flush reaches the
                    // primitive.
                    inner.pending_code = Some(code);
                    warn!(code, "exit re-requested while flushing; code recorded");
                    return;
                }
                CaptureState::NotCaptured => {
                    // Only reachable when a release races a dispatch that
                    // already read this interceptor out of the slot.
                    warn!(code, "exit requested but capture was released; ignoring");
                    return;
                }
                CaptureState::Captured => {}
            }
            inner.state = CaptureState::Exiting;
            inner.pending_code = Some(code);
            let Some(previous) = inner.previous.clone() else {
                warn!("captured state without a saved primitive");
                return;
            };
            (previous, inner.runtime.clone())
        };

        debug!(code, "exit requested; flushing handlers");
        let guard = self.clone();
        let flush = async move {
            let outcome = guard.run_handlers(code).await;
            let final_code = if outcome.is_clean() {
                guard.inner.lock().pending_code.unwrap_or(code)
            } else {
                HANDLER_FAILURE_CODE
            };
            debug!(
                code = final_code,
                handlers = outcome.handlers_run,
                failures = outcome.failures.len(),
                "handlers settled; invoking saved termination primitive"
            );
            previous(final_code);
        };

        match Handle::try_current().ok().or(runtime) {
            Some(handle) => {
                let _ = handle.spawn(flush);
            }
            None => {
                // No runtime anywhere: drive the flush on its own thread so
                // the requester still returns immediately.
                let _ = std::thread::spawn(move || futures::executor::block_on(flush));
            }
        }
    }

    /// Drains the registry and runs every handler to settlement.
    ///
    /// Handlers start in registration order; their asynchronous tails may
    /// overlap. Failures are collected, logged, and never stop the rest.
    async fn run_handlers(&self, code: i32) -> FlushOutcome {
        let handlers: Vec<Arc<dyn ExitHandler>> = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.handlers)
        };

        if handlers.is_empty() {
            return FlushOutcome::default();
        }

        let invocations = handlers.into_iter().map(|handler| {
            AssertUnwindSafe(async move { handler.run(code).await }).catch_unwind()
        });
        let results = join_all(invocations).await;

        let mut outcome = FlushOutcome {
            handlers_run: results.len(),
            failures: Vec::new(),
        };
        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(error = %error, "exit handler failed");
                    outcome.failures.push(error.to_string());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(panic = %message, "exit handler panicked");
                    outcome.failures.push(message);
                }
            }
        }
        outcome
    }
}

impl fmt::Debug for ExitGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ExitGuard")
            .field("state", &inner.state)
            .field("handlers", &inner.handlers.len())
            .finish()
    }
}

/// Best-effort text for a panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_state_display() {
        assert_eq!(CaptureState::NotCaptured.to_string(), "not_captured");
        assert_eq!(CaptureState::Captured.to_string(), "captured");
        assert_eq!(CaptureState::Exiting.to_string(), "exiting");
    }

    #[test]
    fn test_capture_state_predicates() {
        assert!(!CaptureState::NotCaptured.is_captured());
        assert!(CaptureState::Captured.is_captured());
        assert!(CaptureState::Exiting.is_captured());
        assert!(CaptureState::Exiting.is_exiting());
        assert!(!CaptureState::Captured.is_exiting());
    }

    #[test]
    fn test_flush_outcome_is_clean() {
        let outcome = FlushOutcome::default();
        assert!(outcome.is_clean());

        let outcome = FlushOutcome {
            handlers_run: 1,
            failures: vec!["boom".to_string()],
        };
        assert!(!outcome.is_clean());
    }

    #[test]
    fn test_panic_message_downcasts() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static panic");
        assert_eq!(panic_message(payload.as_ref()), "static panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new("owned panic".to_string());
        assert_eq!(panic_message(payload.as_ref()), "owned panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new(17_u8);
        assert_eq!(panic_message(payload.as_ref()), "handler panicked");
    }
}
