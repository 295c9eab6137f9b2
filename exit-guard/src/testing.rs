//! Test-harness building blocks: stub primitives and instrumented handlers.
//!
//! Everything here is public so downstream crates can drive exit flushes
//! deterministically in their own suites, the way this crate's tests do:
//! install a [`RecordingExit`] primitive into an
//! [`ExitSlot`](crate::primitive::ExitSlot),
//! capture it with a guard, and observe which status code finally arrives.

use crate::handler::ExitHandler;
use crate::primitive::ExitPrimitive;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

struct RecordingState {
    codes: Mutex<Vec<i32>>,
    notify: Notify,
}

/// A termination primitive that records status codes instead of
/// terminating.
///
/// [`primitive`](Self::primitive) always returns the same `Arc`, so
/// identity assertions against a slot's contents hold.
pub struct RecordingExit {
    state: Arc<RecordingState>,
    primitive: ExitPrimitive,
}

impl RecordingExit {
    /// Creates a new recording primitive stub.
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(RecordingState {
            codes: Mutex::new(Vec::new()),
            notify: Notify::new(),
        });
        let recorder = Arc::clone(&state);
        let primitive: ExitPrimitive = Arc::new(move |code| {
            recorder.codes.lock().push(code);
            recorder.notify.notify_waiters();
        });
        Self { state, primitive }
    }

    /// Returns the primitive to install into a slot.
    #[must_use]
    pub fn primitive(&self) -> ExitPrimitive {
        Arc::clone(&self.primitive)
    }

    /// Returns every recorded status code in invocation order.
    #[must_use]
    pub fn codes(&self) -> Vec<i32> {
        self.state.codes.lock().clone()
    }

    /// Returns how many times the primitive was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.codes.lock().len()
    }

    /// Waits until the primitive has been invoked at least once and
    /// returns the first recorded code.
    pub async fn called(&self) -> i32 {
        loop {
            let notified = self.state.notify.notified();
            if let Some(code) = self.state.codes.lock().first().copied() {
                return code;
            }
            notified.await;
        }
    }
}

impl Default for RecordingExit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordingExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingExit")
            .field("codes", &self.codes())
            .finish()
    }
}

/// An exit handler that records every status code it is invoked with.
pub struct RecordingHandler {
    calls: Mutex<Vec<i32>>,
    fail_with: Option<String>,
}

impl RecordingHandler {
    /// Creates a handler that settles successfully.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_with: None,
        })
    }

    /// Creates a handler that settles with the given error message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        })
    }

    /// Returns the codes this handler saw, in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<i32> {
        self.calls.lock().clone()
    }

    /// Returns how many times this handler ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ExitHandler for RecordingHandler {
    async fn run(&self, code: i32) -> anyhow::Result<()> {
        self.calls.lock().push(code);
        match &self.fail_with {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("calls", &self.calls())
            .field("fail_with", &self.fail_with)
            .finish()
    }
}

/// An exit handler whose completion stays pending until released.
///
/// The deferred-promise analog: a flush that ran this handler cannot
/// settle — and no primitive can run — until the test calls
/// [`release`](Self::release).
pub struct GatedHandler {
    calls: Mutex<Vec<i32>>,
    gate: Semaphore,
}

impl GatedHandler {
    /// Creates a gated handler with a closed gate.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    /// Releases one pending invocation.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Returns the codes this handler saw, in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<i32> {
        self.calls.lock().clone()
    }

    /// Returns how many times this handler started running.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ExitHandler for GatedHandler {
    async fn run(&self, code: i32) -> anyhow::Result<()> {
        self.calls.lock().push(code);
        let permit = self.gate.acquire().await?;
        permit.forget();
        Ok(())
    }
}

impl std::fmt::Debug for GatedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedHandler")
            .field("calls", &self.calls())
            .field("open_permits", &self.gate.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_exit_records_in_order() {
        let recording = RecordingExit::new();
        let primitive = recording.primitive();

        primitive(2);
        primitive(9);

        assert_eq!(recording.codes(), vec![2, 9]);
        assert_eq!(recording.call_count(), 2);
    }

    #[test]
    fn test_recording_exit_primitive_identity_is_stable() {
        let recording = RecordingExit::new();
        assert!(Arc::ptr_eq(&recording.primitive(), &recording.primitive()));
    }

    #[tokio::test]
    async fn test_recording_exit_called_wakes_on_invocation() {
        let recording = RecordingExit::new();
        let primitive = recording.primitive();

        let waiter = tokio::spawn(async move { recording.called().await });
        tokio::task::yield_now().await;
        primitive(4);

        assert_eq!(waiter.await.expect("waiter completes"), 4);
    }

    #[tokio::test]
    async fn test_recording_handler_success_and_failure() {
        let ok = RecordingHandler::new();
        assert!(ok.run(3).await.is_ok());
        assert_eq!(ok.calls(), vec![3]);

        let failing = RecordingHandler::failing("disk still dirty");
        let error = failing.run(3).await.expect_err("handler fails");
        assert!(error.to_string().contains("disk still dirty"));
        assert_eq!(failing.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gated_handler_waits_for_release() {
        let gated = GatedHandler::new();
        let runner = {
            let gated = gated.clone();
            tokio::spawn(async move { gated.run(1).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(gated.call_count(), 1);
        assert!(!runner.is_finished());

        gated.release();
        runner
            .await
            .expect("runner completes")
            .expect("handler settles cleanly");
    }
}
