//! Error types for exit capture and handler registration.
//!
//! Both errors are programmer-usage errors surfaced synchronously by
//! [`on_exit`](crate::guard::ExitGuard::on_exit); the exit flush itself never
//! produces them. Handler failures are collected by the flush instead (see
//! [`FlushOutcome`](crate::guard::FlushOutcome)).

use thiserror::Error;

/// Error raised when a handler is registered while exit is not captured.
#[derive(Debug, Clone, Error)]
#[error("Cannot install handler when exit is not captured. Call `capture_exit()` first")]
pub struct NotCapturedError;

/// Error raised when a handler is registered while an exit flush is running.
///
/// Once an exit sequence begins, the running flush owns the handler
/// registry; a handler that tries to install another handler observes this
/// error rather than racing a late registration.
#[derive(Debug, Clone, Error)]
#[error("Cannot install handler while `on_exit` handlers are running.")]
pub struct ExitInProgressError;

/// The main error type for exit-guard operations.
#[derive(Debug, Clone, Error)]
pub enum ExitGuardError {
    /// Exit is not captured, so no handler may be installed.
    #[error("{0}")]
    NotCaptured(#[from] NotCapturedError),

    /// An exit sequence is running and owns the handler registry.
    #[error("{0}")]
    ExitInProgress(#[from] ExitInProgressError),
}
