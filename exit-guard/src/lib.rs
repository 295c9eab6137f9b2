//! # Exit Guard
//!
//! A Rust implementation of deferred process exit with asynchronous cleanup.
//!
//! Exit Guard captures the process-wide "terminate now" primitive and holds
//! termination back until registered cleanup finishes, with support for:
//!
//! - **Exit capture**: Swap the active termination primitive for an interceptor
//! - **Async cleanup**: Run registered handlers to settlement before terminating
//! - **Failure isolation**: A failing or panicking handler never blocks the rest
//! - **Coalesced exits**: Termination requests during a flush never flush twice
//! - **Deterministic testing**: Recording primitives, manual flush, full reset
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use exit_guard::prelude::*;
//!
//! // Route termination requests through the guard
//! capture_exit();
//!
//! // Register cleanup that must settle before the process dies
//! on_exit(handler_fn(|code| async move {
//!     flush_journal(code).await?;
//!     Ok(())
//! }))?;
//!
//! // Request termination; handlers run first, then the real exit
//! exit_guard::process::exit(0);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errors;
pub mod guard;
pub mod handler;
pub mod primitive;
pub mod process;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::{ExitGuardError, ExitInProgressError, NotCapturedError};
    pub use crate::guard::{
        CaptureState, ExitGuard, FlushOutcome, HANDLER_FAILURE_CODE,
    };
    pub use crate::handler::{handler_fn, sync_handler_fn, ExitHandler};
    pub use crate::primitive::{real_exit_primitive, ExitPrimitive, ExitSlot};
    pub use crate::process::{capture_exit, off_exit, on_exit, release_exit};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_prelude_builds_a_guard() {
        let guard = ExitGuard::new(Arc::new(ExitSlot::default()));
        assert_eq!(guard.state(), CaptureState::NotCaptured);
        assert_eq!(guard.handler_count(), 0);
    }
}
