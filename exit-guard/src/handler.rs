//! Exit handler trait and closure adapters.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A cleanup callback run during an exit flush.
///
/// Handlers receive the status code that initiated the flush and settle
/// either immediately or after finishing asynchronous cleanup work. A
/// failure — an `Err` result or a panic — marks the flush as failed and
/// clamps the final status code to `1`, but never stops the remaining
/// handlers from settling.
///
/// Registry identity is the `Arc` allocation: registering clones of the
/// same `Arc` twice is a no-op, and
/// [`off_exit`](crate::guard::ExitGuard::off_exit) removes by the same
/// identity.
#[async_trait]
pub trait ExitHandler: Send + Sync {
    /// Runs the cleanup work for one exit flush.
    async fn run(&self, code: i32) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ExitHandler for FnHandler<F>
where
    F: Fn(i32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, code: i32) -> anyhow::Result<()> {
        (self.f)(code).await
    }
}

struct SyncFnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ExitHandler for SyncFnHandler<F>
where
    F: Fn(i32) + Send + Sync,
{
    async fn run(&self, code: i32) -> anyhow::Result<()> {
        (self.f)(code);
        Ok(())
    }
}

/// Wraps an async closure as a registrable exit handler.
///
/// ```rust,ignore
/// let handler = handler_fn(|code| async move {
///     flush_buffers(code).await?;
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ExitHandler>
where
    F: Fn(i32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Wraps a plain closure as a registrable exit handler that settles
/// immediately.
pub fn sync_handler_fn<F>(f: F) -> Arc<dyn ExitHandler>
where
    F: Fn(i32) + Send + Sync + 'static,
{
    Arc::new(SyncFnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_receives_code() {
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();

        let handler = handler_fn(move |code| {
            let seen = seen_clone.clone();
            async move {
                seen.store(code, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.run(42).await.expect("handler succeeds");
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_sync_handler_fn_settles_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let handler = sync_handler_fn(move |_code| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        handler.run(0).await.expect("handler succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_errors() {
        let handler = handler_fn(|_code| async { Err(anyhow::anyhow!("cleanup failed")) });

        let result = handler.run(0).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_arc_identity_distinguishes_registrations() {
        let a = sync_handler_fn(|_code| {});
        let b = sync_handler_fn(|_code| {});
        let a_clone = Arc::clone(&a);

        assert!(Arc::ptr_eq(&a, &a_clone));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
