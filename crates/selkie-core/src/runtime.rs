//! Runtime abstraction for task spawning and time
//!
//! TigerStyle: Explicit runtime seam so the engine never calls `tokio::spawn`
//! directly. Etherealization and manager drains are fire-and-forget tasks;
//! everything that launches one goes through this trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// JoinHandle for spawned tasks
pub type JoinHandle<T> = Pin<Box<dyn Future<Output = Result<T, JoinError>> + Send>>;

/// Error from joining a task
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("task panicked")]
    Panicked,
    #[error("task cancelled")]
    Cancelled,
}

/// Instant in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant {
    /// Milliseconds since epoch
    pub millis: u64,
}

impl Instant {
    /// Create a new instant from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Get duration elapsed since this instant
    pub fn elapsed(&self, now: Instant) -> Duration {
        assert!(now.millis >= self.millis, "now must be >= self for elapsed");
        Duration::from_millis(now.millis - self.millis)
    }
}

/// Runtime abstraction trait
///
/// Note: this trait is NOT dyn-safe due to spawn's generic parameter.
/// Use the concrete `TokioRuntime` or the `CurrentRuntime` alias.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync + Clone {
    /// Get the current instant
    fn now(&self) -> Instant;

    /// Sleep for a duration
    ///
    /// Preconditions:
    /// - duration must be < 1 hour (safety limit)
    async fn sleep(&self, duration: Duration);

    /// Yield control to the scheduler
    async fn yield_now(&self);

    /// Spawn a new task
    ///
    /// The task runs concurrently with the current task.
    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

// =============================================================================
// TokioRuntime (Production)
// =============================================================================

/// Production runtime using tokio
///
/// TigerStyle: Thin wrapper over tokio with explicit contracts.
#[derive(Debug, Clone)]
pub struct TokioRuntime;

#[async_trait::async_trait]
impl Runtime for TokioRuntime {
    fn now(&self) -> Instant {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        Instant::from_millis(since_epoch.as_millis() as u64)
    }

    async fn sleep(&self, duration: Duration) {
        assert!(
            duration < Duration::from_secs(3600),
            "sleep duration too long (>1 hour)"
        );
        tokio::time::sleep(duration).await;
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(future);
        Box::pin(async move {
            handle.await.map_err(|e| {
                if e.is_panic() {
                    JoinError::Panicked
                } else {
                    JoinError::Cancelled
                }
            })
        })
    }
}

// =============================================================================
// Runtime Factory
// =============================================================================

/// Type alias for the current runtime
pub type CurrentRuntime = TokioRuntime;

/// Get the current runtime instance
pub fn current_runtime() -> CurrentRuntime {
    TokioRuntime
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_runtime_sleep() {
        let runtime = TokioRuntime;
        let start = runtime.now();

        runtime.sleep(Duration::from_millis(10)).await;

        let elapsed = start.elapsed(runtime.now());
        assert!(
            elapsed >= Duration::from_millis(10),
            "Should sleep for at least 10ms"
        );
    }

    #[tokio::test]
    async fn test_tokio_runtime_spawn() {
        let runtime = TokioRuntime;

        let handle = runtime.spawn(async { 42 });

        let result = handle.await.unwrap();
        assert_eq!(result, 42);
    }
}
