//! Lazy, exactly-once model loading.
//!
//! The first request that needs the model triggers the load; concurrent
//! requests arriving meanwhile wait for that same load instead of starting
//! their own. A failed load leaves the guard unset so the next caller retries.

use std::future::Future;

use tokio::sync::OnceCell;
use tracing::{error, info};

/// Tracks whether the served model has been loaded into the engine.
#[derive(Debug)]
pub struct ModelGuard {
    model: String,
    loaded: OnceCell<()>,
}

impl ModelGuard {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            loaded: OnceCell::new(),
        }
    }

    /// Model this guard covers.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Non-blocking check used by the health endpoint.
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Run `load` unless the model is already loaded.
    ///
    /// At most one `load` future runs at a time. Its error is returned to the
    /// caller that ran it; callers that were waiting then retry in turn.
    pub async fn ensure_loaded<F, Fut, E>(&self, load: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.is_loaded() {
            return Ok(());
        }

        self.loaded
            .get_or_try_init(|| async {
                info!(model = self.model, "Loading model");
                match load().await {
                    Ok(()) => {
                        info!(model = self.model, "Model loaded successfully");
                        Ok(())
                    }
                    Err(e) => {
                        error!(model = self.model, "Failed to load model: {e}");
                        Err(e)
                    }
                }
            })
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_calls_load_once() {
        let guard = Arc::new(ModelGuard::new("m"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .ensure_loaded(|| async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<(), String>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(guard.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let guard = ModelGuard::new("m");

        let first = guard
            .ensure_loaded(|| async { Err::<(), _>("connection refused".to_string()) })
            .await;
        assert_eq!(first.unwrap_err(), "connection refused");
        assert!(!guard.is_loaded());

        let second = guard.ensure_loaded(|| async { Ok::<(), String>(()) }).await;
        assert!(second.is_ok());
        assert!(guard.is_loaded());
    }

    #[tokio::test]
    async fn test_loaded_guard_skips_load() {
        let guard = ModelGuard::new("m");
        guard.ensure_loaded(|| async { Ok::<(), String>(()) }).await.unwrap();

        let result = guard
            .ensure_loaded(|| async { Err::<(), _>("must not run".to_string()) })
            .await;
        assert!(result.is_ok());
    }
}
