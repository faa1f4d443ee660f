//! Fire-and-forget persistence.
//!
//! Operations spawned here never propagate failure to the caller: errors are
//! logged at `warn` and dropped. Use this only for advisory writes such as agent
//! presence. Message persistence must be awaited and its errors surfaced.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;

/// Spawn `fut`, logging and swallowing its error.
///
/// The handle resolves to `Some(value)` on success and `None` on failure.
/// Production callers drop it; tests may await it.
pub fn spawn<F, T, E>(operation: &'static str, fut: F) -> JoinHandle<Option<T>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "Best-effort operation failed");
                None
            }
        }
    })
}
