//! Cancellation support for suspension points.
//!
//! Network operations and external tool invocations race against a
//! [`CancellationToken`]. When the token fires first the operation future is
//! dropped, which kills child processes (`kill_on_drop`) and deletes partial
//! downloads (temporary files are removed on drop).

use std::future::Future;

use thiserror::Error;
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Run `fut` unless `token` is cancelled first.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T, Cancelled>
where
  F: Future<Output = T>,
{
  if token.is_cancelled() {
    return Err(Cancelled);
  }
  tokio::select! {
    biased;
    _ = token.cancelled() => Err(Cancelled),
    out = fut => Ok(out),
  }
}
