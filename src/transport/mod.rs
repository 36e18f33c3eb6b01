mod http_transport;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

pub use http_transport::{ByteStream, HttpTransport};

/// Deadline and cancellation signal shared by every await point of one call.
///
/// Cloning is cheap; clones observe the same token and deadline.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl CallContext {
    #[must_use]
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// Context that is never cancelled externally.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, CancellationToken::new())
    }

    /// Same cancellation signal, deadline capped at `timeout` from now.
    #[must_use]
    pub fn narrowed(&self, timeout: Duration) -> Self {
        let deadline = (Instant::now() + timeout).min(self.deadline);
        Self {
            cancel: self.cancel.clone(),
            deadline,
            timeout: timeout.min(self.timeout),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fail fast if the call was cancelled or its deadline passed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Cancelled`] or [`GatewayError::Timeout`].
    pub fn check(&self) -> Result<(), GatewayError> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        if Instant::now() >= self.deadline {
            return Err(GatewayError::Timeout { after: self.timeout });
        }
        Ok(())
    }

    /// Run `fut` unless cancellation or the deadline comes first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Cancelled`] or [`GatewayError::Timeout`]; the
    /// future is dropped in either case.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, GatewayError> {
        self.check()?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled()),
            () = tokio::time::sleep_until(self.deadline) => Err(GatewayError::Timeout { after: self.timeout }),
            out = fut => Ok(out),
        }
    }
}

fn cancelled() -> GatewayError {
    GatewayError::Cancelled("Aborted".to_string())
}

/// `{base}/{path}` with exactly one slash between them.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    )
}
