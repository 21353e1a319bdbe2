//! The transport seam.
//!
//! The engine never touches a serial port. It hands a fully rendered query to
//! a [`Transport`] and waits for one complete reply line; framing belongs to
//! the implementation.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;

/// One request/reply exchange at a time.
#[async_trait]
pub trait Transport: Send {
    /// Sends `request` and returns the complete reply, terminator included.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Runs one exchange bounded by `timeout`.
pub async fn exchange_with_timeout<T: Transport + ?Sized>(
    transport: &mut T,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    debug!(request = %String::from_utf8_lossy(request).escape_debug(), "tx");
    let reply = tokio::time::timeout(timeout, transport.exchange(request))
        .await
        .map_err(|_| TransportError::Timeout)??;
    debug!(reply = %String::from_utf8_lossy(&reply).escape_debug(), "rx");
    Ok(reply)
}
