//! Remote call helpers.

use offsync_protocol::{RemoteError, RemoteResult};
use std::future::Future;
use std::time::Duration;

/// Runs a remote call, failing it with a network error after `timeout`.
pub(crate) async fn call<T, F>(timeout: Duration, request: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(timeout)),
    }
}
