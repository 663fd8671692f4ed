//! The remote call a throttled mutation wraps.

use async_trait::async_trait;
use std::future::Future;

use super::error::RemoteError;

/// A remote operation taking a payload by reference so it can be re-sent on
/// retry.
#[async_trait]
pub trait RemoteCall<T, R>: Send + Sync {
    /// Perform the call once.
    async fn call(&self, payload: &T) -> Result<R, RemoteError>;
}

/// Adapter turning an async closure over an owned payload into a
/// [`RemoteCall`]. The payload is cloned for each attempt.
pub struct FnRemote<F>(F);

/// Wrap `f` as a [`RemoteCall`].
pub fn remote_fn<F>(f: F) -> FnRemote<F> {
    FnRemote(f)
}

#[async_trait]
impl<T, R, F, Fut> RemoteCall<T, R> for FnRemote<F>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
{
    async fn call(&self, payload: &T) -> Result<R, RemoteError> {
        (self.0)(payload.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_fn_adapter() {
        let remote = remote_fn(|id: String| async move {
            if id.is_empty() {
                Err(RemoteError::with_status(400, "empty id"))
            } else {
                Ok(id.len())
            }
        });

        assert_eq!(remote.call(&"lead-1".to_string()).await, Ok(6));
        assert_eq!(
            remote.call(&String::new()).await.unwrap_err().status,
            Some(400)
        );
    }
}
