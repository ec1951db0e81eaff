//! Request/response correlation.
//!
//! Every outbound request, register or discover message gets a
//! [`PendingCall`] keyed by its request id. The connection's reader task
//! resolves it when the matching response arrives; the caller awaits the
//! [`ResponseFuture`] returned at registration time.
//!
//! A call is resolved exactly once. Whoever removes the entry from the map
//! owns the resolution: the reader (response), the connection teardown
//! (failure) or the caller's own timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};
use crate::protocol::RpcResponse;

/// Identifier of one physical connection.
pub type ConnectionId = u64;

/// Generate a fresh request id (UUID v4).
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// In-flight call awaiting its response.
#[derive(Debug)]
pub struct PendingCall {
    slot: oneshot::Sender<Result<RpcResponse>>,
    connection: ConnectionId,
    seq: u64,
}

impl PendingCall {
    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

#[derive(Debug, Default)]
struct Inner {
    calls: DashMap<String, PendingCall>,
    next_seq: AtomicU64,
}

/// Concurrent map of in-flight calls.
///
/// Cheap to clone; all clones share one map.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Inner>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the future that resolves it.
    ///
    /// # Errors
    ///
    /// [`RpcError::DuplicateRequestId`] if `request_id` is already in flight.
    /// The existing call is left untouched.
    pub fn put_request(
        &self,
        request_id: impl Into<String>,
        connection: ConnectionId,
        timeout: Option<Duration>,
    ) -> Result<ResponseFuture> {
        let request_id = request_id.into();

        match self.inner.calls.entry(request_id.clone()) {
            Entry::Occupied(_) => Err(RpcError::DuplicateRequestId(request_id)),
            Entry::Vacant(vacant) => {
                let (slot, rx) = oneshot::channel();
                let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(PendingCall {
                    slot,
                    connection,
                    seq,
                });
                Ok(ResponseFuture {
                    request_id,
                    seq,
                    rx,
                    timeout,
                    calls: self.clone(),
                })
            }
        }
    }

    /// Resolve the call matching `response.request_id`.
    ///
    /// Returns `false` and drops the response when no call is pending,
    /// typically because it already timed out.
    pub fn complete(&self, response: RpcResponse) -> bool {
        match self.inner.calls.remove(&response.request_id) {
            Some((_, call)) => {
                let _ = call.slot.send(Ok(response));
                true
            }
            None => {
                tracing::debug!(
                    "Dropping response for unknown request {}",
                    response.request_id
                );
                false
            }
        }
    }

    /// Fail one call.
    pub fn fail(&self, request_id: &str, error: RpcError) -> bool {
        match self.inner.calls.remove(request_id) {
            Some((_, call)) => {
                let _ = call.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every call owned by `connection`, returning how many were failed.
    pub fn fail_connection<F>(&self, connection: ConnectionId, make_err: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        self.fail_where(|call| call.connection == connection, make_err)
    }

    /// Fail every call in the map.
    pub fn fail_all<F>(&self, make_err: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        self.fail_where(|_| true, make_err)
    }

    fn fail_where<P, F>(&self, predicate: P, make_err: F) -> usize
    where
        P: Fn(&PendingCall) -> bool,
        F: Fn() -> RpcError,
    {
        let ids: Vec<String> = self
            .inner
            .calls
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.inner.calls.remove_if(&id, |_, call| predicate(call)) {
                let _ = call.slot.send(Err(make_err()));
                failed += 1;
            }
        }
        failed
    }

    /// Forget a call without resolving it.
    pub fn remove(&self, request_id: &str) -> bool {
        self.inner.calls.remove(request_id).is_some()
    }

    fn remove_own(&self, request_id: &str, seq: u64) -> bool {
        self.inner
            .calls
            .remove_if(request_id, |_, call| call.seq == seq)
            .is_some()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.calls.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.calls.is_empty()
    }
}

/// Caller side of a [`PendingCall`].
///
/// Dropping the future without awaiting it forgets the call.
#[derive(Debug)]
pub struct ResponseFuture {
    request_id: String,
    seq: u64,
    rx: oneshot::Receiver<Result<RpcResponse>>,
    timeout: Option<Duration>,
    calls: PendingCalls,
}

impl ResponseFuture {
    #[inline]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] when the timeout elapses first, or whatever
    /// error the connection failed the call with.
    pub async fn wait(mut self) -> Result<RpcResponse> {
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => return self.recv().await,
        };

        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(resolved) => resolved.unwrap_or(Err(RpcError::ConnectionClosed)),
            Err(_) => {
                if self.calls.remove_own(&self.request_id, self.seq) {
                    tracing::debug!(
                        "Request {} timed out after {:?}",
                        self.request_id,
                        timeout
                    );
                    return Err(RpcError::Timeout);
                }
                // Lost the race: whoever removed the entry is resolving it now.
                self.recv().await
            }
        }
    }

    async fn recv(&mut self) -> Result<RpcResponse> {
        (&mut self.rx)
            .await
            .unwrap_or(Err(RpcError::ConnectionClosed))
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.calls.remove_own(&self.request_id, self.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONN: ConnectionId = 1;

    #[test]
    fn test_generate_request_id_is_unique_uuid() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn test_complete_resolves_future() {
        let calls = PendingCalls::new();
        let future = calls.put_request("r1", CONN, None).unwrap();

        assert!(calls.complete(RpcResponse::success("r1", Some(json!(7)))));
        let response = future.wait().await.unwrap();
        assert_eq!(response.data, Some(json!(7)));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_leaves_original() {
        let calls = PendingCalls::new();
        let original = calls.put_request("r1", CONN, None).unwrap();

        let err = calls.put_request("r1", 2, None).unwrap_err();
        assert!(matches!(err, RpcError::DuplicateRequestId(ref id) if id == "r1"));
        assert_eq!(calls.len(), 1);

        calls.complete(RpcResponse::success("r1", None));
        assert!(original.wait().await.unwrap().is_success());
    }

    #[test]
    fn test_complete_unknown_is_noop() {
        let calls = PendingCalls::new();
        assert!(!calls.complete(RpcResponse::success("ghost", None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_dropped() {
        let calls = PendingCalls::new();
        let future = calls
            .put_request("r1", CONN, Some(Duration::from_millis(50)))
            .unwrap();

        assert!(matches!(future.wait().await, Err(RpcError::Timeout)));
        assert!(!calls.contains("r1"));
        assert!(!calls.complete(RpcResponse::success("r1", None)));
    }

    #[tokio::test]
    async fn test_fail_connection_fans_out_once() {
        let calls = PendingCalls::new();
        let doomed: Vec<_> = (0..5)
            .map(|i| calls.put_request(format!("a{i}"), CONN, None).unwrap())
            .collect();
        let survivor = calls.put_request("b0", 2, None).unwrap();

        assert_eq!(calls.fail_connection(CONN, || RpcError::ConnectionClosed), 5);
        assert_eq!(calls.fail_connection(CONN, || RpcError::ConnectionClosed), 0);

        for future in doomed {
            assert!(matches!(future.wait().await, Err(RpcError::ConnectionClosed)));
        }
        assert!(calls.contains("b0"));
        calls.complete(RpcResponse::success("b0", None));
        assert!(survivor.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_forgets_call() {
        let calls = PendingCalls::new();
        drop(calls.put_request("r1", CONN, None).unwrap());
        assert!(calls.is_empty());

        // id is free again
        assert!(calls.put_request("r1", CONN, None).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeout_racing_response_resolves_once() {
        let calls = PendingCalls::new();

        for round in 0..200 {
            let id = format!("race-{round}");
            let future = calls
                .put_request(id.clone(), CONN, Some(Duration::from_micros(50)))
                .unwrap();

            let completer = {
                let calls = calls.clone();
                let id = id.clone();
                tokio::spawn(async move { calls.complete(RpcResponse::success(id, None)) })
            };

            let outcome = future.wait().await;
            let delivered = completer.await.unwrap();

            match outcome {
                Ok(response) => {
                    assert!(delivered);
                    assert_eq!(response.request_id, id);
                }
                Err(RpcError::Timeout) => assert!(!delivered),
                Err(other) => panic!("unexpected error {other}"),
            }
            assert!(!calls.contains(&id));
        }
    }
}
