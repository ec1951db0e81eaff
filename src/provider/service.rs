//! Service implementations.
//!
//! A [`Service`] receives a method name and JSON-like params and produces a
//! value. Plain async closures implement it directly; [`MethodRouter`] maps
//! method names to typed handlers that deserialize their params.
//!
//! # Example
//!
//! ```
//! use rpcwire::provider::{MethodRouter, ServiceError};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Say {
//!     text: String,
//! }
//!
//! let echo = MethodRouter::new()
//!     .method("say", |p: Say| async move { Ok::<_, ServiceError>(p.text) })
//!     .method("ping", |_: ()| async { Ok::<_, ServiceError>("pong") });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::ResponseCode;

/// Boxed future returned by services.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by a service; travels back as a response code.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Response code sent to the caller.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            ServiceError::UnknownMethod(_) => ResponseCode::ServiceNotFound,
            ServiceError::InvalidParams(_) => ResponseCode::SerializationError,
            ServiceError::Failed(_) => ResponseCode::InternalError,
        }
    }
}

/// A published object callable by method name.
pub trait Service: Send + Sync + 'static {
    fn call(&self, method: &str, params: Value) -> BoxFuture<'static, Result<Value, ServiceError>>;
}

impl<F, Fut> Service for F
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    fn call(&self, method: &str, params: Value) -> BoxFuture<'static, Result<Value, ServiceError>> {
        Box::pin((self)(method.to_string(), params))
    }
}

/// One method with typed params and result.
trait Method: Send + Sync + 'static {
    fn call(&self, params: Value) -> BoxFuture<'static, Result<Value, ServiceError>>;
}

/// Wrapper that deserializes params before calling the handler and
/// serializes its result afterwards.
struct TypedMethod<F, T, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> Method for TypedMethod<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
{
    fn call(&self, params: Value) -> BoxFuture<'static, Result<Value, ServiceError>> {
        let parsed: T = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(e) => {
                return Box::pin(async move { Err(ServiceError::InvalidParams(e.to_string())) })
            }
        };

        let fut = (self.handler)(parsed);
        Box::pin(async move {
            let result = fut.await?;
            serde_json::to_value(result).map_err(|e| ServiceError::Failed(e.to_string()))
        })
    }
}

/// Service assembled from named, typed methods.
#[derive(Default)]
pub struct MethodRouter {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method. A later registration under the same name replaces the
    /// earlier one.
    pub fn method<F, T, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    {
        self.methods.insert(
            name.to_string(),
            Box::new(TypedMethod {
                handler,
                _phantom: PhantomData,
            }),
        );
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

impl Service for MethodRouter {
    fn call(&self, method: &str, params: Value) -> BoxFuture<'static, Result<Value, ServiceError>> {
        match self.methods.get(method) {
            Some(handler) => handler.call(params),
            None => {
                let method = method.to_string();
                Box::pin(async move { Err(ServiceError::UnknownMethod(method)) })
            }
        }
    }
}
