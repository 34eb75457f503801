//! # Transport Boundary
//!
//! The engine never speaks HTTP itself. It builds [`RequestConfig`]s and hands
//! them to an injected [`Transport`], treating it as "send config, receive a
//! JSON value or an error".
//!
//! ## Rust Concepts
//!
//! - **`BoxFuture`**: Trait methods can't be `async fn` on a `dyn` object, so
//!   `send` returns a pinned, boxed future instead. Implementors write
//!   `Box::pin(async move { ... })`.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

// =============================================================================
// Request Configuration
// =============================================================================

/// HTTP method of a physical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    #[default]
    Post,
    /// PUT
    Put,
}

/// Everything the transport needs to issue one physical request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestConfig {
    /// Base URL of the service.
    #[serde(rename = "baseURL")]
    pub base_url: String,

    /// Path below the base URL.
    pub path: String,

    /// HTTP method.
    pub method: Method,

    /// Request body.
    pub data: Option<serde_json::Value>,
}

impl RequestConfig {
    /// Creates a config for `base_url` + `path` with the default method.
    pub fn new(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            method: Method::default(),
            data: None,
        }
    }

    /// Sets the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Returns a copy of this config carrying `data` as the body.
    pub fn with_data(&self, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..self.clone()
        }
    }

    /// Returns the full URL.
    pub fn url(&self) -> String {
        match (self.base_url.ends_with('/'), self.path.starts_with('/')) {
            (true, true) => format!("{}{}", self.base_url, &self.path[1..]),
            (false, false) if !self.path.is_empty() => format!("{}/{}", self.base_url, self.path),
            _ => format!("{}{}", self.base_url, self.path),
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// A failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// HTTP status, if the server answered.
    pub status: Option<u16>,
    /// Description of the failure.
    pub message: String,
}

impl TransportError {
    /// Creates an error without a status (connection failure, timeout, ...).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Creates an error for an HTTP status.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {}

// =============================================================================
// Transport Trait
// =============================================================================

/// The injected HTTP client.
///
/// # Example
///
/// ```rust
/// use fetchgate::{RequestConfig, Transport, TransportError};
/// use futures::future::BoxFuture;
///
/// struct Echo;
///
/// impl Transport for Echo {
///     fn send(&self, config: RequestConfig) -> BoxFuture<'_, Result<serde_json::Value, TransportError>> {
///         Box::pin(async move { Ok(config.data.unwrap_or(serde_json::Value::Null)) })
///     }
/// }
/// ```
pub trait Transport: Send + Sync {
    /// Issues one physical request.
    fn send(&self, config: RequestConfig) -> BoxFuture<'_, Result<serde_json::Value, TransportError>>;
}
