//! # Jobline Client
//!
//! The resilience core shared by every call to the Jobline queue API.
//!
//! ## Features
//!
//! - **Automatic retries**: Exponential backoff with jitter, gated on request idempotency
//! - **Circuit breaker**: Fails fast while the service is unavailable, probes for recovery
//! - **Credential refresh**: Single-flight refresh, proactive before expiry and reactive on 401
//! - **Error taxonomy**: Every failure classified into an [`ErrorKind`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Transport                             │
//! │  ┌────────────────┐  ┌────────────────┐  ┌───────────────┐  │
//! │  │ CircuitBreaker │  │  RetryPolicy   │  │  Credential   │  │
//! │  │  (fail fast)   │  │   (backoff)    │  │   Refresher   │  │
//! │  └────────────────┘  └────────────────┘  └───────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HttpExecutor                            │
//! │             (one physical call per attempt)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use jobline_client::prelude::*;
//!
//! let transport = Transport::from_config(&ClientConfig::from_env())?;
//!
//! match transport.execute(Request::get("/queues/emails")).await {
//!     Ok(response) => println!("{}", response.text()),
//!     Err(e) if e.kind() == ErrorKind::CircuitOpen => eprintln!("service unavailable"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod reliability;
pub mod transport;

/// Prelude for common imports
pub mod prelude {
    pub use crate::auth::{CredentialExchange, CredentialRefresher, Credentials, TokenGrant};
    pub use crate::config::ClientConfig;
    pub use crate::error::{ApiError, ClientError, ErrorKind, RateLimitInfo};
    pub use crate::reliability::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryPolicy,
    };
    pub use crate::transport::{HttpExecutor, Method, Request, Response, Transport};
}

// Re-export key types at crate root
pub use auth::{CredentialExchange, CredentialRefresher, Credentials, HttpCredentialExchange};
pub use config::ClientConfig;
pub use error::{ApiError, ClientError, ErrorKind, RateLimitInfo, Result};
pub use reliability::{
    duration_millis, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    RetryPolicy,
};
pub use transport::{
    encode_path, HttpExecutor, Method, ReqwestExecutor, Request, Response, Transport,
};
