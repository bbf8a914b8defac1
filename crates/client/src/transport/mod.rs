//! Request transport
//!
//! This module provides:
//! - [`Request`] / [`Response`] - Per-call value objects
//! - [`HttpExecutor`] - The single physical call primitive
//! - [`Transport`] - Retry, circuit breaker and credential refresh around it

mod http;
mod request;
mod resilient;

pub use http::{HttpExecutor, ReqwestExecutor};
pub use request::{encode_path, Method, Request, Response};
pub use resilient::Transport;
