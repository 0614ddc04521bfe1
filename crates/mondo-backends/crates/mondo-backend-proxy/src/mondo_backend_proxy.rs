//! JSON-over-HTTP proxy backend for mondo
//!
//! The analytical (OLAP) half of the dual-engine store. Every backend
//! operation becomes one POSTed JSON envelope; transient failures retry
//! with a fixed delay, remote error codes surface unchanged, and
//! columnar results round-trip through the mapper.

mod backend;
mod rpc;

#[cfg(test)]
mod backend_tests;
#[cfg(test)]
mod rpc_tests;

pub use backend::{ProxyBackend, ProxyConfig};
pub use rpc::{NON_RETRYABLE_CODES, RETRYABLE_STATUS, RpcRequest, RpcResponse};
