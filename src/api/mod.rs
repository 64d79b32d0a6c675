//! Proxy REST API: wire types, error taxonomy, HTTP client and a mock.

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{HttpProxyClient, ProxyApi};
pub use error::ApiError;
pub use mock::MockProxyApi;
