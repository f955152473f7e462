//! Outbound client for the time-tracking provider API.
//!
//! One [`HttpApiGateway`] is built at startup and shared behind
//! [`DynApiGateway`]; per-workspace credentials come from a
//! [`TokenStore`]. Calls retry rate limits, server errors and transport
//! failures with capped exponential backoff, and list endpoints follow
//! the provider's `X-Next-Page` pagination contract.

pub mod client;
pub mod config;
pub mod error;
pub mod token;

pub use client::{ApiGateway, DynApiGateway, HttpApiGateway};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use token::{DynTokenStore, MemoryTokenStore, TokenStore, WorkspaceToken};

/// Convenience alias for gateway call results.
pub type GatewayResult<T> = Result<T, GatewayError>;
