//! Authenticated HTTP transport for the gallery API.
//!
//! [`ApiTransport`] attaches the session's current access token to every
//! request and recovers from a `401` by letting the session refresh once.

mod client;
mod error;

pub use client::ApiTransport;
pub use error::{TransportError, TransportResult};
