//! Native host implementations of the bridge traits.
//!
//! Server and desktop deployments get their [`bridge_traits::HttpClient`]
//! from here; storage handlers remain deployment-specific and are wired in by
//! the host application.

pub mod http;

pub use http::ReqwestHttpClient;
