//! Payload store implementations.

mod http;

pub use http::HttpPayloadStore;
