//! HTTP primitives consumed and produced by the pipeline.
//!
//! The transport layer hands the pipeline an already-parsed [`Request`] and
//! receives a finished [`Response`]. This module provides those two types plus
//! [`Method`], [`StatusCode`], and [`Headers`].

pub mod headers;
mod method;
pub mod request;
pub mod response;
mod status;

pub use headers::Headers;
pub use method::Method;
pub use request::{Body, BodyError, Request, RequestBuilder};
pub use response::Response;
pub use status::{StatusCode, UnknownStatus};
