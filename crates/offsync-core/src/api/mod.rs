//! Network transport module.
//!
//! This module provides the request/response types shared by the policy and
//! sync engines, the `Transport` trait they send through, and
//! `HttpTransport`, the reqwest-backed implementation.
//!
//! Any 2xx status counts as success. Everything else surfaces as an
//! `ApiError`.

pub mod client;
pub mod error;
pub mod request;

pub use client::{HttpTransport, Transport};
pub use error::ApiError;
pub use request::{Headers, Method, Request, Response, ResponseSource};
