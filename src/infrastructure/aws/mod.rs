//! AWS Module
//!
//! Minimal clients for the managed services the pipeline talks to.
//!
//! ## Modules
//!
//! - [`credentials`] - Static credential sources (environment, shared file)
//! - [`sigv4`] - Signature Version 4 request signing
//! - [`kinesis`] - PutRecord against a Kinesis data stream
//! - [`opensearch`] - Document inserts into an OpenSearch index
//! - [`runtime_api`] - Lambda custom-runtime invocation loop

pub mod credentials;
pub mod kinesis;
pub mod opensearch;
pub mod runtime_api;
pub mod sigv4;
