//! # Protodesk Core
//!
//! `protodesk-core` is the request construction layer of the Protodesk gRPC testing tool.
//! The schema tools work directly on raw `.proto` source text and never need a Protobuf
//! compiler.
//!
//! ## Key Components
//!
//! * **[`schema`]:** A line-scanning extractor that recognizes services, RPC methods and
//!   message fields in the common `message { field = N; }` / `service { rpc ... }` subset.
//! * **[`sample`]:** Builds example JSON payloads for a message type.
//! * **[`validate`]:** Checks a JSON payload against a message schema and reports every
//!   discrepancy it finds instead of stopping at the first one.
//! * **[`session`]:** The client-side state machine of one streaming RPC.
//! * **[`dispatch`]:** Routes a method call to the unary path or to the streaming session
//!   depending on its call shape.
//! * **[`json`]:** Pretty-printing and minification of JSON text, reporting parse failures as data.
//!
//! ## Transport
//!
//! The network side is hidden behind the [`transport::Transport`] trait. The crate ships one
//! implementation, [`transport::grpc::GrpcTransport`], which speaks gRPC through `tonic` and
//! transcodes JSON to Protobuf on the fly with `prost-reflect`. Proto text attached to a call is
//! compiled in memory with `protox`.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect` and `tonic` so consumers use compatible versions of
//! these underlying dependencies.
pub mod dispatch;
pub mod json;
pub mod sample;
pub mod schema;
pub mod session;
pub mod transport;
pub mod validate;

// Re-exports
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
