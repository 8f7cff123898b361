//! # Transport Boundary
//!
//! Everything that actually talks to a gRPC server lives behind the [`Transport`] trait.
//! The rest of the crate only builds requests and interprets results, so it can be driven by
//! any backend: the bundled [`grpc::GrpcTransport`], a process wrapper, or a test double.
//!
//! ## Interface
//!
//! * [`Transport::invoke_unary`] performs a complete request/response exchange.
//! * [`Transport::start_streaming_call`] only *starts* a streaming RPC. It returns as soon as
//!   the backend has accepted the call; data, errors and the end of the stream are delivered
//!   later as [`StreamEvent`]s.
//! * [`Transport::send_streaming_signal`] and [`Transport::send_streaming_message`] address a
//!   running stream by its server address and full method name.
//!
//! Events flow through the [`EventSender`] / [`EventReceiver`] pair returned by
//! [`event_channel`], in the order the backend produced them.
pub mod codec;
pub mod grpc;
pub mod inline;
pub mod reflection;

use crate::schema::CallShape;
use prost_reflect::DescriptorError;
use reflection::ReflectionError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Control messages for a running stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSignal {
    /// Abort the call.
    Cancel,
    /// Close the outbound half; the server may still answer.
    End,
    /// Hold inbound delivery.
    Pause,
    Resume,
}

impl StreamSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamSignal::Cancel => "cancel",
            StreamSignal::End => "end",
            StreamSignal::Pause => "pause",
            StreamSignal::Resume => "resume",
        }
    }
}

impl fmt::Display for StreamSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamSignal {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(StreamSignal::Cancel),
            "end" => Ok(StreamSignal::End),
            "pause" => Ok(StreamSignal::Pause),
            "resume" => Ok(StreamSignal::Resume),
            other => Err(TransportError::UnknownSignal(other.to_string())),
        }
    }
}

/// Something the backend pushed for the current stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(Value),
    Error(Value),
    End,
}

pub type EventSender = mpsc::UnboundedSender<StreamEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Creates the ordered channel a transport uses to deliver [`StreamEvent`]s.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A single request/response call.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryCall {
    pub address: String,
    /// `<service>.<method>`, see [`full_method_name`].
    pub full_method: String,
    pub request: Value,
    /// Inline schema text. `None` tells the backend to use a schema it already knows.
    pub proto_source: Option<String>,
    pub insecure: bool,
}

/// The opening of a streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingCall {
    pub address: String,
    pub full_method: String,
    /// The single request of a server-streaming call.
    pub request: Option<Value>,
    /// The first outbound message of a client-streaming or bidirectional call.
    pub streaming_data: Option<Value>,
    pub proto_source: Option<String>,
    pub call_shape: CallShape,
    pub insecure: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid method name '{0}', expected '<service>.<method>'")]
    InvalidMethodName(String),
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Invalid TLS configuration for '{0}': {1}")]
    TlsConfig(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error("Method '{0}' is unary and cannot be opened as a stream")]
    NotStreaming(String),
    #[error("Method '{method}' is {actual}, cannot be called as {requested}")]
    CallShapeMismatch {
        method: String,
        actual: CallShape,
        requested: CallShape,
    },
    #[error("Schema lookup through reflection failed: '{0}'")]
    Reflection(#[from] ReflectionError),
    #[error("Failed to compile proto source: '{0}'")]
    ProtoSource(#[source] Box<protox::Error>),
    #[error("Failed to build descriptor pool: '{0}'")]
    Descriptor(#[from] DescriptorError),
    #[error("gRPC client request error: '{0}'")]
    Request(#[from] grpc::GrpcRequestError),
    #[error("gRPC call failed: code={:?} message={:?}", .0.code(), .0.message())]
    Status(#[from] tonic::Status),
    #[error("No active stream for '{0}'")]
    NoActiveStream(String),
    #[error("Unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("{0}")]
    Backend(String),
}

/// The opaque backend that performs gRPC calls on behalf of the core.
pub trait Transport {
    fn invoke_unary(
        &self,
        call: UnaryCall,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    fn start_streaming_call(
        &self,
        call: StreamingCall,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_streaming_signal(
        &self,
        address: &str,
        full_method: &str,
        signal: StreamSignal,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_streaming_message(
        &self,
        address: &str,
        full_method: &str,
        message: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Joins a service and method name into the form every transport operation expects.
pub fn full_method_name(service: &str, method: &str) -> String {
    format!("{service}.{method}")
}

/// Splits `<package.Service>.<Method>` at its last dot.
pub fn split_full_method(full_method: &str) -> Option<(&str, &str)> {
    let (service, method) = full_method.rsplit_once('.')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_method_name_round_trip() {
        let full = full_method_name("echo.v1.EchoService", "UnaryEcho");

        assert_eq!(full, "echo.v1.EchoService.UnaryEcho");
        assert_eq!(
            split_full_method(&full),
            Some(("echo.v1.EchoService", "UnaryEcho"))
        );
    }

    #[test]
    fn test_split_rejects_bare_names() {
        assert_eq!(split_full_method("UnaryEcho"), None);
        assert_eq!(split_full_method(".UnaryEcho"), None);
        assert_eq!(split_full_method("Service."), None);
    }

    #[test]
    fn test_signal_names() {
        for signal in [
            StreamSignal::Cancel,
            StreamSignal::End,
            StreamSignal::Pause,
            StreamSignal::Resume,
        ] {
            assert_eq!(signal.as_str().parse::<StreamSignal>().unwrap(), signal);
        }
        assert!(matches!(
            "stop".parse::<StreamSignal>(),
            Err(TransportError::UnknownSignal(s)) if s == "stop"
        ));
    }
}
