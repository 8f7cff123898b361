//! # RPC Dispatch
//!
//! [`Dispatcher`] is the entry point for executing a method picked from the schema extractor's
//! output. Unary calls are run to completion and their outcome is kept as the last
//! [`UnaryResponse`]; streaming calls are handed to the owned [`StreamingSession`].
use crate::schema::MethodDescriptor;
use crate::session::{SessionError, StreamSession, StreamingSession};
use crate::transport::{
    EventReceiver, StreamSignal, StreamingCall, Transport, UnaryCall, full_method_name,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid JSON in {field}: '{source}'")]
    InvalidJson {
        field: &'static str,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// What the user filled in for a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestForm {
    pub address: String,
    /// JSON text of the request message.
    pub request_data: String,
    /// JSON text of the first message of a client-streaming or bidirectional call.
    pub streaming_data: Option<String>,
}

/// The outcome of the last unary call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnaryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnaryResponse {
    pub fn success(response: Value) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct Dispatcher<T> {
    session: StreamingSession<T>,
    last_response: Option<UnaryResponse>,
    insecure: bool,
}

impl<T: Transport> Dispatcher<T> {
    /// Plaintext connections are used unless [`Dispatcher::with_insecure`] says otherwise.
    pub fn new(transport: T, events: EventReceiver) -> Self {
        Self {
            session: StreamingSession::new(transport, events),
            last_response: None,
            insecure: true,
        }
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn last_response(&self) -> Option<&UnaryResponse> {
        self.last_response.as_ref()
    }

    pub fn session(&self) -> &StreamingSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut StreamingSession<T> {
        &mut self.session
    }

    pub fn stream(&self) -> &StreamSession {
        self.session.record()
    }

    /// Runs `method` of `service_name` with the data in `form`.
    ///
    /// Unary failures (bad JSON included) never surface as errors: they are recorded as a
    /// failed [`UnaryResponse`]. Streaming calls return whatever prevented the stream from
    /// starting.
    pub async fn call(
        &mut self,
        service_name: &str,
        method: &MethodDescriptor,
        form: &RequestForm,
        proto: &str,
    ) -> Result<(), DispatchError> {
        let full_method = full_method_name(service_name, &method.name);
        let proto_source = (!proto.is_empty()).then(|| proto.to_string());

        if !method.call_shape.is_streaming() {
            let response = self.call_unary(full_method, form, proto_source).await;
            self.last_response = Some(response);
            return Ok(());
        }

        let request = parse_optional(&form.request_data, "request data")?;
        let streaming_data = match form.streaming_data.as_deref() {
            Some(text) => parse_optional(text, "streaming data")?,
            None => None,
        };

        let call = StreamingCall {
            address: form.address.clone(),
            full_method,
            request,
            streaming_data,
            proto_source,
            call_shape: method.call_shape,
            insecure: self.insecure,
        };

        self.session.start(call).await?;
        Ok(())
    }

    async fn call_unary(
        &self,
        full_method: String,
        form: &RequestForm,
        proto_source: Option<String>,
    ) -> UnaryResponse {
        let request: Value = match serde_json::from_str(&form.request_data) {
            Ok(request) => request,
            Err(err) => return UnaryResponse::failure(err),
        };

        let call = UnaryCall {
            address: form.address.clone(),
            full_method,
            request,
            proto_source,
            insecure: self.insecure,
        };

        match self.session.transport().invoke_unary(call).await {
            Ok(response) => UnaryResponse::success(response),
            Err(err) => {
                tracing::debug!(error = %err, "unary call failed");
                UnaryResponse::failure(err)
            }
        }
    }

    /// Sends a control signal to the current stream.
    pub async fn signal(&mut self, signal: StreamSignal) -> Result<(), DispatchError> {
        Ok(self.session.signal(signal).await?)
    }

    /// Sends one more message on the current stream.
    pub async fn send_message(&mut self, message: Value) -> Result<(), DispatchError> {
        Ok(self.session.send(message).await?)
    }

    /// Drops the last unary response and the stream history.
    pub fn clear_response(&mut self) {
        self.last_response = None;
        self.session.clear();
    }
}

fn parse_optional(text: &str, field: &'static str) -> Result<Option<Value>, DispatchError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|source| DispatchError::InvalidJson { field, source })
}
