//! # gRPC Transport
//!
//! [`GrpcTransport`] is the bundled [`Transport`] backend. It talks to servers directly with
//! `tonic` and transcodes JSON to Protobuf through [`JsonCodec`], so no generated code or
//! external tool is needed.
//!
//! ## Schema resolution
//!
//! A method is resolved to a `prost_reflect::MethodDescriptor` from the proto text attached to
//! the call when there is one. Otherwise the transport's [`DescriptorSource`] is used: either a
//! binary `FileDescriptorSet` registered up front, or the server's reflection service, queried
//! on every call.
//!
//! ## Streams
//!
//! Every streaming call runs on its own task and is registered under the key
//! `"<address>-<full method>"`. Signals and follow-up messages find the call through that key:
//!
//! * `Pause` / `Resume` flip a `watch` flag that gates inbound delivery. Responses received
//!   while paused are held until the stream is resumed.
//! * `End` drops the outbound sender, which closes the request stream.
//! * `Cancel` aborts the task and forgets the stream.
//!
//! A stream that finishes on its own unregisters itself.
use super::codec::JsonCodec;
use super::inline::compile_proto_source;
use super::reflection::ReflectionClient;
use super::{
    EventSender, StreamEvent, StreamSignal, StreamingCall, Transport, TransportError, UnaryCall,
    split_full_method,
};
use crate::BoxError;
use crate::schema::{self, CallShape};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorError, DescriptorPool, MethodDescriptor};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    Status, Streaming,
    client::GrpcService,
    codegen::Bytes,
    transport::{Channel, ClientTlsConfig, Endpoint},
};

// Outbound messages queued per stream before `send_streaming_message` waits.
const OUTBOUND_BUFFER: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid request path '{path}': '{source}'")]
    InvalidPath {
        path: String,
        source: http::uri::InvalidUri,
    },
}

/// A thin wrapper around `tonic::client::Grpc` exchanging `serde_json::Value`s.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Value))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to send the request.
    pub async fn unary(
        &mut self,
        method: MethodDescriptor,
        payload: Value,
    ) -> Result<Result<Value, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let codec = JsonCodec::for_method(&method);
        let request = tonic::Request::new(payload);

        match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    pub async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        payload: Value,
    ) -> Result<Result<Streaming<Value>, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let codec = JsonCodec::for_method(&method);
        let request = tonic::Request::new(payload);

        match self.client.server_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    pub async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = Value> + Send + 'static,
    ) -> Result<Result<Value, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let codec = JsonCodec::for_method(&method);
        let request = tonic::Request::new(payload_stream);

        match self.client.client_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    pub async fn bidirectional_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = Value> + Send + 'static,
    ) -> Result<Result<Streaming<Value>, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let codec = JsonCodec::for_method(&method);
        let request = tonic::Request::new(payload_stream);

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path)
        .map_err(|source| GrpcRequestError::InvalidPath { path, source })
}

/// Where method descriptors come from.
#[derive(Debug, Clone, Default)]
pub enum DescriptorSource {
    /// Ask the server through `grpc.reflection.v1`.
    #[default]
    Reflection,
    FileDescriptorSet(DescriptorPool),
}

impl DescriptorSource {
    /// Decodes a binary `FileDescriptorSet`, as written by `protoc --descriptor_set_out`.
    pub fn from_file_descriptor_set(bytes: &[u8]) -> Result<Self, DescriptorError> {
        Ok(Self::FileDescriptorSet(DescriptorPool::decode(bytes)?))
    }
}

/// Opens the underlying service a call is sent through.
pub trait Connector: Send + Sync + 'static {
    type Service: Clone + Send + Sync + 'static;

    fn connect(
        &self,
        address: &str,
        insecure: bool,
    ) -> impl Future<Output = Result<Self::Service, TransportError>> + Send;
}

/// Dials the address with `tonic::transport::Endpoint`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointConnector;

impl Connector for EndpointConnector {
    type Service = Channel;

    async fn connect(&self, address: &str, insecure: bool) -> Result<Channel, TransportError> {
        let url = endpoint_url(address, insecure);

        build_endpoint(&url)?
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(url, e))
    }
}

/// `https` URLs get a TLS config that trusts the platform's root certificates.
fn build_endpoint(url: &str) -> Result<Endpoint, TransportError> {
    let endpoint = Endpoint::new(url.to_string())
        .map_err(|e| TransportError::InvalidUrl(url.to_string(), e))?;

    if !url.starts_with("https://") {
        return Ok(endpoint);
    }

    endpoint
        .tls_config(ClientTlsConfig::new().with_native_roots())
        .map_err(|e| TransportError::TlsConfig(url.to_string(), e))
}

/// Sends every call to the same in-process service, whatever the address.
#[derive(Debug, Clone)]
pub struct InProcess<S>(pub S);

impl<S> Connector for InProcess<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Service = S;

    async fn connect(&self, address: &str, _insecure: bool) -> Result<S, TransportError> {
        tracing::trace!(address, "routing call to in-process service");
        Ok(self.0.clone())
    }
}

fn endpoint_url(address: &str, insecure: bool) -> String {
    if address.contains("://") {
        address.to_string()
    } else if insecure {
        format!("http://{address}")
    } else {
        format!("https://{address}")
    }
}

fn stream_key(address: &str, full_method: &str) -> String {
    format!("{address}-{full_method}")
}

type StreamMap = Arc<Mutex<HashMap<String, StreamHandle>>>;

struct StreamHandle {
    id: u64,
    outbound: Option<mpsc::Sender<Value>>,
    paused: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum Opening {
    Request(Value),
    ClientStream(mpsc::Receiver<Value>),
    Bidirectional(mpsc::Receiver<Value>),
}

pub struct GrpcTransport<C = EndpointConnector> {
    connector: C,
    source: DescriptorSource,
    events: EventSender,
    streams: StreamMap,
    next_stream_id: AtomicU64,
}

impl GrpcTransport<EndpointConnector> {
    pub fn new(source: DescriptorSource, events: EventSender) -> Self {
        Self::with_connector(EndpointConnector, source, events)
    }
}

impl<C> GrpcTransport<C> {
    pub fn with_connector(connector: C, source: DescriptorSource, events: EventSender) -> Self {
        Self {
            connector,
            source,
            events,
            streams: Arc::default(),
            next_stream_id: AtomicU64::new(0),
        }
    }
}

impl<C> GrpcTransport<C> {
    /// Number of streams that are still registered.
    pub async fn open_streams(&self) -> usize {
        self.streams.lock().await.len()
    }
}

impl<C> Drop for GrpcTransport<C> {
    fn drop(&mut self) {
        // Finished tasks only hold the lock while unregistering themselves.
        if let Ok(streams) = self.streams.try_lock() {
            for handle in streams.values() {
                handle.task.abort();
            }
        }
    }
}

impl<C> GrpcTransport<C>
where
    C: Connector,
    C::Service: GrpcService<tonic::body::Body>,
    <C::Service as GrpcService<tonic::body::Body>>::Error: Into<BoxError>,
    <C::Service as GrpcService<tonic::body::Body>>::Future: Send,
    <C::Service as GrpcService<tonic::body::Body>>::ResponseBody:
        HttpBody<Data = Bytes> + Send + 'static,
    <<C::Service as GrpcService<tonic::body::Body>>::ResponseBody as HttpBody>::Error:
        Into<BoxError> + Send,
{
    /// Lists the fully qualified names of the services reachable at `address`.
    ///
    /// With a registered descriptor set the answer comes from the set and no connection is made.
    pub async fn list_services(
        &self,
        address: &str,
        insecure: bool,
    ) -> Result<Vec<String>, TransportError> {
        if let DescriptorSource::FileDescriptorSet(pool) = &self.source {
            return Ok(pool.services().map(|s| s.full_name().to_string()).collect());
        }

        let service = self.connector.connect(address, insecure).await?;
        let mut client = ReflectionClient::new(service);
        Ok(client.list_services().await?)
    }

    /// Resolves `full_method` the way a call would and describes it with the schema
    /// extractor's types, so callers without proto text still learn its call shape.
    pub async fn describe_method(
        &self,
        address: &str,
        insecure: bool,
        full_method: &str,
    ) -> Result<schema::MethodDescriptor, TransportError> {
        let service = self.connector.connect(address, insecure).await?;
        let method = self.resolve_method(service, full_method, None).await?;

        Ok(schema::MethodDescriptor {
            name: method.name().to_string(),
            call_shape: call_shape_of(&method),
            input_type: method.input().name().to_string(),
            output_type: method.output().name().to_string(),
        })
    }

    async fn resolve_method(
        &self,
        service: C::Service,
        full_method: &str,
        proto_source: Option<&str>,
    ) -> Result<MethodDescriptor, TransportError> {
        let (service_name, method_name) = split_full_method(full_method)
            .ok_or_else(|| TransportError::InvalidMethodName(full_method.to_string()))?;

        let pool = match (proto_source, &self.source) {
            (Some(source), _) => compile_proto_source(source)?,
            (None, DescriptorSource::FileDescriptorSet(pool)) => pool.clone(),
            (None, DescriptorSource::Reflection) => {
                let mut client = ReflectionClient::new(service);
                let fd_set = client.file_descriptor_set_by_symbol(service_name).await?;
                DescriptorPool::from_file_descriptor_set(fd_set)?
            }
        };

        let service = pool
            .get_service_by_name(service_name)
            .ok_or_else(|| TransportError::ServiceNotFound(service_name.to_string()))?;

        service
            .methods()
            .find(|m| m.name() == method_name)
            .ok_or_else(|| TransportError::MethodNotFound(full_method.to_string()))
    }
}

fn call_shape_of(method: &MethodDescriptor) -> CallShape {
    CallShape::from_stream_flags(method.is_client_streaming(), method.is_server_streaming())
}

fn ensure_call_shape(
    method: &MethodDescriptor,
    full_method: &str,
    requested: CallShape,
) -> Result<(), TransportError> {
    let actual = call_shape_of(method);
    if actual != requested {
        return Err(TransportError::CallShapeMismatch {
            method: full_method.to_string(),
            actual,
            requested,
        });
    }
    Ok(())
}

impl<C> Transport for GrpcTransport<C>
where
    C: Connector,
    C::Service: GrpcService<tonic::body::Body>,
    <C::Service as GrpcService<tonic::body::Body>>::Error: Into<BoxError>,
    <C::Service as GrpcService<tonic::body::Body>>::Future: Send,
    <C::Service as GrpcService<tonic::body::Body>>::ResponseBody:
        HttpBody<Data = Bytes> + Send + 'static,
    <<C::Service as GrpcService<tonic::body::Body>>::ResponseBody as HttpBody>::Error:
        Into<BoxError> + Send,
{
    async fn invoke_unary(&self, call: UnaryCall) -> Result<Value, TransportError> {
        let service = self.connector.connect(&call.address, call.insecure).await?;
        let method = self
            .resolve_method(service.clone(), &call.full_method, call.proto_source.as_deref())
            .await?;
        ensure_call_shape(&method, &call.full_method, CallShape::Unary)?;

        tracing::debug!(address = %call.address, method = %call.full_method, "unary call");

        let mut client = GrpcClient::new(service);
        let response = client.unary(method, call.request).await??;
        Ok(response)
    }

    async fn start_streaming_call(&self, call: StreamingCall) -> Result<(), TransportError> {
        if !call.call_shape.is_streaming() {
            return Err(TransportError::NotStreaming(call.full_method));
        }
        let service = self.connector.connect(&call.address, call.insecure).await?;
        let method = self
            .resolve_method(service.clone(), &call.full_method, call.proto_source.as_deref())
            .await?;
        ensure_call_shape(&method, &call.full_method, call.call_shape)?;

        let key = stream_key(&call.address, &call.full_method);

        let (outbound, opening) = match call.call_shape {
            CallShape::ServerStreaming => {
                let request = call
                    .request
                    .unwrap_or_else(|| Value::Object(Default::default()));
                (None, Opening::Request(request))
            }
            CallShape::ClientStreaming | CallShape::Bidirectional => {
                let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
                if let Some(first) = call.streaming_data {
                    tx.send(first)
                        .await
                        .map_err(|_| TransportError::NoActiveStream(key.clone()))?;
                }
                let opening = if call.call_shape == CallShape::ClientStreaming {
                    Opening::ClientStream(rx)
                } else {
                    Opening::Bidirectional(rx)
                };
                (Some(tx), opening)
            }
            CallShape::Unary => return Err(TransportError::NotStreaming(call.full_method)),
        };

        let (paused, paused_rx) = watch::channel(false);
        let client = GrpcClient::new(service);
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);

        // Held until the handle is registered, so a stream that finishes right away can't
        // unregister before it was registered.
        let mut streams = self.streams.lock().await;

        let task = tokio::spawn({
            let streams = Arc::clone(&self.streams);
            let events = self.events.clone();
            let key = key.clone();
            async move {
                drive_stream(client, method, opening, paused_rx, events).await;
                unregister_stream(&streams, &key, id).await;
            }
        });

        let handle = StreamHandle {
            id,
            outbound,
            paused,
            task,
        };

        if let Some(previous) = streams.insert(key.clone(), handle) {
            tracing::debug!(key = %key, "replacing a stream that was still registered");
            previous.task.abort();
        }

        tracing::info!(key = %key, shape = %call.call_shape, "streaming call started");
        Ok(())
    }

    async fn send_streaming_signal(
        &self,
        address: &str,
        full_method: &str,
        signal: StreamSignal,
    ) -> Result<(), TransportError> {
        let key = stream_key(address, full_method);
        let mut streams = self.streams.lock().await;

        let Some(handle) = streams.get_mut(&key) else {
            tracing::debug!(key = %key, %signal, "signal for unknown stream ignored");
            return Ok(());
        };

        match signal {
            StreamSignal::Cancel => {
                handle.task.abort();
                streams.remove(&key);
            }
            StreamSignal::End => {
                handle.outbound.take();
            }
            StreamSignal::Pause => {
                handle.paused.send_replace(true);
            }
            StreamSignal::Resume => {
                handle.paused.send_replace(false);
            }
        }

        tracing::debug!(key = %key, %signal, "signal applied");
        Ok(())
    }

    async fn send_streaming_message(
        &self,
        address: &str,
        full_method: &str,
        message: Value,
    ) -> Result<(), TransportError> {
        let key = stream_key(address, full_method);

        let outbound = {
            let streams = self.streams.lock().await;
            streams.get(&key).and_then(|handle| handle.outbound.clone())
        };

        let Some(outbound) = outbound else {
            return Err(TransportError::NoActiveStream(key));
        };

        outbound
            .send(message)
            .await
            .map_err(|_| TransportError::NoActiveStream(key))
    }
}

/// Forgets the stream registered under `key`, unless it was replaced by a newer one.
async fn unregister_stream(streams: &Mutex<HashMap<String, StreamHandle>>, key: &str, id: u64) {
    let mut streams = streams.lock().await;
    if streams.get(key).is_some_and(|handle| handle.id == id) {
        streams.remove(key);
        tracing::debug!(key, "stream finished");
    }
}

async fn drive_stream<S>(
    mut client: GrpcClient<S>,
    method: MethodDescriptor,
    opening: Opening,
    mut paused: watch::Receiver<bool>,
    events: EventSender,
) where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let inbound = match opening {
        Opening::Request(request) => client.server_streaming(method, request).await,
        Opening::Bidirectional(rx) => {
            client
                .bidirectional_streaming(method, ReceiverStream::new(rx))
                .await
        }
        Opening::ClientStream(rx) => {
            let event = match client
                .client_streaming(method, ReceiverStream::new(rx))
                .await
            {
                Ok(Ok(response)) => StreamEvent::Data(response),
                Ok(Err(status)) => status_event(&status),
                Err(err) => failure_event(&err.to_string()),
            };
            let terminal = !matches!(event, StreamEvent::Data(_));
            if deliver(&events, &mut paused, event).await && !terminal {
                deliver(&events, &mut paused, StreamEvent::End).await;
            }
            return;
        }
    };

    match inbound {
        Ok(Ok(stream)) => forward_responses(stream, &mut paused, &events).await,
        Ok(Err(status)) => {
            deliver(&events, &mut paused, status_event(&status)).await;
        }
        Err(err) => {
            deliver(&events, &mut paused, failure_event(&err.to_string())).await;
        }
    }
}

async fn forward_responses(
    mut stream: Streaming<Value>,
    paused: &mut watch::Receiver<bool>,
    events: &EventSender,
) {
    loop {
        let (event, last) = match stream.message().await {
            Ok(Some(value)) => (StreamEvent::Data(value), false),
            Ok(None) => (StreamEvent::End, true),
            Err(status) => (status_event(&status), true),
        };

        if !deliver(events, paused, event).await || last {
            return;
        }
    }
}

/// Waits until the stream is not paused, then emits `event`.
///
/// Returns `false` once nobody is listening any more.
async fn deliver(
    events: &EventSender,
    paused: &mut watch::Receiver<bool>,
    event: StreamEvent,
) -> bool {
    if paused.wait_for(|paused| !*paused).await.is_err() {
        return false;
    }

    if events.send(event).is_err() {
        tracing::debug!("event receiver dropped, stopping stream delivery");
        return false;
    }
    true
}

fn status_event(status: &Status) -> StreamEvent {
    StreamEvent::Error(json!({
        "code": format!("{:?}", status.code()),
        "message": status.message(),
    }))
}

fn failure_event(message: &str) -> StreamEvent {
    StreamEvent::Error(json!({ "message": message }))
}
