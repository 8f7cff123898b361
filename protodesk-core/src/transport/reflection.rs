//! # Server Reflection
//!
//! Lets the gRPC transport learn a server's schema at call time through `grpc.reflection.v1`.
//!
//! A symbol lookup only returns the file declaring the symbol. Its imports are asked for on the
//! same stream, batch after batch, until every file the schema needs has arrived and the result
//! can be loaded into a self-contained `DescriptorPool`.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use futures_util::Stream;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error("Server reflection is unavailable: '{0}'")]
    Unavailable(#[source] tonic::Status),

    #[error("Reflection stream failed: '{0}'")]
    Stream(#[source] tonic::Status),

    #[error("Reflection stream ended before every requested file arrived")]
    Incomplete,

    #[error("Reflection request could not be queued")]
    RequestDropped,

    #[error("Reflection request rejected with code {code}: {message}")]
    Rejected { code: i32, message: String },

    #[error("Unexpected reflection answer: {0}")]
    UnexpectedAnswer(&'static str),

    #[error("Invalid file descriptor from reflection: {0}")]
    InvalidDescriptor(#[from] prost::DecodeError),
}

pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: ServerReflectionClient::new(service),
        }
    }

    /// Fully qualified names of every service the server exposes.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        let query = request(MessageRequest::ListServices(String::new()));
        let mut answers = self.open(once(async { query })).await?;

        match next_answer(&mut answers).await? {
            MessageResponse::ListServicesResponse(list) => {
                Ok(list.service.into_iter().map(|s| s.name).collect())
            }
            _ => Err(ReflectionError::UnexpectedAnswer("expected a service list")),
        }
    }

    /// The file declaring `symbol` (e.g. `echo.EchoService`) plus everything it imports,
    /// transitively.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionError> {
        let (queries, rx) = mpsc::unbounded_channel();
        queries
            .send(request(MessageRequest::FileContainingSymbol(
                symbol.to_string(),
            )))
            .map_err(|_| ReflectionError::RequestDropped)?;

        let mut answers = self.open(UnboundedReceiverStream::new(rx)).await?;
        let mut collector = FileCollector::default();
        let mut outstanding = 1;

        while outstanding > 0 {
            let MessageResponse::FileDescriptorResponse(batch) = next_answer(&mut answers).await?
            else {
                return Err(ReflectionError::UnexpectedAnswer("expected file descriptors"));
            };
            outstanding -= 1;

            for raw in &batch.file_descriptor_proto {
                collector.add(FileDescriptorProto::decode(&raw[..])?);
            }

            for import in collector.missing_imports() {
                queries
                    .send(request(MessageRequest::FileByFilename(import)))
                    .map_err(|_| ReflectionError::RequestDropped)?;
                outstanding += 1;
            }
        }

        tracing::debug!(
            symbol,
            files = collector.files.len(),
            "resolved schema through reflection"
        );
        Ok(collector.into_set())
    }

    async fn open(
        &mut self,
        queries: impl Stream<Item = ServerReflectionRequest> + Send + 'static,
    ) -> Result<Streaming<ServerReflectionResponse>, ReflectionError> {
        self.client
            .server_reflection_info(queries)
            .await
            .map(tonic::Response::into_inner)
            .map_err(ReflectionError::Unavailable)
    }
}

// Servers ignore `host`, so it is always left empty.
fn request(message: MessageRequest) -> ServerReflectionRequest {
    ServerReflectionRequest {
        host: String::new(),
        message_request: Some(message),
    }
}

async fn next_answer(
    answers: &mut Streaming<ServerReflectionResponse>,
) -> Result<MessageResponse, ReflectionError> {
    let response = answers
        .message()
        .await
        .map_err(ReflectionError::Stream)?
        .ok_or(ReflectionError::Incomplete)?;

    match response.message_response {
        Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionError::Rejected {
            code: e.error_code,
            message: e.error_message,
        }),
        Some(answer) => Ok(answer),
        None => Err(ReflectionError::UnexpectedAnswer("empty response")),
    }
}

/// Files received so far, keyed by name, and the names already asked for.
#[derive(Default)]
struct FileCollector {
    files: HashMap<String, FileDescriptorProto>,
    requested: HashSet<String>,
}

impl FileCollector {
    fn add(&mut self, file: FileDescriptorProto) {
        if let Some(name) = file.name.clone() {
            self.files.entry(name).or_insert(file);
        }
    }

    /// Imports that neither arrived nor were requested yet. Each is returned only once.
    fn missing_imports(&mut self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .files
            .values()
            .flat_map(|file| file.dependency.iter())
            .filter(|import| !self.files.contains_key(*import))
            .cloned()
            .collect();

        missing.sort();
        missing.dedup();
        missing.retain(|import| self.requested.insert(import.clone()));
        missing
    }

    fn into_set(self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.into_values().collect(),
        }
    }
}
