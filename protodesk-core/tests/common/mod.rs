#![allow(dead_code)]

pub mod echo_service_impl;

use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use protodesk_core::transport::grpc::{DescriptorSource, GrpcTransport, InProcess};
use protodesk_core::transport::{EventReceiver, event_channel};
use tonic::service::Routes;

pub const ADDRESS: &str = "in-process";

/// The echo service plus a reflection service describing it.
pub fn echo_routes() -> Routes {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    let echo_service = EchoServiceServer::new(EchoServiceImpl);

    Routes::new(reflection_service).add_service(echo_service)
}

/// A transport whose server exposes the echo service without reflection.
pub fn bare_transport() -> (GrpcTransport<InProcess<Routes>>, EventReceiver) {
    let routes = Routes::new(EchoServiceServer::new(EchoServiceImpl));
    let (events, rx) = event_channel();
    let transport =
        GrpcTransport::with_connector(InProcess(routes), DescriptorSource::Reflection, events);
    (transport, rx)
}

pub fn reflection_transport() -> (GrpcTransport<InProcess<Routes>>, EventReceiver) {
    let (events, rx) = event_channel();
    let transport =
        GrpcTransport::with_connector(InProcess(echo_routes()), DescriptorSource::Reflection, events);
    (transport, rx)
}

pub fn file_descriptor_transport() -> (GrpcTransport<InProcess<Routes>>, EventReceiver) {
    let source = DescriptorSource::from_file_descriptor_set(FILE_DESCRIPTOR_SET).unwrap();
    let (events, rx) = event_channel();
    let transport = GrpcTransport::with_connector(InProcess(echo_routes()), source, events);
    (transport, rx)
}
