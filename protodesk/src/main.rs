//! # Protodesk CLI Entry Point
//!
//! The main executable for the Protodesk tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Installs logging, parses command-line arguments using [`cli::Cli`] and
//!    loads the saved defaults.
//! 2. **Execution**: Offline commands run the schema tools of `protodesk_core` on a `.proto`
//!    file; `list` and `call` go through a `GrpcTransport`.
//! 3. **Presentation**: Formats and prints the result or error to standard output/error.
mod cli;
mod config;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use config::{AppConfig, ConfigManager};
use formatter::{FormattedString, GenericError, ProtoServices, ServiceList};
use protodesk_core::dispatch::{Dispatcher, RequestForm};
use protodesk_core::json::{format_json, minify_json};
use protodesk_core::sample::{generate_sample, sample_for_method};
use protodesk_core::schema::{CallShape, MethodDescriptor, extract_message, extract_services};
use protodesk_core::transport::grpc::{DescriptorSource, GrpcTransport};
use protodesk_core::transport::{StreamSignal, event_channel, full_method_name};
use protodesk_core::validate::validate;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let manager = ConfigManager::new();
    let config = match &manager {
        Ok(manager) => manager.load().unwrap_or_else(|err| {
            tracing::warn!("{err:#}, using default settings");
            AppConfig::default()
        }),
        Err(err) => {
            tracing::warn!("{err:#}, using default settings");
            AppConfig::default()
        }
    };

    match args.command {
        Commands::Services { proto } => {
            let proto = read_or_exit(&proto);
            println!("{}", FormattedString::from(ProtoServices(extract_services(&proto))));
        }
        Commands::Message { proto, message } => {
            let proto = read_or_exit(&proto);
            match extract_message(&message, &proto) {
                Some(schema) => println!("{}", FormattedString::from(schema)),
                None => exit_with(GenericError("Message not found", message)),
            }
        }
        Commands::Sample { proto, message } => {
            let proto = read_or_exit(&proto);
            println!("{}", FormattedString::from(generate_sample(&message, &proto)));
        }
        Commands::Validate {
            proto,
            message,
            body,
        } => {
            let proto = read_or_exit(&proto);
            let payload = parse_json_or_exit(&body);
            let result = validate(&payload, &message, &proto);
            let valid = result.valid;
            println!("{}", FormattedString::from(result));
            if !valid {
                process::exit(1);
            }
        }
        Commands::Fmt {
            input,
            minify,
            indent,
        } => {
            let result = if minify {
                minify_json(&input)
            } else {
                format_json(&input, indent)
            };
            match result.error {
                None => println!("{}", result.formatted),
                Some(err) => exit_with(GenericError("Invalid JSON", err)),
            }
        }
        Commands::List {
            url,
            file_descriptor_set,
            tls,
        } => {
            let address = address_or_exit(url, &config);
            let source =
                descriptor_source_or_exit(file_descriptor_set.or(config.file_descriptor_set));
            let insecure = config.insecure && !tls;
            list_services(&address, source, insecure).await;
        }
        Commands::Call {
            endpoint,
            url,
            proto,
            file_descriptor_set,
            body,
            messages,
            tls,
        } => {
            let request = CallRequest {
                address: address_or_exit(url, &config),
                service: endpoint.0,
                method: endpoint.1,
                proto: proto.as_deref().map(read_or_exit),
                body,
                messages,
                insecure: config.insecure && !tls,
            };
            let source =
                descriptor_source_or_exit(file_descriptor_set.or(config.file_descriptor_set));
            run_call(request, source).await;
        }
        Commands::Config {
            default_address,
            insecure,
            file_descriptor_set,
        } => {
            let manager = manager.unwrap_or_else(|err| exit_with(err));
            update_config(&manager, config, default_address, insecure, file_descriptor_set);
        }
    }
}

struct CallRequest {
    address: String,
    service: String,
    method: String,
    proto: Option<String>,
    body: Option<String>,
    messages: Vec<String>,
    insecure: bool,
}

async fn list_services(address: &str, source: DescriptorSource, insecure: bool) {
    let (events, _rx) = event_channel();
    let transport = GrpcTransport::new(source, events);

    match transport.list_services(address, insecure).await {
        Ok(services) => println!("{}", FormattedString::from(ServiceList(services))),
        Err(err) => exit_with(GenericError("Failed to list services", err)),
    }
}

async fn run_call(request: CallRequest, source: DescriptorSource) {
    let (events, rx) = event_channel();
    let transport = GrpcTransport::new(source, events);

    let proto = request.proto.clone().unwrap_or_default();
    let method = match resolve_method(&transport, &request, &proto).await {
        Ok(method) => method,
        Err(err) => exit_with(err),
    };

    let request_data = match (&request.body, proto.is_empty()) {
        (Some(body), _) => body.clone(),
        (None, false) => sample_for_method(&method, &proto).to_string(),
        (None, true) => "{}".to_string(),
    };

    if !proto.is_empty() && !method.call_shape.is_streaming() {
        warn_if_invalid(&request_data, &method.input_type, &proto);
    }

    let mut messages = request.messages.into_iter();
    let form = RequestForm {
        address: request.address,
        request_data,
        streaming_data: messages.next(),
    };

    let mut dispatcher = Dispatcher::new(transport, rx).with_insecure(request.insecure);

    if let Err(err) = dispatcher
        .call(&request.service, &method, &form, &proto)
        .await
    {
        exit_with(GenericError("Call Failed", err));
    }

    if !method.call_shape.is_streaming() {
        match dispatcher.last_response().cloned() {
            Some(response) if response.success => println!("{}", FormattedString::from(response)),
            Some(response) => {
                eprintln!("{}", FormattedString::from(response));
                process::exit(1);
            }
            None => exit_with(GenericError("Call Failed", "no response was recorded")),
        }
        return;
    }

    for message in messages {
        let message = parse_json_or_exit(&message);
        if let Err(err) = dispatcher.send_message(message).await {
            exit_with(GenericError("Failed to send message", err));
        }
    }

    if method.call_shape != CallShape::ServerStreaming
        && let Err(err) = dispatcher.signal(StreamSignal::End).await
    {
        exit_with(GenericError("Failed to close the stream", err));
    }

    for entry in &dispatcher.stream().entries {
        println!("{}", FormattedString::from(entry));
    }

    let session = dispatcher.session_mut();
    while let Some(entry) = session.next_event().await {
        println!("{}", FormattedString::from(entry));
        if entry.terminal {
            break;
        }
    }

    if session.record().failed() {
        process::exit(1);
    }
}

/// Finds the method in the proto text when there is one, otherwise asks the server.
async fn resolve_method(
    transport: &GrpcTransport,
    request: &CallRequest,
    proto: &str,
) -> anyhow::Result<MethodDescriptor> {
    if !proto.is_empty() {
        return extract_services(proto)
            .into_iter()
            .find(|s| s.name == request.service)
            .and_then(|s| s.method(&request.method).cloned())
            .with_context(|| {
                format!(
                    "'{}/{}' is not declared in the proto file",
                    request.service, request.method
                )
            });
    }

    let full_method = full_method_name(&request.service, &request.method);
    let method = transport
        .describe_method(&request.address, request.insecure, &full_method)
        .await?;
    Ok(method)
}

fn warn_if_invalid(request_data: &str, input_type: &str, proto: &str) {
    let Ok(payload) = serde_json::from_str(request_data) else {
        return;
    };
    let result = validate(&payload, input_type, proto);
    if !result.valid {
        eprintln!("{}", FormattedString::from(result));
    }
}

fn update_config(
    manager: &ConfigManager,
    mut config: AppConfig,
    default_address: Option<String>,
    insecure: Option<bool>,
    file_descriptor_set: Option<PathBuf>,
) {
    let changed = default_address.is_some() || insecure.is_some() || file_descriptor_set.is_some();

    if let Some(address) = default_address {
        config.default_address = Some(address);
    }
    if let Some(insecure) = insecure {
        config.insecure = insecure;
    }
    if let Some(path) = file_descriptor_set {
        config.file_descriptor_set = Some(path);
    }

    if changed && let Err(err) = manager.save(&config) {
        exit_with(err);
    }

    match serde_json::to_value(&config) {
        Ok(value) => println!("{}", FormattedString::from(value)),
        Err(err) => exit_with(GenericError("Failed to show config", err)),
    }
    println!("{}", manager.path().display());
}

fn address_or_exit(url: Option<String>, config: &AppConfig) -> String {
    match url.or_else(|| config.default_address.clone()) {
        Some(address) => address,
        None => exit_with(GenericError(
            "No server address",
            "pass --url or set one with `protodesk config --default-address`",
        )),
    }
}

fn descriptor_source_or_exit(path: Option<PathBuf>) -> DescriptorSource {
    let Some(path) = path else {
        return DescriptorSource::Reflection;
    };

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => exit_with(GenericError("Failed to read file", err)),
    };

    DescriptorSource::from_file_descriptor_set(&bytes)
        .unwrap_or_else(|err| exit_with(GenericError("Failed to parse file descriptor", err)))
}

fn read_or_exit(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|err| exit_with(GenericError("Failed to read file", err)))
}

fn parse_json_or_exit(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|err| exit_with(GenericError("Invalid JSON", err)))
}

fn exit_with(err: impl Into<FormattedString>) -> ! {
    eprintln!("{}", err.into());
    process::exit(1);
}
