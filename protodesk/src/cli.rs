//! # CLI
//!
//! This module defines the command-line interface of `protodesk` using `clap`.
//!
//! Offline commands work on a `.proto` file alone. `list` and `call` talk to a server; their
//! address falls back to `default_address` from the config file when omitted.
use clap::{Parser, Subcommand};
use protodesk_core::json::DEFAULT_INDENT;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "protodesk", version, about = "Build, check and send gRPC requests")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the services and methods declared in a .proto file
    Services {
        /// Path to the .proto file
        proto: PathBuf,
    },

    /// Show the fields of a message declared in a .proto file
    Message {
        proto: PathBuf,
        /// Message name as written in the file (e.g. EchoRequest)
        message: String,
    },

    /// Print a sample JSON payload for a message
    Sample {
        proto: PathBuf,
        message: String,
    },

    /// Check a JSON payload against a message
    Validate {
        proto: PathBuf,
        message: String,
        /// JSON payload to check
        #[arg(long)]
        body: String,
    },

    /// Pretty-print or minify JSON
    Fmt {
        input: String,
        #[arg(long)]
        minify: bool,
        /// Spaces per indentation level
        #[arg(long, default_value_t = DEFAULT_INDENT)]
        indent: usize,
    },

    /// List the services exposed by a server
    ///
    /// Uses server reflection unless a descriptor set is given.
    List {
        /// Server address (e.g. localhost:50051)
        #[arg(short, long)]
        url: Option<String>,

        /// Path to the descriptor set (.bin)
        #[arg(long)]
        file_descriptor_set: Option<PathBuf>,

        /// Connect with TLS instead of plaintext
        #[arg(long)]
        tls: bool,
    },

    /// Perform a gRPC call to a server
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protodesk call echo.EchoService/UnaryEcho --url localhost:50051 --body '{"message": "hi"}'
    /// protodesk call echo.EchoService/BidirectionalEcho --proto echo.proto -m '{"message": "a"}' -m '{"message": "b"}'
    /// ```
    Call {
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        #[arg(short, long)]
        url: Option<String>,

        /// .proto file describing the service. It is compiled for the call, so the server
        /// needs no reflection; only google/protobuf imports are resolved
        #[arg(long)]
        proto: Option<PathBuf>,

        /// Path to the descriptor set (.bin)
        #[arg(long)]
        file_descriptor_set: Option<PathBuf>,

        /// JSON request (unary and server streaming). Defaults to a generated sample with --proto
        #[arg(long)]
        body: Option<String>,

        /// JSON message to stream (client streaming and bidirectional). Can be repeated
        #[arg(short, long = "message")]
        messages: Vec<String>,

        /// Connect with TLS instead of plaintext
        #[arg(long)]
        tls: bool,
    },

    /// Show or change the saved defaults
    Config {
        #[arg(long)]
        default_address: Option<String>,

        #[arg(long)]
        insecure: Option<bool>,

        #[arg(long)]
        file_descriptor_set: Option<PathBuf>,
    },
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}
