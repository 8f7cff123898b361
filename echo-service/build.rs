use std::env::var;
use std::io::{Error, Result};

fn main() -> Result<()> {
    let proto_files = &["proto/echo.proto"];
    let proto_folder = "proto";

    let out_dir = var("OUT_DIR").expect("Missing OUT_DIR environment variable");
    let descriptors_path = format!("{}/descriptors.bin", out_dir);

    println!("cargo:rerun-if-changed=proto/echo.proto");

    // Compile with protox (pure Rust) so the build does not depend on a system `protoc`.
    let mut compiler = protox::Compiler::new([proto_folder]).map_err(Error::other)?;
    compiler.include_source_info(true).include_imports(true);
    compiler.open_files(proto_files).map_err(Error::other)?;
    std::fs::write(&descriptors_path, compiler.encode_file_descriptor_set())?;

    // The server side is all the tests need; the dynamic client lives in protodesk-core.
    tonic_prost_build::configure()
        .build_client(false)
        .skip_protoc_run()
        .compile_fds(compiler.file_descriptor_set())?;

    Ok(())
}
