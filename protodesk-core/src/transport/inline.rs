//! Compiles `.proto` text attached to a call into a [`DescriptorPool`].
//!
//! The text is compiled in memory with `protox`. Imports of the well-known `google/protobuf/*`
//! files resolve to their bundled copies; any other import fails, since the text has no
//! directory to be resolved against.
use super::TransportError;
use prost_reflect::DescriptorPool;
use protox::Compiler;
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};

const SOURCE_FILE_NAME: &str = "request.proto";

struct SourceFileResolver {
    source: String,
}

impl FileResolver for SourceFileResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == SOURCE_FILE_NAME {
            File::from_source(name, &self.source)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

pub fn compile_proto_source(source: &str) -> Result<DescriptorPool, TransportError> {
    let mut resolver = ChainFileResolver::new();
    resolver.add(SourceFileResolver {
        source: source.to_string(),
    });
    resolver.add(GoogleFileResolver::new());

    let mut compiler = Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);
    compiler
        .open_file(SOURCE_FILE_NAME)
        .map_err(|e| TransportError::ProtoSource(Box::new(e)))?;

    let pool = compiler.descriptor_pool();
    tracing::debug!(services = pool.services().count(), "compiled proto source");
    Ok(pool)
}
