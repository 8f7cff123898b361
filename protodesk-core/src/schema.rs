//! # Schema Extraction
//!
//! A best-effort structural reader for `.proto` source text.
//!
//! Instead of implementing the Protobuf grammar, this module recognizes the handful of
//! constructs a request builder needs with explicit patterns:
//!
//! * `package a.b.c;` qualifies every service name found in the file.
//! * `service Name {` opens a service; following lines containing `rpc Method(...) returns (...)`
//!   are attached to the most recently opened service.
//! * `message Name { ... }` bodies are located on demand, and their `[repeated] type name = N;`
//!   lines become [`FieldSchema`]s.
//!
//! Anything the patterns don't recognize is skipped silently. Comments, imports, `oneof`,
//! `map<..>`, enums and extensions are not modeled. Service bodies are not brace-tracked, so
//! text with unbalanced braces yields unspecified (but never panicking) results.
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpackage\s+([A-Za-z0-9_.]+)\s*;").expect("valid package pattern")
});

static SERVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"service\s+(\w+)").expect("valid service pattern"));

static RPC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"rpc\s+(\w+)\s*\(\s*(stream\s+)?(\w+)\s*\)\s*returns\s*\(\s*(stream\s+)?(\w+)\s*\)",
    )
    .expect("valid rpc pattern")
});

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(repeated\s+)?(\w+)\s+(\w+)\s*=\s*(\d+)\s*;").expect("valid field pattern")
});

/// The four ways a gRPC method can exchange messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    #[serde(rename = "bidirectional-streaming")]
    Bidirectional,
}

impl CallShape {
    /// Maps the presence of a `stream` qualifier on each side of an rpc to its call shape.
    pub fn from_stream_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallShape::Unary,
            (false, true) => CallShape::ServerStreaming,
            (true, false) => CallShape::ClientStreaming,
            (true, true) => CallShape::Bidirectional,
        }
    }

    pub fn is_streaming(self) -> bool {
        self != CallShape::Unary
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server-streaming",
            CallShape::ClientStreaming => "client-streaming",
            CallShape::Bidirectional => "bidirectional-streaming",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown call shape '{0}'")]
pub struct UnknownCallShape(String);

impl FromStr for CallShape {
    type Err = UnknownCallShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unary" => Ok(CallShape::Unary),
            "server-streaming" => Ok(CallShape::ServerStreaming),
            "client-streaming" => Ok(CallShape::ClientStreaming),
            "bidirectional-streaming" => Ok(CallShape::Bidirectional),
            other => Err(UnknownCallShape(other.to_string())),
        }
    }
}

/// A service declared in proto text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    /// Package-qualified name (e.g. `my.pkg.Greeter`), or the bare name if no package is declared.
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// An rpc declared inside a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    pub name: String,
    pub call_shape: CallShape,
    /// Bare input type name, exactly as written in the source text.
    pub input_type: String,
    /// Bare output type name, exactly as written in the source text.
    pub output_type: String,
}

/// The fields of one message, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl MessageSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Tag numbers declared by more than one field, in ascending order.
    ///
    /// Extraction itself never rejects duplicates; this is available for callers that want to
    /// be stricter than the extractor.
    pub fn duplicate_tags(&self) -> Vec<u32> {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for field in &self.fields {
            *counts.entry(field.tag).or_default() += 1;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(tag, _)| tag)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    /// A scalar keyword (`string`, `int32`, ...) or the name of a message type.
    pub declared_type: String,
    pub repeated: bool,
    /// Always `false`: the modeled proto3 subset has no presence semantics.
    pub required: bool,
    /// Saturates at `u32::MAX` when the declared number does not fit.
    pub tag: u32,
}

impl FieldSchema {
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        ScalarKind::from_type_name(&self.declared_type)
    }
}

/// Groups of scalar keywords that share a JSON representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Bool,
    /// `float` and `double`.
    Float,
    /// Every integer keyword, regardless of width or encoding.
    Integer,
    /// Carried as a base64 string in JSON.
    Bytes,
}

impl ScalarKind {
    /// Classifies a declared type name. Matching is case-insensitive.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name.to_ascii_lowercase().as_str() {
            "string" => Some(ScalarKind::String),
            "bool" => Some(ScalarKind::Bool),
            "double" | "float" => Some(ScalarKind::Float),
            "int32" | "int64" | "uint32" | "uint64" | "sint32" | "sint64" | "fixed32"
            | "fixed64" | "sfixed32" | "sfixed64" => Some(ScalarKind::Integer),
            "bytes" => Some(ScalarKind::Bytes),
            _ => None,
        }
    }
}

/// Returns the first `package <name>;` declared in `proto`, if any.
pub fn package_name(proto: &str) -> Option<&str> {
    PACKAGE_RE
        .captures(proto)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Scans `proto` top to bottom and returns every service with its methods, in source order.
///
/// Service names are qualified with the declared package. An rpc line seen before any
/// `service` line is ignored.
pub fn extract_services(proto: &str) -> Vec<ServiceDescriptor> {
    let package = package_name(proto);
    let mut services: Vec<ServiceDescriptor> = Vec::new();

    for line in proto.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("service ")
            && let Some(caps) = SERVICE_RE.captures(trimmed)
        {
            let name = match package {
                Some(package) => format!("{}.{}", package, &caps[1]),
                None => caps[1].to_string(),
            };
            services.push(ServiceDescriptor {
                name,
                methods: Vec::new(),
            });
        }

        if trimmed.contains("rpc ")
            && let Some(service) = services.last_mut()
            && let Some(method) = parse_rpc(trimmed)
        {
            service.methods.push(method);
        }
    }

    tracing::debug!(
        services = services.len(),
        package = package.unwrap_or_default(),
        "extracted services from proto source"
    );

    services
}

fn parse_rpc(line: &str) -> Option<MethodDescriptor> {
    let caps = RPC_RE.captures(line)?;
    let call_shape = CallShape::from_stream_flags(caps.get(2).is_some(), caps.get(4).is_some());

    Some(MethodDescriptor {
        name: caps[1].to_string(),
        call_shape,
        input_type: caps[3].to_string(),
        output_type: caps[5].to_string(),
    })
}

/// Locates `message <type_name> { ... }` in `proto` and returns its fields.
///
/// The body may contain one level of nested braces; fields of such a nested block are read as
/// if they belonged to the outer message. Returns `None` if no such message exists or if
/// `type_name` is not a plain identifier.
pub fn extract_message(type_name: &str, proto: &str) -> Option<MessageSchema> {
    let pattern = message_body_pattern(type_name)?;
    let body = pattern.captures(proto)?.get(1)?.as_str();

    let fields = FIELD_RE
        .captures_iter(body)
        .map(|caps| FieldSchema {
            name: caps[3].to_string(),
            declared_type: caps[2].to_string(),
            repeated: caps.get(1).is_some(),
            required: false,
            // Only overflow can fail here; the pattern guarantees digits.
            tag: caps[4].parse::<u32>().unwrap_or(u32::MAX),
        })
        .collect();

    Some(MessageSchema {
        name: type_name.to_string(),
        fields,
    })
}

/// Whether `proto` declares a message called `type_name`.
pub fn type_name_is_message(type_name: &str, proto: &str) -> bool {
    if !is_identifier(type_name) {
        return false;
    }
    let pattern = format!(r"\bmessage\s+{}\s*\{{", regex::escape(type_name));
    Regex::new(&pattern)
        .map(|re| re.is_match(proto))
        .unwrap_or(false)
}

fn message_body_pattern(type_name: &str) -> Option<Regex> {
    if !is_identifier(type_name) {
        return None;
    }
    let pattern = format!(
        r"\bmessage\s+{}\s*\{{([^{{}}]*(?:\{{[^{{}}]*\}}[^{{}}]*)*)\}}",
        regex::escape(type_name)
    );
    Regex::new(&pattern).ok()
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_PROTO: &str = r#"
syntax = "proto3";

package shop.v1;

message Item {
  string sku = 1;
  int32 amount = 2;
}

message Order {
  string id = 1;
  repeated Item items = 2;
  bool paid = 3;
}

service OrderService {
  rpc Place(Order) returns (Order);
  rpc Watch(Order) returns (stream Order);
  rpc Upload(stream Item) returns (Order);
  rpc Chat(stream Order) returns (stream Order);
}

service Health {
  rpc Check(Item) returns (Item);
}
"#;

    #[test]
    fn test_single_service_without_package() {
        let services = extract_services("service Foo { rpc Bar(X) returns (Y); }");

        assert_eq!(
            services,
            vec![ServiceDescriptor {
                name: "Foo".to_string(),
                methods: vec![MethodDescriptor {
                    name: "Bar".to_string(),
                    call_shape: CallShape::Unary,
                    input_type: "X".to_string(),
                    output_type: "Y".to_string(),
                }],
            }]
        );
    }

    #[test]
    fn test_services_are_package_qualified() {
        let services = extract_services(SHOP_PROTO);

        let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["shop.v1.OrderService", "shop.v1.Health"]);
        assert_eq!(services[0].methods.len(), 4);
        assert_eq!(services[1].methods.len(), 1);
    }

    #[test]
    fn test_call_shape_classification() {
        let services = extract_services(SHOP_PROTO);
        let service = &services[0];

        let shape = |name: &str| service.method(name).unwrap().call_shape;
        assert_eq!(shape("Place"), CallShape::Unary);
        assert_eq!(shape("Watch"), CallShape::ServerStreaming);
        assert_eq!(shape("Upload"), CallShape::ClientStreaming);
        assert_eq!(shape("Chat"), CallShape::Bidirectional);

        let upload = service.method("Upload").unwrap();
        assert_eq!(upload.input_type, "Item");
        assert_eq!(upload.output_type, "Order");
    }

    #[test]
    fn test_type_named_like_stream_is_not_a_qualifier() {
        let services = extract_services("service S {\n rpc Get(streamer) returns (Out);\n}");
        let method = &services[0].methods[0];

        assert_eq!(method.call_shape, CallShape::Unary);
        assert_eq!(method.input_type, "streamer");
    }

    #[test]
    fn test_rpc_outside_service_is_ignored() {
        let services = extract_services("rpc Orphan(A) returns (B);\nservice S {}\n");

        assert_eq!(services.len(), 1);
        assert!(services[0].methods.is_empty());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        assert_eq!(extract_services(SHOP_PROTO), extract_services(SHOP_PROTO));
    }

    #[test]
    fn test_malformed_text_does_not_panic() {
        let garbage = "service {{{ rpc ( returns ) message }}} package ;";
        assert!(extract_services(garbage).is_empty());
        assert!(extract_message("Anything", garbage).is_none());
        assert!(extract_services("").is_empty());
    }

    #[test]
    fn test_extract_message_fields() {
        let order = extract_message("Order", SHOP_PROTO).unwrap();

        assert_eq!(order.name, "Order");
        assert_eq!(order.fields.len(), 3);

        let items = order.field("items").unwrap();
        assert_eq!(items.declared_type, "Item");
        assert!(items.repeated);
        assert!(!items.required);
        assert_eq!(items.tag, 2);

        let paid = order.field("paid").unwrap();
        assert_eq!(paid.scalar_kind(), Some(ScalarKind::Bool));
        assert!(!paid.repeated);
    }

    #[test]
    fn test_extract_message_with_one_nested_block() {
        let proto = r#"
message Outer {
  message Inner {
    string note = 1;
  }
  int64 count = 2;
}
"#;
        let outer = extract_message("Outer", proto).unwrap();
        let names: Vec<_> = outer.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["note", "count"]);
    }

    #[test]
    fn test_nested_block_between_fields_keeps_both_sides() {
        let proto = r#"
message Envelope {
  string id = 1;
  oneof body {
    string text = 2;
    bytes blob = 3;
  }
  repeated string tags = 4;
}

message After { bool flag = 1; }
"#;
        let envelope = extract_message("Envelope", proto).unwrap();
        let names: Vec<_> = envelope.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "text", "blob", "tags"]);
        assert!(envelope.field("flag").is_none());
    }

    #[test]
    fn test_oversized_tag_keeps_the_field() {
        let proto = "message M { string a = 1; string b = 99999999999; }";
        let schema = extract_message("M", proto).unwrap();

        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(schema.field("b").unwrap().tag, u32::MAX);
    }

    #[test]
    fn test_message_name_must_match_exactly() {
        let proto = "message PersonList { string a = 1; }";

        assert!(extract_message("Person", proto).is_none());
        assert!(!type_name_is_message("Person", proto));
        assert!(type_name_is_message("PersonList", proto));
    }

    #[test]
    fn test_non_identifier_type_names_resolve_to_nothing() {
        assert!(extract_message(".*", SHOP_PROTO).is_none());
        assert!(!type_name_is_message("Order|Item", SHOP_PROTO));
        assert!(!type_name_is_message("", SHOP_PROTO));
    }

    #[test]
    fn test_duplicate_tags_are_reported() {
        let proto = "message Dup { string a = 1; string b = 1; int32 c = 2; }";
        let schema = extract_message("Dup", proto).unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.duplicate_tags(), vec![1]);
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name(SHOP_PROTO), Some("shop.v1"));
        assert_eq!(package_name("message A {}"), None);
    }

    #[test]
    fn test_call_shape_round_trips_through_its_name() {
        for shape in [
            CallShape::Unary,
            CallShape::ServerStreaming,
            CallShape::ClientStreaming,
            CallShape::Bidirectional,
        ] {
            assert_eq!(shape.as_str().parse::<CallShape>().unwrap(), shape);
        }
        assert!("sideways".parse::<CallShape>().is_err());
    }
}
