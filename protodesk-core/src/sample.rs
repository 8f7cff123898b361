//! # Sample Payloads
//!
//! Produces example JSON bodies for a message type so a user has something valid to start
//! editing from. Generation never fails: whatever cannot be resolved falls back to a
//! placeholder value.
//!
//! Self-referential schemas (directly, or through a chain of messages) are cut off the second
//! time a message type shows up on the current expansion path: the field is emitted as `null`
//! (or `[]` when repeated), which is a valid proto3 JSON value for an unset message.
use crate::schema::{self, FieldSchema, MethodDescriptor, ScalarKind};
use serde_json::{Map, Value, json};

/// Hard limit on nested message expansion, independent of cycle detection.
pub const MAX_SAMPLE_DEPTH: usize = 32;

const STRING_SAMPLE: &str = "sample";
const BYTES_SAMPLE: &str = "c2FtcGxl";

/// The value returned when `type_name` can't be resolved to a message.
pub fn placeholder() -> Value {
    json!({ "sample_field": "sample_value" })
}

/// Generates a sample JSON object for the message `type_name` declared in `proto`.
///
/// Every field gets exactly one value; repeated fields get a one-element array.
pub fn generate_sample(type_name: &str, proto: &str) -> Value {
    if type_name.is_empty() || proto.is_empty() {
        return placeholder();
    }
    let mut path = Vec::new();
    generate_message(type_name, proto, &mut path).unwrap_or_else(placeholder)
}

/// Generates a sample request body for `method`.
pub fn sample_for_method(method: &MethodDescriptor, proto: &str) -> Value {
    generate_sample(&method.input_type, proto)
}

fn generate_message(type_name: &str, proto: &str, path: &mut Vec<String>) -> Option<Value> {
    let schema = schema::extract_message(type_name, proto)?;
    if schema.fields.is_empty() {
        return None;
    }

    path.push(type_name.to_string());
    let mut object = Map::new();
    for field in &schema.fields {
        object.insert(field.name.clone(), generate_field(field, proto, path));
    }
    path.pop();

    Some(Value::Object(object))
}

fn generate_field(field: &FieldSchema, proto: &str, path: &mut Vec<String>) -> Value {
    if let Some(kind) = field.scalar_kind() {
        return wrap(field, scalar_sample(kind));
    }

    let type_name = field.declared_type.as_str();
    if !schema::type_name_is_message(type_name, proto) {
        return wrap(field, Value::String(STRING_SAMPLE.to_string()));
    }

    if path.iter().any(|t| t == type_name) || path.len() >= MAX_SAMPLE_DEPTH {
        tracing::debug!(
            field = %field.name,
            type_name,
            "not expanding recursive message reference in sample"
        );
        return if field.repeated {
            Value::Array(Vec::new())
        } else {
            Value::Null
        };
    }

    let nested = generate_message(type_name, proto, path).unwrap_or_else(placeholder);
    wrap(field, nested)
}

fn scalar_sample(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::String => Value::String(STRING_SAMPLE.to_string()),
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Float => json!(1.0),
        ScalarKind::Integer => json!(1),
        ScalarKind::Bytes => Value::String(BYTES_SAMPLE.to_string()),
    }
}

fn wrap(field: &FieldSchema, value: Value) -> Value {
    if field.repeated {
        Value::Array(vec![value])
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CallShape;

    #[test]
    fn test_repeated_scalar_gets_one_element() {
        let proto = "message Ids { repeated int32 ids = 1; }";
        assert_eq!(generate_sample("Ids", proto), json!({ "ids": [1] }));
    }

    #[test]
    fn test_every_scalar_default() {
        let proto = r#"
message AllTypes {
  string s = 1;
  bool b = 2;
  double d = 3;
  float f = 4;
  sfixed64 i = 5;
  bytes raw = 6;
  Timestamp opaque = 7;
}
"#;
        assert_eq!(
            generate_sample("AllTypes", proto),
            json!({
                "s": "sample",
                "b": false,
                "d": 1.0,
                "f": 1.0,
                "i": 1,
                "raw": "c2FtcGxl",
                "opaque": "sample",
            })
        );
    }

    #[test]
    fn test_nested_messages_are_expanded() {
        let proto = r#"
message Item { string sku = 1; uint64 amount = 2; }
message Order { repeated Item items = 1; Item featured = 2; }
"#;
        assert_eq!(
            generate_sample("Order", proto),
            json!({
                "items": [{ "sku": "sample", "amount": 1 }],
                "featured": { "sku": "sample", "amount": 1 },
            })
        );
    }

    #[test]
    fn test_unknown_type_yields_placeholder() {
        let proto = "message Known { string a = 1; }";

        assert_eq!(generate_sample("Missing", proto), placeholder());
        assert_eq!(generate_sample("", proto), placeholder());
        assert_eq!(generate_sample("Known", ""), placeholder());
    }

    #[test]
    fn test_message_without_fields_yields_placeholder() {
        let proto = "message Empty { }\nmessage Holder { Empty e = 1; }";

        assert_eq!(generate_sample("Empty", proto), placeholder());
        assert_eq!(generate_sample("Holder", proto), json!({ "e": placeholder() }));
    }

    #[test]
    fn test_self_reference_terminates() {
        let proto = r#"
message Node {
  string label = 1;
  Node parent = 2;
  repeated Node children = 3;
}
"#;
        assert_eq!(
            generate_sample("Node", proto),
            json!({ "label": "sample", "parent": null, "children": [] })
        );
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let proto = r#"
message Ping { Pong pong = 1; }
message Pong { Ping ping = 1; int32 hops = 2; }
"#;
        assert_eq!(
            generate_sample("Ping", proto),
            json!({ "pong": { "ping": null, "hops": 1 } })
        );
    }

    #[test]
    fn test_long_acyclic_chain_stops_at_depth_limit() {
        let last = MAX_SAMPLE_DEPTH + 4;
        let mut proto: String = (0..last)
            .map(|i| format!("message Level{i} {{ Level{} next = 1; int32 n = 2; }}\n", i + 1))
            .collect();
        proto.push_str(&format!("message Level{last} {{ int32 n = 1; }}\n"));

        let sample = generate_sample("Level0", &proto);

        let mut expanded = 0;
        let mut current = &sample;
        while let Value::Object(fields) = current {
            assert_eq!(fields["n"], json!(1));
            expanded += 1;
            current = &fields["next"];
        }
        assert_eq!(current, &Value::Null);
        assert_eq!(expanded, MAX_SAMPLE_DEPTH);
    }

    #[test]
    fn test_sample_for_method_uses_input_type() {
        let proto = "message Req { string q = 1; }\nmessage Res { int32 n = 1; }";
        let method = MethodDescriptor {
            name: "Search".to_string(),
            call_shape: CallShape::Unary,
            input_type: "Req".to_string(),
            output_type: "Res".to_string(),
        };

        assert_eq!(sample_for_method(&method, proto), json!({ "q": "sample" }));
    }
}
