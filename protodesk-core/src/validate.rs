//! # Payload Validation
//!
//! Checks a JSON payload against the schema of a message declared in proto text.
//!
//! Validation is exhaustive across fields: every declared field is checked and every unknown
//! key is reported, so a caller can show the full list of problems at once. Inside a single
//! repeated field, checking stops at the first bad element.
//!
//! Errors are plain data. Nothing in this module returns `Err` or panics on odd input.
use crate::schema::{self, FieldSchema, ScalarKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Recursion limit for nested messages. Deeper payloads are rejected rather than walked.
pub const MAX_VALIDATION_DEPTH: usize = 64;

const ROOT: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Missing,
    TypeMismatch,
    InvalidValue,
    UnknownField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Dotted and indexed path to the offending value (e.g. `items[2].amount`), or `root`.
    pub field_path: String,
    pub kind: ValidationKind,
    pub message: String,
    /// For a failing nested message: every error found inside it, with full paths.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<ValidationError>,
}

impl ValidationError {
    fn new(
        field_path: impl Into<String>,
        kind: ValidationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    fn prefixed(mut self, parent: &str) -> Self {
        self.field_path = if self.field_path == ROOT {
            parent.to_string()
        } else {
            format!("{}.{}", parent, self.field_path)
        };
        self.causes = self
            .causes
            .into_iter()
            .map(|cause| cause.prefixed(parent))
            .collect();
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates `payload` against the message `type_name` declared in `proto`.
pub fn validate(payload: &Value, type_name: &str, proto: &str) -> ValidationResult {
    ValidationResult::from_errors(validate_message(payload, type_name, proto, 0))
}

fn validate_message(
    payload: &Value,
    type_name: &str,
    proto: &str,
    depth: usize,
) -> Vec<ValidationError> {
    if depth > MAX_VALIDATION_DEPTH {
        return vec![ValidationError::new(
            ROOT,
            ValidationKind::InvalidValue,
            format!("Maximum message nesting depth of {MAX_VALIDATION_DEPTH} exceeded"),
        )];
    }

    let Some(message) = schema::extract_message(type_name, proto) else {
        return vec![ValidationError::new(
            ROOT,
            ValidationKind::InvalidValue,
            format!("Could not find message definition for '{type_name}'"),
        )];
    };

    let Some(object) = payload.as_object() else {
        return vec![ValidationError::new(
            ROOT,
            ValidationKind::InvalidValue,
            format!(
                "Expected an object for message '{type_name}', got {}",
                json_type(payload)
            ),
        )];
    };

    let mut errors = Vec::new();

    for field in &message.fields {
        let value = object.get(&field.name).filter(|v| !v.is_null());

        match value {
            None if field.required => errors.push(ValidationError::new(
                field.name.as_str(),
                ValidationKind::Missing,
                format!("Required field '{}' is missing", field.name),
            )),
            None => {}
            Some(value) => errors.extend(check_field(value, field, proto, depth)),
        }
    }

    errors.extend(unknown_fields(object, &message.fields));
    errors
}

fn unknown_fields(object: &Map<String, Value>, fields: &[FieldSchema]) -> Vec<ValidationError> {
    object
        .keys()
        .filter(|key| !fields.iter().any(|f| &f.name == *key))
        .map(|key| {
            ValidationError::new(
                key.as_str(),
                ValidationKind::UnknownField,
                format!("Unknown field '{key}'"),
            )
        })
        .collect()
}

/// Why a single value didn't match its declared type.
struct Mismatch {
    message: String,
    causes: Vec<ValidationError>,
}

impl Mismatch {
    fn new(message: String) -> Self {
        Self {
            message,
            causes: Vec::new(),
        }
    }

    fn at(self, path: String) -> ValidationError {
        let causes = self
            .causes
            .into_iter()
            .map(|cause| cause.prefixed(&path))
            .collect();

        ValidationError {
            field_path: path,
            kind: ValidationKind::TypeMismatch,
            message: self.message,
            causes,
        }
    }
}

fn check_field(
    value: &Value,
    field: &FieldSchema,
    proto: &str,
    depth: usize,
) -> Option<ValidationError> {
    if !field.repeated {
        return check_value(value, &field.declared_type, proto, depth)
            .map(|mismatch| mismatch.at(field.name.clone()));
    }

    let Some(items) = value.as_array() else {
        return Some(ValidationError::new(
            field.name.as_str(),
            ValidationKind::TypeMismatch,
            format!("Field '{}' should be an array (repeated field)", field.name),
        ));
    };

    items.iter().enumerate().find_map(|(index, item)| {
        check_value(item, &field.declared_type, proto, depth)
            .map(|mismatch| mismatch.at(format!("{}[{}]", field.name, index)))
    })
}

fn check_value(value: &Value, declared_type: &str, proto: &str, depth: usize) -> Option<Mismatch> {
    let got = json_type(value);

    match ScalarKind::from_type_name(declared_type) {
        Some(ScalarKind::String) if !value.is_string() => {
            Some(Mismatch::new(format!("Expected string, got {got}")))
        }
        Some(ScalarKind::Bool) if !value.is_boolean() => {
            Some(Mismatch::new(format!("Expected boolean, got {got}")))
        }
        Some(ScalarKind::Float) if !value.is_number() => {
            Some(Mismatch::new(format!("Expected number, got {got}")))
        }
        Some(ScalarKind::Integer) if !is_integral(value) => {
            Some(Mismatch::new(format!("Expected integer, got {got}")))
        }
        Some(ScalarKind::Bytes) if !value.is_string() => {
            Some(Mismatch::new(format!("Expected string (base64), got {got}")))
        }
        Some(_) => None,
        None if schema::type_name_is_message(declared_type, proto) => {
            if !value.is_object() {
                return Some(Mismatch::new(format!(
                    "Expected object (message type), got {got}"
                )));
            }
            let nested = validate_message(value, declared_type, proto, depth + 1);
            let first = nested.first()?.message.clone();
            Some(Mismatch {
                message: format!("Invalid nested message: {first}"),
                causes: nested,
            })
        }
        None => Some(Mismatch::new(format!("Unknown type '{declared_type}'"))),
    }
}

/// A JSON number without a fractional part. Declared integer width is not enforced.
fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => true,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0),
        _ => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
