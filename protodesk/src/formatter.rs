use colored::*;
use protodesk_core::{
    dispatch::UnaryResponse,
    schema::{CallShape, MessageSchema, ServiceDescriptor},
    session::{Direction, Outcome, StreamEntry},
    validate::{ValidationError, ValidationKind, ValidationResult},
};
use std::fmt::Display;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// Service names reported by a server.
pub struct ServiceList(pub Vec<String>);

/// Services extracted from proto text.
pub struct ProtoServices(pub Vec<ServiceDescriptor>);

pub struct GenericError<T: Display>(pub &'static str, pub T);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        FormattedString(format!("{}\n\n'{:#}'", "Error:".red().bold(), err))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Services:\n");
        for svc in services {
            out.push_str(&format!("  - {}\n", svc.green()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<ProtoServices> for FormattedString {
    fn from(ProtoServices(services): ProtoServices) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        for service in services {
            out.push_str(&format!("{} {} {{\n", "service".cyan(), service.name.green()));

            for method in &service.methods {
                let (input_stream, output_stream) = match method.call_shape {
                    CallShape::Unary => ("", ""),
                    CallShape::ServerStreaming => ("", "stream "),
                    CallShape::ClientStreaming => ("stream ", ""),
                    CallShape::Bidirectional => ("stream ", "stream "),
                };
                out.push_str(&format!(
                    "  {} {}({}{}) {} ({}{});  {}\n",
                    "rpc".cyan(),
                    method.name.green(),
                    input_stream.cyan(),
                    method.input_type.yellow(),
                    "returns".cyan(),
                    output_stream.cyan(),
                    method.output_type.yellow(),
                    format!("// {}", method.call_shape).dimmed()
                ));
            }
            out.push_str("}\n\n");
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<MessageSchema> for FormattedString {
    fn from(message: MessageSchema) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "message".cyan(),
            message.name.green()
        ));

        for field in &message.fields {
            let label = if field.repeated {
                format!("{} ", "repeated".cyan())
            } else {
                "".to_string()
            };

            out.push_str(&format!(
                "  {}{} {} = {};\n",
                label,
                field.declared_type.yellow(),
                field.name,
                field.tag
            ));
        }
        out.push('}');

        let duplicates = message.duplicate_tags();
        if !duplicates.is_empty() {
            let tags: Vec<String> = duplicates.iter().map(u32::to_string).collect();
            out.push_str(&format!(
                "\n\n{} {}",
                "Duplicate field numbers:".yellow().bold(),
                tags.join(", ")
            ));
        }
        FormattedString(out)
    }
}

impl From<ValidationResult> for FormattedString {
    fn from(result: ValidationResult) -> Self {
        if result.valid {
            return FormattedString("Payload is valid.".green().bold().to_string());
        }

        let mut out = format!("{}\n", "Payload is invalid:".red().bold());
        for error in &result.errors {
            push_validation_error(&mut out, error, 1);
        }
        FormattedString(out.trim_end().to_string())
    }
}

fn push_validation_error(out: &mut String, error: &ValidationError, depth: usize) {
    let marker = match error.kind {
        ValidationKind::Missing => "missing".red(),
        ValidationKind::TypeMismatch => "mismatch".yellow(),
        ValidationKind::InvalidValue => "invalid".red(),
        ValidationKind::UnknownField => "unknown".blue(),
    };

    out.push_str(&format!(
        "{}[{}] {}: {}\n",
        "  ".repeat(depth),
        marker,
        error.field_path.bold(),
        error.message
    ));

    for cause in &error.causes {
        push_validation_error(out, cause, depth + 1);
    }
}

impl From<UnaryResponse> for FormattedString {
    fn from(response: UnaryResponse) -> Self {
        match (response.response, response.error) {
            (Some(value), _) if response.success => FormattedString::from(value),
            (_, Some(error)) => {
                FormattedString(format!("{}\n\n'{}'", "Call Failed:".red().bold(), error))
            }
            _ => FormattedString("Call returned no data.".yellow().to_string()),
        }
    }
}

impl From<&StreamEntry> for FormattedString {
    fn from(entry: &StreamEntry) -> Self {
        let payload = entry
            .payload
            .as_ref()
            .map(|p| serde_json::to_string_pretty(p).unwrap_or_else(|_| p.to_string()));

        let text = match (entry.outcome, entry.direction, payload) {
            (Outcome::Failure, _, payload) => format!(
                "{} {}",
                "Stream Error:".red().bold(),
                payload.unwrap_or_default()
            ),
            (Outcome::Success, Some(Direction::Sent), Some(payload)) => {
                format!("{} {}", ">> sent".blue(), payload)
            }
            (Outcome::Success, Some(Direction::Received), Some(payload)) => {
                format!("{} {}", "<< received".green(), payload)
            }
            _ => "Stream ended.".dimmed().to_string(),
        };
        FormattedString(text)
    }
}
