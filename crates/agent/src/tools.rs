use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::conversation::ResultCategory;

/// Shape of one named argument a capability accepts.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    Text,
    Number,
    Flag,
    TextList,
    /// Text restricted to the listed values, compared case-insensitively.
    Choice(&'static [&'static str]),
    /// Text checked by a domain parser. The schema advertises the canonical spellings; the
    /// parser decides what is accepted.
    Parsed(&'static [&'static str], fn(&str) -> bool),
    Record(&'static [FieldSpec]),
    RecordList(&'static [FieldSpec]),
}

impl FieldKind {
    fn json_schema(&self) -> Value {
        match self {
            Self::Text => json!({"type": "string"}),
            Self::Number => json!({"type": "number"}),
            Self::Flag => json!({"type": "boolean"}),
            Self::TextList => json!({"type": "array", "items": {"type": "string"}}),
            Self::Choice(values) | Self::Parsed(values, _) => {
                json!({"type": "string", "enum": values})
            }
            Self::Record(fields) => object_schema(fields),
            Self::RecordList(fields) => json!({"type": "array", "items": object_schema(fields)}),
        }
    }
}

pub fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut schema = field.kind.json_schema();
        schema["description"] = Value::String(field.description.to_string());
        properties.insert(field.name.to_string(), schema);
    }
    let required: Vec<&str> =
        fields.iter().filter(|field| field.required).map(|field| field.name).collect();
    json!({"type": "object", "properties": properties, "required": required})
}

/// Returns the dotted paths of every argument that is missing or has the wrong shape.
pub fn invalid_fields(fields: &[FieldSpec], arguments: &Value) -> Vec<String> {
    let mut invalid = Vec::new();
    match arguments {
        Value::Object(map) => collect_invalid(fields, map, "", &mut invalid),
        Value::Null => collect_invalid(fields, &Map::new(), "", &mut invalid),
        _ => invalid.push("arguments".to_string()),
    }
    invalid
}

fn collect_invalid(
    fields: &[FieldSpec],
    map: &Map<String, Value>,
    prefix: &str,
    invalid: &mut Vec<String>,
) {
    for field in fields {
        let path = format!("{prefix}{}", field.name);
        match map.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    invalid.push(path);
                }
            }
            Some(value) => check_value(&field.kind, value, &path, invalid),
        }
    }
}

fn check_value(kind: &FieldKind, value: &Value, path: &str, invalid: &mut Vec<String>) {
    let matches = match (kind, value) {
        (FieldKind::Text, Value::String(_)) => true,
        (FieldKind::Number, Value::Number(_)) => true,
        (FieldKind::Flag, Value::Bool(_)) => true,
        (FieldKind::TextList, Value::Array(items)) => items.iter().all(Value::is_string),
        (FieldKind::Choice(values), Value::String(text)) => {
            values.iter().any(|allowed| allowed.eq_ignore_ascii_case(text.trim()))
        }
        (FieldKind::Parsed(_, accepts), Value::String(text)) => accepts(text),
        (FieldKind::Record(fields), Value::Object(map)) => {
            collect_invalid(fields, map, &format!("{path}."), invalid);
            true
        }
        (FieldKind::RecordList(fields), Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                match item {
                    Value::Object(map) => {
                        collect_invalid(fields, map, &format!("{path}[{index}]."), invalid)
                    }
                    _ => invalid.push(format!("{path}[{index}]")),
                }
            }
            true
        }
        _ => false,
    };
    if !matches {
        invalid.push(path.to_string());
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid arguments ({}): {message}", .fields.join(", "))]
    InvalidArguments { fields: Vec<String>, message: String },
    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments { fields: vec![field.into()], message: message.into() }
    }

    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Deserializes validated arguments into a capability's typed input.
pub fn decode_arguments<T>(arguments: Value) -> Result<T, CapabilityError>
where
    T: DeserializeOwned,
{
    let arguments = if arguments.is_null() { Value::Object(Map::new()) } else { arguments };
    serde_json::from_value(arguments).map_err(|error| {
        let message = error.to_string();
        CapabilityError::InvalidArguments { fields: backticked_names(&message), message }
    })
}

pub fn encode_output<T>(output: &T) -> Result<Value, CapabilityError>
where
    T: Serialize,
{
    serde_json::to_value(output).map_err(CapabilityError::failed)
}

// serde names the offending field between backticks ("missing field `name`").
fn backticked_names(message: &str) -> Vec<String> {
    message.split('`').skip(1).step_by(2).map(str::to_string).collect()
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_fields(&self) -> &'static [FieldSpec];

    /// Slot in `latest_results` that a successful invocation overwrites.
    fn category(&self) -> Option<ResultCategory> {
        None
    }

    /// True when `invoke` may suspend on an operator prompt/response exchange.
    fn may_block_on_input(&self) -> bool {
        false
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl CapabilityDefinition {
    pub fn new(name: &str, description: &str, fields: &[FieldSpec]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: object_schema(fields),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    UnknownCapability,
    InvalidArguments,
    CapabilityFailure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub kind: DispatchErrorKind,
    pub capability: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

/// Outcome of one dispatch, ready to be embedded in a tool message.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedResult {
    pub capability: String,
    pub category: Option<ResultCategory>,
    pub outcome: Result<Value, DispatchFailure>,
}

impl SerializedResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error_kind(&self) -> Option<DispatchErrorKind> {
        self.outcome.as_ref().err().map(|failure| failure.kind)
    }

    /// The output to store under `latest_results`, when the capability succeeded and has a
    /// category.
    pub fn categorized_output(&self) -> Option<(ResultCategory, &Value)> {
        match (&self.category, &self.outcome) {
            (Some(category), Ok(output)) => Some((*category, output)),
            _ => None,
        }
    }

    pub fn content(&self) -> Value {
        match &self.outcome {
            Ok(output) => output.clone(),
            Err(failure) => json!({ "error": failure }),
        }
    }

    fn failure(
        capability: &str,
        category: Option<ResultCategory>,
        kind: DispatchErrorKind,
        message: String,
        fields: Vec<String>,
    ) -> Self {
        Self {
            capability: capability.to_string(),
            category,
            outcome: Err(DispatchFailure {
                kind,
                capability: capability.to_string(),
                message,
                fields,
            }),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability `{0}` is already registered")]
    DuplicateCapability(String),
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Box<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, capability: T) -> Result<(), RegistryError>
    where
        T: Capability + 'static,
    {
        let name = capability.name().to_string();
        if self.capabilities.contains_key(&name) {
            return Err(RegistryError::DuplicateCapability(name));
        }
        self.capabilities.insert(name, Box::new(capability));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities.get(name).map(|capability| capability.as_ref())
    }

    /// Sorted by name so providers see a stable declaration order.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        let mut definitions: Vec<_> = self
            .capabilities
            .values()
            .map(|capability| {
                CapabilityDefinition::new(
                    capability.name(),
                    capability.description(),
                    capability.input_fields(),
                )
            })
            .collect();
        definitions.sort_by(|left, right| left.name.cmp(&right.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Never fails: lookup, validation and capability errors all come back as error results
    /// so the decision policy can see them.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> SerializedResult {
        let Some(capability) = self.get(name) else {
            warn!(event_name = "agent.dispatch.unknown_capability", capability = name, "unknown capability requested");
            return SerializedResult::failure(
                name,
                None,
                DispatchErrorKind::UnknownCapability,
                format!("unknown capability `{name}`"),
                Vec::new(),
            );
        };
        let category = capability.category();

        let invalid = invalid_fields(capability.input_fields(), &arguments);
        if !invalid.is_empty() {
            warn!(
                event_name = "agent.dispatch.invalid_arguments",
                capability = name,
                fields = %invalid.join(","),
                "arguments do not match capability input"
            );
            return SerializedResult::failure(
                name,
                category,
                DispatchErrorKind::InvalidArguments,
                format!("arguments for `{name}` are missing or malformed: {}", invalid.join(", ")),
                invalid,
            );
        }

        if capability.may_block_on_input() {
            debug!(event_name = "agent.dispatch.awaiting_operator", capability = name, "capability may prompt the operator");
        }

        match capability.invoke(arguments).await {
            Ok(output) => SerializedResult { capability: name.to_string(), category, outcome: Ok(output) },
            Err(CapabilityError::InvalidArguments { fields, message }) => {
                warn!(event_name = "agent.dispatch.invalid_arguments", capability = name, %message, "capability rejected arguments");
                SerializedResult::failure(name, category, DispatchErrorKind::InvalidArguments, message, fields)
            }
            Err(CapabilityError::Failed(message)) => {
                warn!(event_name = "agent.dispatch.capability_failure", capability = name, %message, "capability failed");
                SerializedResult::failure(name, category, DispatchErrorKind::CapabilityFailure, message, Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::{
        decode_arguments, invalid_fields, object_schema, Capability, CapabilityError,
        CapabilityRegistry, DispatchErrorKind, FieldKind, FieldSpec, RegistryError,
    };
    use crate::conversation::ResultCategory;

    const ECHO_FIELDS: &[FieldSpec] = &[
        FieldSpec { name: "text", kind: FieldKind::Text, required: true, description: "text" },
        FieldSpec { name: "times", kind: FieldKind::Number, required: false, description: "n" },
    ];

    const NESTED_FIELDS: &[FieldSpec] = &[FieldSpec {
        name: "features",
        kind: FieldKind::RecordList(&[FieldSpec {
            name: "name",
            kind: FieldKind::Text,
            required: true,
            description: "name",
        }]),
        required: true,
        description: "features",
    }];

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes text back"
        }

        fn input_fields(&self) -> &'static [FieldSpec] {
            ECHO_FIELDS
        }

        fn category(&self) -> Option<ResultCategory> {
            Some(ResultCategory::Story)
        }

        async fn invoke(&self, arguments: Value) -> Result<Value, CapabilityError> {
            let input: EchoInput = decode_arguments(arguments)?;
            if input.text == "boom" {
                return Err(CapabilityError::failed("downstream extraction failed"));
            }
            Ok(json!({ "echo": input.text }))
        }
    }

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register(Echo).expect("first registration succeeds");
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        assert_eq!(
            registry.register(Echo),
            Err(RegistryError::DuplicateCapability("echo".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn successful_dispatch_is_categorized() {
        let result = registry().dispatch("echo", json!({"text": "hi"})).await;

        assert!(!result.is_error());
        let (category, output) = result.categorized_output().expect("categorized output");
        assert_eq!(category, ResultCategory::Story);
        assert_eq!(output, &json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error_result() {
        let result = registry().dispatch("summon", json!({})).await;

        assert_eq!(result.error_kind(), Some(DispatchErrorKind::UnknownCapability));
        assert!(result.categorized_output().is_none());
        assert_eq!(result.content()["error"]["kind"], "unknown_capability");
        assert_eq!(result.content()["error"]["capability"], "summon");
    }

    #[tokio::test]
    async fn invalid_arguments_name_the_offending_fields() {
        let result = registry().dispatch("echo", json!({"times": "twice"})).await;

        assert_eq!(result.error_kind(), Some(DispatchErrorKind::InvalidArguments));
        assert_eq!(result.content()["error"]["fields"], json!(["text", "times"]));
    }

    #[tokio::test]
    async fn capability_failure_is_reported_not_raised() {
        let result = registry().dispatch("echo", json!({"text": "boom"})).await;

        assert_eq!(result.error_kind(), Some(DispatchErrorKind::CapabilityFailure));
        assert!(result.categorized_output().is_none());
        assert_eq!(result.content()["error"]["message"], "downstream extraction failed");
    }

    #[test]
    fn nested_records_report_indexed_paths() {
        let invalid = invalid_fields(NESTED_FIELDS, &json!({"features": [{"name": "a"}, {}, 3]}));
        assert_eq!(invalid, vec!["features[1].name".to_string(), "features[2]".to_string()]);
    }

    #[test]
    fn non_object_arguments_are_invalid() {
        assert_eq!(invalid_fields(ECHO_FIELDS, &json!("text")), vec!["arguments".to_string()]);
    }

    #[test]
    fn choice_fields_accept_any_case() {
        const FIELDS: &[FieldSpec] = &[FieldSpec {
            name: "framework",
            kind: FieldKind::Choice(&["RICE", "MoSCoW"]),
            required: false,
            description: "framework",
        }];
        assert!(invalid_fields(FIELDS, &json!({"framework": "moscow"})).is_empty());
        assert_eq!(invalid_fields(FIELDS, &json!({"framework": "kano"})), vec!["framework"]);
    }

    #[test]
    fn schema_lists_required_fields() {
        let schema = object_schema(ECHO_FIELDS);
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["times"]["type"], "number");
    }

    #[test]
    fn decode_errors_carry_field_names() {
        let error = decode_arguments::<EchoInput>(json!({})).err().expect("missing text");
        assert!(matches!(
            error,
            CapabilityError::InvalidArguments { ref fields, .. } if fields == &vec!["text".to_string()]
        ));
    }

    #[tokio::test]
    async fn definitions_are_sorted_by_name() {
        let definitions = registry().definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "echo");
        assert_eq!(definitions[0].parameters["type"], "object");
    }
}
