//! Tool schemas: the contract a tool declares to the model and to the invoker.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of one tool: name, purpose, parameter contract, and whether it mutates state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool name
    pub name: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// The parameter contract
    #[serde(default)]
    pub parameters: ParameterSchema,
    /// Whether the tool only reads state (eligible for read-only auto-approval)
    #[serde(default)]
    pub read_only: bool,
}

/// The object contract describing a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always `"object"` for a well-formed contract
    #[serde(rename = "type", default = "object_kind")]
    pub kind: String,
    /// Declared properties
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Names of properties that must be supplied
    #[serde(default)]
    pub required: Vec<String>,
}

/// A single declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// The JSON type of the property
    #[serde(rename = "type")]
    pub kind: PropertyType,
    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional closed set of allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Element contract for array properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

/// JSON types a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// Reasons a declared schema is not well-formed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema is missing a name")]
    MissingName,
    #[error("invalid tool name '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidName(String),
    #[error("tool '{0}' is missing a description")]
    MissingDescription(String),
    #[error("parameters must describe an object, got type '{0}'")]
    NotAnObject(String),
    #[error("required property '{0}' is not declared in properties")]
    UndeclaredRequired(String),
    #[error("cannot derive parameters: {0}")]
    Unsupported(String),
}

/// Reasons a set of call arguments does not satisfy a parameter contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("missing required parameter: {0}")]
    MissingRequired(String),
    #[error("parameter '{name}' must be a {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("parameter '{0}' is not one of the allowed values")]
    NotAllowed(String),
}

fn object_kind() -> String {
    "object".to_string()
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: object_kind(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ToolSchema {
    /// Creates a schema with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema::default(),
            read_only: false,
        }
    }

    /// Adds a property, optionally marking it required.
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        property: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        if required {
            self.parameters.required.push(name.clone());
        }
        self.parameters.properties.insert(name, property);
        self
    }

    /// Replaces the parameter contract.
    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    /// Flags the tool as non-mutating.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Checks the schema is well-formed.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::MissingName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }
        if self.description.trim().is_empty() {
            return Err(SchemaError::MissingDescription(self.name.clone()));
        }
        self.parameters.validate()
    }

    /// Checks call arguments against the parameter contract.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), ArgumentError> {
        self.parameters.validate_arguments(arguments)
    }
}

impl ParameterSchema {
    /// Derives a parameter contract from a Rust argument type.
    pub fn for_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let generator = SchemaSettings::draft07()
            .with(|s| {
                s.option_add_null_type = false;
                s.inline_subschemas = true;
            })
            .into_generator();
        let root = generator.into_root_schema_for::<T>();
        let Some(object) = root.schema.object.as_deref() else {
            return Err(SchemaError::NotAnObject(instance_name(&root.schema)));
        };

        let mut properties = BTreeMap::new();
        for (name, schema) in &object.properties {
            properties.insert(name.clone(), property_from_schemars(name, schema)?);
        }

        Ok(Self {
            kind: object_kind(),
            properties,
            required: object.required.iter().cloned().collect(),
        })
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.kind != "object" {
            return Err(SchemaError::NotAnObject(self.kind.clone()));
        }
        for name in &self.required {
            if !self.properties.contains_key(name) {
                return Err(SchemaError::UndeclaredRequired(name.clone()));
            }
        }
        Ok(())
    }

    fn validate_arguments(&self, arguments: &Value) -> Result<(), ArgumentError> {
        let object = arguments
            .as_object()
            .ok_or_else(|| ArgumentError::NotAnObject(json_type_name(arguments)))?;

        for name in &self.required {
            if !object.contains_key(name) {
                return Err(ArgumentError::MissingRequired(name.clone()));
            }
        }

        for (name, value) in object {
            // Undeclared extras are passed through untouched.
            let Some(property) = self.properties.get(name) else {
                continue;
            };
            if !property.kind.accepts(value) {
                return Err(ArgumentError::TypeMismatch {
                    name: name.clone(),
                    expected: property.kind.as_str(),
                    found: json_type_name(value),
                });
            }
            if let Some(allowed) = &property.allowed {
                if !allowed.contains(value) {
                    return Err(ArgumentError::NotAllowed(name.clone()));
                }
            }
        }

        Ok(())
    }
}

impl PropertySchema {
    /// Creates a property of the given type.
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
            items: None,
        }
    }

    /// Shorthand for a described string property.
    pub fn string(description: impl Into<String>) -> Self {
        Self::new(PropertyType::String).describe(description)
    }

    /// Sets the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the property to a closed set of values.
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

impl PropertyType {
    /// The JSON Schema name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
        }
    }

    /// Whether a JSON value conforms to this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Integer => value.is_i64() || value.is_u64(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Array => value.is_array(),
            PropertyType::Object => value.is_object(),
        }
    }

    fn from_instance(instance: InstanceType) -> Option<Self> {
        match instance {
            InstanceType::String => Some(PropertyType::String),
            InstanceType::Integer => Some(PropertyType::Integer),
            InstanceType::Number => Some(PropertyType::Number),
            InstanceType::Boolean => Some(PropertyType::Boolean),
            InstanceType::Array => Some(PropertyType::Array),
            InstanceType::Object => Some(PropertyType::Object),
            InstanceType::Null => None,
        }
    }
}

fn property_from_schemars(name: &str, schema: &Schema) -> Result<PropertySchema, SchemaError> {
    let Schema::Object(object) = schema else {
        return Err(SchemaError::Unsupported(format!(
            "property '{name}' has a boolean schema"
        )));
    };

    let kind = match &object.instance_type {
        Some(SingleOrVec::Single(instance)) => PropertyType::from_instance(**instance),
        Some(SingleOrVec::Vec(instances)) => instances
            .iter()
            .copied()
            .find_map(PropertyType::from_instance),
        None if object.object.is_some() || object.reference.is_some() => {
            Some(PropertyType::Object)
        }
        None => None,
    }
    .ok_or_else(|| SchemaError::Unsupported(format!("property '{name}' has no usable type")))?;

    let items = match object.array.as_ref().and_then(|a| a.items.as_ref()) {
        Some(SingleOrVec::Single(item)) => Some(Box::new(property_from_schemars(name, item)?)),
        _ => None,
    };

    Ok(PropertySchema {
        kind,
        description: object.metadata.as_ref().and_then(|m| m.description.clone()),
        allowed: object.enum_values.clone(),
        items,
    })
}

fn instance_name(schema: &SchemaObject) -> String {
    match &schema.instance_type {
        Some(SingleOrVec::Single(instance)) => format!("{instance:?}").to_lowercase(),
        _ => "unknown".to_string(),
    }
}

/// The JSON type name of a value, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> ToolSchema {
        ToolSchema::new("get_weather", "Get the current weather for a location")
            .with_property("location", PropertySchema::string("City name"), true)
            .with_property(
                "unit",
                PropertySchema::string("Temperature unit").one_of(["celsius", "fahrenheit"]),
                false,
            )
            .with_property("days", PropertySchema::new(PropertyType::Integer), false)
    }

    #[test]
    fn well_formed_schema_validates() {
        assert!(weather_schema().validate().is_ok());
    }

    #[test]
    fn required_must_be_declared() {
        let mut schema = weather_schema();
        schema.parameters.required.push("country".to_string());
        assert_eq!(
            schema.validate(),
            Err(SchemaError::UndeclaredRequired("country".to_string()))
        );
    }

    #[test]
    fn name_and_description_are_mandatory() {
        assert_eq!(
            ToolSchema::new("", "does things").validate(),
            Err(SchemaError::MissingName)
        );
        assert_eq!(
            ToolSchema::new("thing", "  ").validate(),
            Err(SchemaError::MissingDescription("thing".to_string()))
        );
        assert!(matches!(
            ToolSchema::new("bad name!", "x").validate(),
            Err(SchemaError::InvalidName(_))
        ));
    }

    #[test]
    fn parameters_must_be_object() {
        let schema: ToolSchema = serde_json::from_value(json!({
            "name": "list",
            "description": "lists",
            "parameters": { "type": "array" }
        }))
        .unwrap();
        assert_eq!(
            schema.validate(),
            Err(SchemaError::NotAnObject("array".to_string()))
        );
    }

    #[test]
    fn deserializes_openai_function_shape() {
        let schema: ToolSchema = serde_json::from_value(json!({
            "name": "search_web",
            "description": "Search the web",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }
        }))
        .unwrap();
        assert!(!schema.read_only);
        assert_eq!(schema.parameters.required, vec!["query"]);
        assert_eq!(
            schema.parameters.properties["query"].kind,
            PropertyType::String
        );
    }

    #[test]
    fn arguments_missing_required() {
        let err = weather_schema()
            .validate_arguments(&json!({ "unit": "celsius" }))
            .unwrap_err();
        assert_eq!(err, ArgumentError::MissingRequired("location".to_string()));
    }

    #[test]
    fn arguments_type_checked() {
        let schema = weather_schema();
        assert!(schema
            .validate_arguments(&json!({ "location": "Paris", "days": 3 }))
            .is_ok());
        assert!(matches!(
            schema.validate_arguments(&json!({ "location": 7 })),
            Err(ArgumentError::TypeMismatch { expected: "string", found: "integer", .. })
        ));
        assert!(matches!(
            schema.validate_arguments(&json!({ "location": "Paris", "days": 1.5 })),
            Err(ArgumentError::TypeMismatch { expected: "integer", .. })
        ));
        assert_eq!(
            schema.validate_arguments(&json!({ "location": "Paris", "unit": "kelvin" })),
            Err(ArgumentError::NotAllowed("unit".to_string()))
        );
        assert_eq!(
            schema.validate_arguments(&json!("Paris")),
            Err(ArgumentError::NotAnObject("string"))
        );
    }

    #[test]
    fn extra_arguments_are_ignored() {
        assert!(weather_schema()
            .validate_arguments(&json!({ "location": "Oslo", "verbose": true }))
            .is_ok());
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct SearchArgs {
        /// Search query
        query: String,
        /// Maximum results
        limit: Option<u32>,
        tags: Vec<String>,
    }

    #[test]
    fn derives_parameters_from_type() {
        let params = ParameterSchema::for_type::<SearchArgs>().unwrap();
        assert_eq!(params.kind, "object");
        assert_eq!(params.properties["query"].kind, PropertyType::String);
        assert_eq!(
            params.properties["query"].description.as_deref(),
            Some("Search query")
        );
        assert_eq!(params.properties["limit"].kind, PropertyType::Integer);
        assert_eq!(params.properties["tags"].kind, PropertyType::Array);
        assert_eq!(
            params.properties["tags"].items.as_ref().map(|i| i.kind),
            Some(PropertyType::String)
        );
        assert!(params.required.contains(&"query".to_string()));
        assert!(!params.required.contains(&"limit".to_string()));
    }
}
